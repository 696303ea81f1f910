//! Phase and task orchestration for agent-driven software projects.
//!
//! A project moves through approval phases (brainstorm, spec, plan, tasks)
//! and then executes a dependency-ordered set of tasks. Each task runs a
//! bounded build/validate loop driven by agents, and escalates to a planner
//! when the loop cannot make progress.
//!
//! - **[`core`]**: Pure, deterministic logic (state machines, selection,
//!   invariants, feedback and context formatting). No I/O.
//! - **[`io`]**: Side effects (state and ledger files, processes, workspace,
//!   agent backends, prompts).
//!
//! Orchestration modules ([`attempt`], [`escalation`], [`pipeline`],
//! [`commands`]) combine the two to implement the CLI commands.

pub mod attempt;
pub mod commands;
pub mod core;
pub mod engine;
pub mod escalation;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod pipeline;
pub mod reporter;
pub mod retro;
pub mod status;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
