//! Collaborators shared by the attempt loop, escalations and the pipeline.
//!
//! [`Engine`] bundles one project's paths, configuration, prompt composer,
//! run ledger, agent invoker and reporter. It owns the plumbing every agent
//! call needs: compose, invoke, time, report and append a [`RunLog`].

use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, instrument};

use crate::core::output::AgentOutput;
use crate::core::types::{AgentRole, CommandResult, ProjectState, RunLog, TokenUsage};
use crate::io::agent::{AgentInvoker, AgentRequest};
use crate::io::artifacts::read_artifact;
use crate::io::config::ConductorConfig;
use crate::io::init::ProjectPaths;
use crate::io::ledger::RunLedger;
use crate::io::prompt::{DEFAULT_PROMPT_BUDGET_CHARS, PromptComposer};
use crate::io::state_store::write_state;
use crate::reporter::{Event, Reporter};

/// A finished agent call, not yet written to the ledger.
#[derive(Debug, Clone)]
pub struct AgentCall {
    pub output: AgentOutput,
    pub usage: TokenUsage,
    pub duration_ms: u64,
    pub model: String,
}

/// Where a run log belongs.
#[derive(Debug, Clone, Copy)]
pub struct LogSlot<'s> {
    pub task_id: &'s str,
    pub attempt: u32,
    pub round: u32,
}

pub struct Engine<'a, A: AgentInvoker> {
    pub paths: ProjectPaths,
    pub config: ConductorConfig,
    pub prompts: PromptComposer,
    pub ledger: RunLedger,
    /// Merged preferences rendered as TOML.
    pub preferences: String,
    /// Lessons from earlier projects.
    pub lessons: String,
    invoker: &'a A,
    reporter: &'a dyn Reporter,
}

impl<'a, A: AgentInvoker> Engine<'a, A> {
    pub fn new(
        paths: ProjectPaths,
        config: ConductorConfig,
        invoker: &'a A,
        reporter: &'a dyn Reporter,
    ) -> Result<Self> {
        Ok(Self {
            ledger: RunLedger::new(paths.runs_dir.clone()),
            prompts: PromptComposer::new(DEFAULT_PROMPT_BUDGET_CHARS)?,
            paths,
            config,
            preferences: String::new(),
            lessons: String::new(),
            invoker,
            reporter,
        })
    }

    pub fn with_preferences(mut self, preferences: String) -> Self {
        self.preferences = preferences;
        self
    }

    pub fn with_lessons(mut self, lessons: String) -> Self {
        self.lessons = lessons;
        self
    }

    pub fn report(&self, event: Event) {
        self.reporter.report(event);
    }

    /// Persist the whole aggregate.
    pub fn save(&self, state: &ProjectState) -> Result<()> {
        write_state(&self.paths.state_path, state)
    }

    /// Approved spec for the active version, empty when absent.
    pub fn spec(&self, state: &ProjectState) -> Result<String> {
        Ok(read_artifact(&self.paths.spec_path(&state.version))?.unwrap_or_default())
    }

    pub fn plan(&self, state: &ProjectState) -> Result<String> {
        Ok(read_artifact(&self.paths.plan_path(&state.version))?.unwrap_or_default())
    }

    /// Invoke the agent for `role` and report how it went.
    #[instrument(skip_all, fields(role = %role, task_id))]
    pub fn call_agent(&self, role: AgentRole, prompt: String, task_id: &str) -> AgentCall {
        let model = self.config.models.for_role(role).clone();
        let request = AgentRequest::new(role, prompt, model.clone());
        let started = Instant::now();
        let invocation = self.invoker.invoke(&request);
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        debug!(
            status = %invocation.output.status(),
            duration_ms,
            "agent call finished"
        );
        let envelope = invocation.output.envelope();
        self.report(Event::AgentFinished {
            role,
            task_id: task_id.to_string(),
            status: envelope.status,
            summary: envelope.summary.clone(),
        });
        AgentCall {
            usage: TokenUsage {
                input: invocation.usage.input_tokens,
                output: invocation.usage.output_tokens,
            },
            output: invocation.output,
            duration_ms,
            model: model.model,
        }
    }

    /// Append the run log for `call`.
    pub fn record(
        &self,
        call: &AgentCall,
        slot: LogSlot<'_>,
        commands: Vec<CommandResult>,
    ) -> Result<()> {
        let envelope = call.output.envelope();
        let log = RunLog {
            role: call.output.role(),
            task_id: slot.task_id.to_string(),
            attempt: slot.attempt,
            round: slot.round,
            status: envelope.status,
            summary: envelope.summary.clone(),
            next_action: envelope.next_action.clone(),
            files_touched: envelope.files_touched.clone(),
            commands,
            token_usage: call.usage,
            duration_ms: call.duration_ms,
            model_used: call.model.clone(),
            timestamp: Utc::now(),
        };
        self.ledger
            .append(&log)
            .with_context(|| format!("record {} run for {}", log.role, slot.task_id))?;
        Ok(())
    }
}
