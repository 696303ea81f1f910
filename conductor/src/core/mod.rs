//! Deterministic, pure logic shared by the engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod digest;
pub mod error;
pub mod escalations;
pub mod feedback;
pub mod invariants;
pub mod output;
pub mod phase;
pub mod selector;
pub mod task_machine;
pub mod types;
