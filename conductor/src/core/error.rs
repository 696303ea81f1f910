//! Typed errors raised by the state machines.

use thiserror::Error;

use crate::core::types::{ProjectPhase, TaskState};

/// A state change the lifecycle tables do not allow. The entity is untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("invalid task transition for {task_id}: {from} -> {to}")]
    InvalidTask {
        task_id: String,
        from: TaskState,
        to: TaskState,
    },
    #[error("invalid phase transition: {from} -> {to}")]
    InvalidPhase { from: ProjectPhase, to: ProjectPhase },
    #[error("task {task_id} already has an open escalation ({escalation_id})")]
    EscalationOpen {
        task_id: String,
        escalation_id: String,
    },
    #[error("unknown task {0}")]
    UnknownTask(String),
}
