//! Task state machine.
//!
//! Legal edges live in [`legal_targets`]; side effects of particular edges live
//! in [`EDGE_EFFECTS`]. [`transition_task`] is the only function that changes
//! `Task::state`.

use chrono::Utc;

use crate::core::error::TransitionError;
use crate::core::types::{Task, TaskState};

/// Side effect applied when a specific edge is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeEffect {
    /// Re-entering work after a failed review or validation.
    IncrementAttempt,
    /// Leaving `blocked`: attempt budget, reason and escalation link are cleared.
    FreshStart,
}

pub const EDGE_EFFECTS: &[(TaskState, TaskState, EdgeEffect)] = &[
    (
        TaskState::InReview,
        TaskState::InProgress,
        EdgeEffect::IncrementAttempt,
    ),
    (
        TaskState::InQa,
        TaskState::InProgress,
        EdgeEffect::IncrementAttempt,
    ),
    (TaskState::Blocked, TaskState::Ready, EdgeEffect::FreshStart),
];

pub fn legal_targets(from: TaskState) -> &'static [TaskState] {
    match from {
        TaskState::New => &[TaskState::Ready],
        TaskState::Ready => &[TaskState::InProgress],
        TaskState::InProgress => &[TaskState::InReview, TaskState::Blocked],
        TaskState::InReview => &[TaskState::InQa, TaskState::InProgress, TaskState::Blocked],
        TaskState::InQa => &[TaskState::Done, TaskState::InProgress, TaskState::Blocked],
        TaskState::Done => &[TaskState::Archived],
        TaskState::Blocked => &[TaskState::Ready],
        TaskState::Archived => &[],
    }
}

pub fn can_transition_task(from: TaskState, to: TaskState) -> bool {
    legal_targets(from).contains(&to)
}

fn edge_effect(from: TaskState, to: TaskState) -> Option<EdgeEffect> {
    EDGE_EFFECTS
        .iter()
        .find(|(edge_from, edge_to, _)| *edge_from == from && *edge_to == to)
        .map(|(_, _, effect)| *effect)
}

/// Move `task` to `target`, applying the edge's effect and stamping `updated_at`.
///
/// On an illegal edge the task is left exactly as it was.
pub fn transition_task(task: &mut Task, target: TaskState) -> Result<(), TransitionError> {
    let from = task.state;
    if !can_transition_task(from, target) {
        return Err(TransitionError::InvalidTask {
            task_id: task.id.clone(),
            from,
            to: target,
        });
    }
    match edge_effect(from, target) {
        Some(EdgeEffect::IncrementAttempt) => task.attempt += 1,
        Some(EdgeEffect::FreshStart) => {
            task.attempt = 0;
            task.blocked_reason = None;
            task.escalation_id = None;
        }
        None => {}
    }
    task.state = target;
    task.updated_at = Utc::now();
    Ok(())
}

/// Block `task` and record why.
pub fn block_task(task: &mut Task, reason: impl Into<String>) -> Result<(), TransitionError> {
    transition_task(task, TaskState::Blocked)?;
    task.blocked_reason = Some(reason.into());
    Ok(())
}
