//! Escalation bookkeeping on the project aggregate.

use chrono::Utc;

use crate::core::error::TransitionError;
use crate::core::types::{AgentRole, Escalation, ProjectState};

/// Record an unresolved escalation for `task_id` and link it from the task.
///
/// Fails if the task is unknown or already has an open escalation; in that
/// case nothing is changed.
pub fn open_escalation(
    state: &mut ProjectState,
    task_id: &str,
    from_role: AgentRole,
    to_role: Option<AgentRole>,
    reason: impl Into<String>,
) -> Result<String, TransitionError> {
    if state.task(task_id).is_none() {
        return Err(TransitionError::UnknownTask(task_id.to_string()));
    }
    if let Some(open) = state.open_escalation(task_id) {
        return Err(TransitionError::EscalationOpen {
            task_id: task_id.to_string(),
            escalation_id: open.id.clone(),
        });
    }
    let id = format!("esc-{}-{}", task_id, state.escalation_count(task_id) + 1);
    state.escalations.push(Escalation {
        id: id.clone(),
        task_id: task_id.to_string(),
        from_role,
        to_role,
        reason: reason.into(),
        resolved: false,
        resolution: String::new(),
        created_at: Utc::now(),
        resolved_at: None,
    });
    if let Some(task) = state.task_mut(task_id) {
        task.escalation_id = Some(id.clone());
    }
    state.touch();
    Ok(id)
}

/// Mark an escalation resolved. Resolved escalations are never rewritten:
/// resolving one twice returns `false` and leaves it untouched.
pub fn resolve_escalation(
    state: &mut ProjectState,
    escalation_id: &str,
    resolution: impl Into<String>,
) -> bool {
    let Some(escalation) = state.escalation_mut(escalation_id) else {
        return false;
    };
    if escalation.resolved {
        return false;
    }
    escalation.resolved = true;
    escalation.resolution = resolution.into();
    escalation.resolved_at = Some(Utc::now());
    state.touch();
    true
}
