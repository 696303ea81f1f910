//! Project phase state machine.

use crate::core::error::TransitionError;
use crate::core::types::{ProjectPhase, ProjectState};

/// The sole legal successor of `phase`; `None` for `complete`.
pub fn successor(phase: ProjectPhase) -> Option<ProjectPhase> {
    match phase {
        ProjectPhase::Brainstorm => Some(ProjectPhase::SpecDraft),
        ProjectPhase::SpecDraft => Some(ProjectPhase::SpecApproved),
        ProjectPhase::SpecApproved => Some(ProjectPhase::PlanDraft),
        ProjectPhase::PlanDraft => Some(ProjectPhase::PlanApproved),
        ProjectPhase::PlanApproved => Some(ProjectPhase::TasksGenerated),
        ProjectPhase::TasksGenerated => Some(ProjectPhase::Executing),
        ProjectPhase::Executing => Some(ProjectPhase::Complete),
        ProjectPhase::Complete => None,
    }
}

pub fn can_transition_phase(from: ProjectPhase, to: ProjectPhase) -> bool {
    successor(from) == Some(to)
}

/// Move the project to `target`, setting the sticky approval flag that the
/// target phase implies. The caller persists the state.
pub fn transition_phase(
    state: &mut ProjectState,
    target: ProjectPhase,
) -> Result<(), TransitionError> {
    if !can_transition_phase(state.phase, target) {
        return Err(TransitionError::InvalidPhase {
            from: state.phase,
            to: target,
        });
    }
    match target {
        ProjectPhase::SpecApproved => state.spec_approved = true,
        ProjectPhase::PlanApproved => state.plan_approved = true,
        ProjectPhase::TasksGenerated => state.tasks_approved = true,
        _ => {}
    }
    state.phase = target;
    state.touch();
    Ok(())
}
