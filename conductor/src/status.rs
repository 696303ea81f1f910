//! Read-only project snapshot for `conductor status`.

use serde::Serialize;

use crate::core::types::{ProjectPhase, ProjectState, TaskState};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskLine {
    pub id: String,
    pub title: String,
    pub state: TaskState,
    pub attempt: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TaskCounts {
    pub total: usize,
    pub done: usize,
    pub blocked: usize,
    pub remaining: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EscalationCounts {
    pub open: usize,
    pub resolved: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub project: String,
    pub version: String,
    pub phase: ProjectPhase,
    pub spec_approved: bool,
    pub plan_approved: bool,
    pub tasks_approved: bool,
    pub tasks: Vec<TaskLine>,
    pub counts: TaskCounts,
    pub escalations: EscalationCounts,
}

pub fn snapshot(state: &ProjectState) -> StatusSnapshot {
    let done = state.count_in(TaskState::is_finished);
    let blocked = state.count_in(|s| s == TaskState::Blocked);
    let resolved = state.escalations.iter().filter(|e| e.resolved).count();
    StatusSnapshot {
        project: state.project_name.clone(),
        version: state.version.clone(),
        phase: state.phase,
        spec_approved: state.spec_approved,
        plan_approved: state.plan_approved,
        tasks_approved: state.tasks_approved,
        tasks: state
            .tasks
            .iter()
            .map(|task| TaskLine {
                id: task.id.clone(),
                title: task.title.clone(),
                state: task.state,
                attempt: task.attempt,
                blocked_reason: task.blocked_reason.clone(),
            })
            .collect(),
        counts: TaskCounts {
            total: state.tasks.len(),
            done,
            blocked,
            remaining: state.tasks.len() - done - blocked,
        },
        escalations: EscalationCounts {
            open: state.escalations.len() - resolved,
            resolved,
        },
    }
}

fn flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

/// Plain-text rendering for the terminal.
pub fn render(snapshot: &StatusSnapshot) -> String {
    let mut lines = vec![
        format!("project: {} ({})", snapshot.project, snapshot.version),
        format!("phase:   {}", snapshot.phase),
        format!(
            "approved: spec={} plan={} tasks={}",
            flag(snapshot.spec_approved),
            flag(snapshot.plan_approved),
            flag(snapshot.tasks_approved)
        ),
    ];
    if !snapshot.tasks.is_empty() {
        lines.push(String::new());
        for task in &snapshot.tasks {
            lines.push(format!(
                "  {:<12} {:<12} attempt {}  {}",
                task.id, task.state.as_str(), task.attempt, task.title
            ));
            if let Some(reason) = &task.blocked_reason {
                lines.push(format!("  {:<12} blocked: {reason}", ""));
            }
        }
        lines.push(String::new());
    }
    let counts = snapshot.counts;
    lines.push(format!(
        "tasks: {} total, {} done, {} blocked, {} remaining",
        counts.total, counts.done, counts.blocked, counts.remaining
    ));
    lines.push(format!(
        "escalations: {} open, {} resolved",
        snapshot.escalations.open, snapshot.escalations.resolved
    ));
    lines.join("\n")
}
