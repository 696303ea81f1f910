//! Shared data model for projects, tasks, escalations and run logs.
//!
//! These types are the persisted contract of the engine: `state.json` holds a
//! [`ProjectState`] and every file under `logs/runs/` holds one [`RunLog`].
//! Field names and enum spellings are stable across runs.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-task lifecycle stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    #[default]
    New,
    Ready,
    InProgress,
    InReview,
    InQa,
    Done,
    Blocked,
    Archived,
}

impl TaskState {
    pub const ALL: [TaskState; 8] = [
        TaskState::New,
        TaskState::Ready,
        TaskState::InProgress,
        TaskState::InReview,
        TaskState::InQa,
        TaskState::Done,
        TaskState::Blocked,
        TaskState::Archived,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::New => "new",
            TaskState::Ready => "ready",
            TaskState::InProgress => "in_progress",
            TaskState::InReview => "in_review",
            TaskState::InQa => "in_qa",
            TaskState::Done => "done",
            TaskState::Blocked => "blocked",
            TaskState::Archived => "archived",
        }
    }

    /// Done or archived: satisfies dependencies and counts towards completion.
    pub fn is_finished(self) -> bool {
        matches!(self, TaskState::Done | TaskState::Archived)
    }

    /// Mid-attempt. Only an interrupted run leaves a saved task here.
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            TaskState::InProgress | TaskState::InReview | TaskState::InQa
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Project-level lifecycle stage. Linear and one-directional.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectPhase {
    #[default]
    Brainstorm,
    SpecDraft,
    SpecApproved,
    PlanDraft,
    PlanApproved,
    TasksGenerated,
    Executing,
    Complete,
}

impl ProjectPhase {
    pub const ALL: [ProjectPhase; 8] = [
        ProjectPhase::Brainstorm,
        ProjectPhase::SpecDraft,
        ProjectPhase::SpecApproved,
        ProjectPhase::PlanDraft,
        ProjectPhase::PlanApproved,
        ProjectPhase::TasksGenerated,
        ProjectPhase::Executing,
        ProjectPhase::Complete,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProjectPhase::Brainstorm => "brainstorm",
            ProjectPhase::SpecDraft => "spec_draft",
            ProjectPhase::SpecApproved => "spec_approved",
            ProjectPhase::PlanDraft => "plan_draft",
            ProjectPhase::PlanApproved => "plan_approved",
            ProjectPhase::TasksGenerated => "tasks_generated",
            ProjectPhase::Executing => "executing",
            ProjectPhase::Complete => "complete",
        }
    }
}

impl fmt::Display for ProjectPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Agent roles known to the engine.
///
/// `Coder` builds, `Qa` validates, `Planner` decides escalations and breaks
/// plans into tasks, `Distiller` writes the retrospective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Planner,
    Coder,
    Qa,
    Distiller,
}

impl AgentRole {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentRole::Planner => "planner",
            AgentRole::Coder => "coder",
            AgentRole::Qa => "qa",
            AgentRole::Distiller => "distiller",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status carried by every agent response envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Complete,
    Passed,
    Failed,
    Blocked,
}

impl AgentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentStatus::Complete => "complete",
            AgentStatus::Passed => "passed",
            AgentStatus::Failed => "failed",
            AgentStatus::Blocked => "blocked",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of implementation work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub state: TaskState,
    pub version: String,
    /// Execution order; lower runs first.
    #[serde(default)]
    pub order: i64,
    #[serde(default)]
    pub blocked_reason: Option<String>,
    #[serde(default)]
    pub escalation_id: Option<String>,
    #[serde(default)]
    pub attempt: u32,
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(id: impl Into<String>, title: impl Into<String>, version: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            acceptance_criteria: Vec::new(),
            state: TaskState::New,
            version: version.into(),
            order: 0,
            blocked_reason: None,
            escalation_id: None,
            attempt: 0,
            dependencies: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Record of a task routed to a higher-authority decision step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Escalation {
    /// `esc-{task_id}-{n}`, `n` counting escalations of that task from 1.
    pub id: String,
    pub task_id: String,
    pub from_role: AgentRole,
    /// `None` routes the escalation to a human.
    pub to_role: Option<AgentRole>,
    pub reason: String,
    #[serde(default)]
    pub resolved: bool,
    #[serde(default)]
    pub resolution: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Root aggregate persisted as `state.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectState {
    pub project_name: String,
    pub version: String,
    #[serde(default)]
    pub phase: ProjectPhase,
    #[serde(default)]
    pub spec_approved: bool,
    #[serde(default)]
    pub plan_approved: bool,
    #[serde(default)]
    pub tasks_approved: bool,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub escalations: Vec<Escalation>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProjectState {
    pub fn new(project_name: impl Into<String>, version: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            project_name: project_name.into(),
            version: version.into(),
            phase: ProjectPhase::Brainstorm,
            spec_approved: false,
            plan_approved: false,
            tasks_approved: false,
            tasks: Vec::new(),
            escalations: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == task_id)
    }

    pub fn task_mut(&mut self, task_id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|task| task.id == task_id)
    }

    pub fn escalation_mut(&mut self, escalation_id: &str) -> Option<&mut Escalation> {
        self.escalations
            .iter_mut()
            .find(|escalation| escalation.id == escalation_id)
    }

    /// The unresolved escalation for `task_id`, if any.
    pub fn open_escalation(&self, task_id: &str) -> Option<&Escalation> {
        self.escalations
            .iter()
            .find(|escalation| escalation.task_id == task_id && !escalation.resolved)
    }

    /// Number of escalations ever recorded for `task_id`.
    pub fn escalation_count(&self, task_id: &str) -> u32 {
        self.escalations
            .iter()
            .filter(|escalation| escalation.task_id == task_id)
            .count() as u32
    }

    pub fn count_in(&self, predicate: impl Fn(TaskState) -> bool) -> usize {
        self.tasks.iter().filter(|task| predicate(task.state)).count()
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// File change requested by the build agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileAction {
    Create,
    Edit,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOperation {
    pub action: FileAction,
    pub path: String,
    #[serde(default)]
    pub content: String,
}

/// Outcome of one workspace command. Timeouts and spawn failures are recorded
/// here with a non-zero exit code rather than raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub command: String,
    #[serde(default)]
    pub exit_code: i32,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
}

impl CommandResult {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input: u64,
    #[serde(default)]
    pub output: u64,
}

/// Append-only audit record of one agent invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLog {
    pub role: AgentRole,
    pub task_id: String,
    pub attempt: u32,
    /// Escalations recorded for the task when the invocation ran (0 = first pass).
    #[serde(default)]
    pub round: u32,
    pub status: AgentStatus,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub next_action: String,
    #[serde(default)]
    pub files_touched: Vec<String>,
    #[serde(default)]
    pub commands: Vec<CommandResult>,
    #[serde(default)]
    pub token_usage: TokenUsage,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub model_used: String,
    pub timestamp: DateTime<Utc>,
}
