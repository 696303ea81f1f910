//! Builders and fakes for tests: deterministic tasks and projects, a scripted
//! agent invoker, a scripted workspace and an on-disk project fixture.

use std::cell::RefCell;
use std::collections::VecDeque;

use chrono::Utc;
use tempfile::TempDir;

use crate::core::output::{
    AgentOutput, CoderOutput, DistillerOutput, Envelope, PlannerOutput, QaOutput, Resolution,
    Usage, Verdict,
};
use crate::core::types::{
    AgentRole, AgentStatus, CommandResult, FileAction, FileOperation, ProjectPhase, ProjectState,
    RunLog, Task, TaskState,
};
use crate::io::agent::{AgentInvoker, AgentRequest, Invocation};
use crate::io::config::ConductorConfig;
use crate::io::init::{HomePaths, ProjectPaths, init_project};
use crate::io::state_store::write_state;
use crate::io::workspace::{ApplyReport, Workspace};

/// Task with deterministic defaults.
pub fn task(id: &str, order: i64, state: TaskState, dependencies: &[&str]) -> Task {
    let mut task = Task::new(id, format!("{id} title"), "v1");
    task.description = format!("{id} description");
    task.order = order;
    task.state = state;
    task.dependencies = dependencies.iter().map(|dep| dep.to_string()).collect();
    task
}

/// Project in its default phase holding `tasks`. Only for pure selection tests.
pub fn project_with(tasks: Vec<Task>) -> ProjectState {
    let mut state = ProjectState::new("demo", "v1");
    state.tasks = tasks;
    state
}

/// Project in `executing` with every approval flag set.
pub fn executing_project(tasks: Vec<Task>) -> ProjectState {
    let mut state = project_with(tasks);
    state.phase = ProjectPhase::Executing;
    state.spec_approved = true;
    state.plan_approved = true;
    state.tasks_approved = true;
    state
}

pub fn run_log(task_id: &str, role: AgentRole, attempt: u32, status: AgentStatus) -> RunLog {
    RunLog {
        role,
        task_id: task_id.to_string(),
        attempt,
        round: 0,
        status,
        summary: format!("{role} attempt {attempt}"),
        next_action: String::new(),
        files_touched: Vec::new(),
        commands: Vec::new(),
        token_usage: Default::default(),
        duration_ms: 10,
        model_used: "test-model".to_string(),
        timestamp: Utc::now(),
    }
}

pub fn create_op(path: &str, content: &str) -> FileOperation {
    FileOperation {
        action: FileAction::Create,
        path: path.to_string(),
        content: content.to_string(),
    }
}

/// Coder response writing `path`.
pub fn coder_writes(path: &str) -> AgentOutput {
    let mut envelope = Envelope::new(AgentRole::Coder, AgentStatus::Complete, format!("wrote {path}"));
    envelope.files_touched = vec![path.to_string()];
    AgentOutput::Coder(CoderOutput {
        envelope,
        file_operations: vec![create_op(path, "content")],
        commands: Vec::new(),
    })
}

pub fn qa(verdict: Verdict, summary: &str) -> AgentOutput {
    let status = match verdict {
        Verdict::Pass => AgentStatus::Passed,
        Verdict::Blocked => AgentStatus::Blocked,
        _ => AgentStatus::Failed,
    };
    AgentOutput::Qa(QaOutput {
        envelope: Envelope::new(AgentRole::Qa, status, summary),
        verdict,
        violations: if verdict == Verdict::Fail {
            vec!["criterion not met".to_string()]
        } else {
            Vec::new()
        },
        notes: String::new(),
        commands_run: Vec::new(),
    })
}

pub fn qa_pass() -> AgentOutput {
    qa(Verdict::Pass, "all criteria met")
}

pub fn qa_fail() -> AgentOutput {
    qa(Verdict::Fail, "criteria not met")
}

pub fn planner(resolution: Option<Resolution>, summary: &str, guidance: &str) -> AgentOutput {
    AgentOutput::Planner(PlannerOutput {
        envelope: Envelope::new(AgentRole::Planner, AgentStatus::Complete, summary),
        artifact_content: String::new(),
        decisions: vec!["use the simpler approach".to_string()],
        resolution,
        guidance: guidance.to_string(),
    })
}

/// Planner response carrying a task breakdown.
pub fn planner_tasks(breakdown: &str) -> AgentOutput {
    AgentOutput::Planner(PlannerOutput {
        envelope: Envelope::new(AgentRole::Planner, AgentStatus::Complete, "split the plan"),
        artifact_content: breakdown.to_string(),
        decisions: Vec::new(),
        resolution: None,
        guidance: String::new(),
    })
}

pub fn distiller(retro: &str, lessons: &[&str]) -> AgentOutput {
    AgentOutput::Distiller(DistillerOutput {
        envelope: Envelope::new(AgentRole::Distiller, AgentStatus::Complete, "retro written"),
        retro_content: retro.to_string(),
        proposed_lessons: lessons.iter().map(|lesson| lesson.to_string()).collect(),
    })
}

/// Invoker that replays queued outputs in order and records every request.
///
/// When the queue runs dry it answers with a blocked output for the role.
#[derive(Debug, Default)]
pub struct ScriptedInvoker {
    responses: RefCell<VecDeque<AgentOutput>>,
    requests: RefCell<Vec<AgentRequest>>,
}

impl ScriptedInvoker {
    pub fn new(responses: impl IntoIterator<Item = AgentOutput>) -> Self {
        Self {
            responses: RefCell::new(responses.into_iter().collect()),
            requests: RefCell::default(),
        }
    }

    pub fn requests(&self) -> Vec<AgentRequest> {
        self.requests.borrow().clone()
    }

    pub fn remaining(&self) -> usize {
        self.responses.borrow().len()
    }
}

impl AgentInvoker for ScriptedInvoker {
    fn invoke(&self, request: &AgentRequest) -> Invocation {
        self.requests.borrow_mut().push(request.clone());
        let output = self
            .responses
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| AgentOutput::blocked(request.role, "no scripted response"));
        assert_eq!(
            output.role(),
            request.role,
            "scripted response does not match the requested role"
        );
        Invocation {
            output,
            usage: Usage {
                input_tokens: 100,
                output_tokens: 20,
            },
        }
    }
}

/// Workspace that touches nothing and records what it was asked to do.
#[derive(Debug, Default)]
pub struct ScriptedWorkspace {
    pub build_commands: Vec<String>,
    /// Exit code given to every command whose text contains the key.
    pub failing: Vec<(String, i32)>,
    /// Returned as the import dependency map.
    pub dependents: String,
    pub applied: RefCell<Vec<FileOperation>>,
    pub ran: RefCell<Vec<String>>,
}

impl ScriptedWorkspace {
    pub fn applied(&self) -> Vec<FileOperation> {
        self.applied.borrow().clone()
    }

    pub fn ran(&self) -> Vec<String> {
        self.ran.borrow().clone()
    }
}

impl Workspace for ScriptedWorkspace {
    fn apply(&self, operations: &[FileOperation]) -> ApplyReport {
        self.applied.borrow_mut().extend(operations.iter().cloned());
        ApplyReport {
            touched: operations.iter().map(|op| op.path.clone()).collect(),
            errors: Vec::new(),
        }
    }

    fn run(&self, commands: &[String]) -> Vec<CommandResult> {
        commands
            .iter()
            .map(|command| {
                self.ran.borrow_mut().push(command.clone());
                let exit_code = self
                    .failing
                    .iter()
                    .find(|(key, _)| command.contains(key.as_str()))
                    .map(|(_, code)| *code)
                    .unwrap_or(0);
                CommandResult {
                    command: command.clone(),
                    exit_code,
                    stdout: String::new(),
                    stderr: if exit_code == 0 {
                        String::new()
                    } else {
                        format!("{command} failed")
                    },
                }
            })
            .collect()
    }

    fn detect_build_commands(&self) -> Vec<String> {
        self.build_commands.clone()
    }

    fn file_tree(&self) -> String {
        "(empty, no files yet)".to_string()
    }

    fn read_sources(&self, _budget: usize) -> String {
        String::new()
    }

    fn dependents_map(&self) -> String {
        self.dependents.clone()
    }
}

/// A conductor home in a temp dir holding one project named `demo`.
pub struct TestProject {
    pub dir: TempDir,
    pub home: HomePaths,
    pub name: String,
}

impl TestProject {
    /// Fresh project in `brainstorm`.
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let home = HomePaths::new(dir.path());
        init_project(&home, "demo", "v1").expect("init project");
        Self {
            dir,
            home,
            name: "demo".to_string(),
        }
    }

    /// Project in `executing` with `tasks` and an approved spec on disk.
    pub fn executing(tasks: Vec<Task>) -> Self {
        let project = Self::new();
        let mut state = executing_project(tasks);
        state.project_name = project.name.clone();
        project.save(&state);
        let spec = project.paths().spec_path("v1");
        std::fs::create_dir_all(spec.parent().expect("spec dir")).expect("mkdir");
        std::fs::write(spec, "# Spec\n\nBuild the thing.\n").expect("write spec");
        project
    }

    pub fn paths(&self) -> ProjectPaths {
        self.home.project(&self.name)
    }

    pub fn save(&self, state: &ProjectState) {
        write_state(&self.paths().state_path, state).expect("write state");
    }

    pub fn state(&self) -> ProjectState {
        crate::io::state_store::load_state(&self.paths().state_path).expect("load state")
    }

    pub fn config(&self) -> ConductorConfig {
        ConductorConfig::default()
    }
}

impl Default for TestProject {
    fn default() -> Self {
        Self::new()
    }
}
