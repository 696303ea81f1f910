//! The command surface: one method per `conductor` subcommand.
//!
//! Each command loads the project state, checks its preconditions before
//! touching anything, then mutates and saves. Precondition failures leave the
//! state exactly as it was on disk.

use std::fs;
use std::path::Path;

use anyhow::{Context, anyhow};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::core::error::TransitionError;
use crate::core::escalations::resolve_escalation;
use crate::core::phase::transition_phase;
use crate::core::selector::{all_tasks_done, dependencies_satisfied};
use crate::core::task_machine::{block_task, transition_task};
use crate::core::types::{AgentRole, AgentStatus, ProjectPhase, ProjectState, Task, TaskState};
use crate::engine::{Engine, LogSlot};
use crate::escalation::{TaskOutcome, run_task};
use crate::exit_codes;
use crate::io::agent::AgentInvoker;
use crate::io::artifacts::{
    load_lessons, parse_task_breakdown, read_artifact, render_task_breakdown, write_artifact,
};
use crate::io::config::{ConductorConfig, load_config};
use crate::io::init::{HomePaths, ProjectPaths, init_project, validate_project_name};
use crate::io::preferences::{merge_preferences, render_preferences};
use crate::io::prompt::{PromptInputs, PromptKind};
use crate::io::state_store::{load_state, write_state};
use crate::io::workspace::Workspace;
use crate::pipeline::{PipelineStop, run_pipeline};
use crate::reporter::{Event, Reporter};
use crate::retro::{RetroReport, run_retrospective};
use crate::status::{StatusSnapshot, snapshot};

#[derive(Debug, Error)]
pub enum CommandError {
    /// The project is not in a state where the command makes sense.
    #[error("{0}")]
    Precondition(String),
    #[error("task '{task_id}' not found in project '{project}'")]
    TaskNotFound { project: String, task_id: String },
    #[error("project '{0}' not found")]
    ProjectNotFound(String),
    #[error("project '{0}' already exists")]
    ProjectExists(String),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CommandError {
    pub fn exit_code(&self) -> i32 {
        exit_codes::INVALID
    }
}

type CmdResult<T> = Result<T, CommandError>;

/// What `run` did.
#[derive(Debug)]
pub struct RunReport {
    pub stop: PipelineStop,
    /// Present when the project completed and the retrospective ran.
    pub retro: Option<RetroReport>,
}

/// Commands bound to one conductor home.
pub struct Conductor<'r> {
    pub home: HomePaths,
    pub config: ConductorConfig,
    reporter: &'r dyn Reporter,
}

impl<'r> Conductor<'r> {
    pub fn new(home: HomePaths, config: ConductorConfig, reporter: &'r dyn Reporter) -> Self {
        Self {
            home,
            config,
            reporter,
        }
    }

    /// Load `conductor.toml` from `home_root`, falling back to defaults.
    pub fn open(home_root: &Path, reporter: &'r dyn Reporter) -> CmdResult<Self> {
        let home = HomePaths::new(home_root);
        let config = load_config(&home.config_path)?;
        Ok(Self::new(home, config, reporter))
    }

    pub fn project_paths(&self, name: &str) -> ProjectPaths {
        self.home.project(name)
    }

    fn load(&self, name: &str) -> CmdResult<(ProjectPaths, ProjectState)> {
        validate_project_name(name).map_err(|_| CommandError::ProjectNotFound(name.to_string()))?;
        let paths = self.home.project(name);
        if !paths.exists() {
            return Err(CommandError::ProjectNotFound(name.to_string()));
        }
        let state = load_state(&paths.state_path)?;
        Ok((paths, state))
    }

    fn save(&self, paths: &ProjectPaths, state: &ProjectState) -> CmdResult<()> {
        write_state(&paths.state_path, state)?;
        Ok(())
    }

    fn advance(&self, state: &mut ProjectState, target: ProjectPhase) -> CmdResult<()> {
        let from = state.phase;
        transition_phase(state, target)?;
        self.reporter.report(Event::PhaseChanged { from, to: target });
        Ok(())
    }

    fn engine<'a, A: AgentInvoker>(
        &'a self,
        paths: ProjectPaths,
        invoker: &'a A,
    ) -> CmdResult<Engine<'a, A>> {
        let preferences =
            merge_preferences(&self.home.preferences_path, &paths.preferences_path)
                .map_err(|err| CommandError::Precondition(format!("{err:#}")))?;
        let preferences = render_preferences(&preferences)?;
        let lessons = load_lessons(&self.home.lessons_dir)?;
        Ok(Engine::new(paths, self.config.clone(), invoker, self.reporter)?
            .with_preferences(preferences)
            .with_lessons(lessons))
    }

    /// `conductor new`: scaffold a project in `brainstorm`.
    #[instrument(skip_all, fields(project = name, version))]
    pub fn create_project(&self, name: &str, version: &str) -> CmdResult<ProjectState> {
        validate_project_name(version)
            .map_err(|_| CommandError::Precondition(format!("invalid version label '{version}'")))?;
        if self.home.project(name).root.exists() {
            return Err(CommandError::ProjectExists(name.to_string()));
        }
        let state = init_project(&self.home, name, version)?;
        self.reporter.report(Event::Notice(format!(
            "created project {name} ({version}) in phase {}",
            state.phase
        )));
        Ok(state)
    }

    /// `conductor approve`: advance one approval step.
    ///
    /// `artifact` is stored as the document the step approves (brainstorm
    /// notes, spec or plan) before the phase moves.
    #[instrument(skip_all, fields(project = name))]
    pub fn approve_phase(&self, name: &str, artifact: Option<&Path>) -> CmdResult<ProjectPhase> {
        let (paths, mut state) = self.load(name)?;
        let provided = artifact
            .map(|path| {
                fs::read_to_string(path).with_context(|| format!("read artifact {}", path.display()))
            })
            .transpose()?;
        let version = state.version.clone();

        let (target, document) = match state.phase {
            ProjectPhase::Brainstorm => (ProjectPhase::SpecDraft, paths.brainstorm_path(&version)),
            ProjectPhase::SpecDraft => (ProjectPhase::SpecApproved, paths.spec_path(&version)),
            ProjectPhase::SpecApproved => (ProjectPhase::PlanDraft, paths.plan_path(&version)),
            ProjectPhase::PlanDraft => (ProjectPhase::PlanApproved, paths.plan_path(&version)),
            ProjectPhase::PlanApproved => {
                return Err(CommandError::Precondition(format!(
                    "plan is approved; run `conductor tasks {name}` to generate tasks"
                )));
            }
            ProjectPhase::TasksGenerated | ProjectPhase::Executing => {
                return Err(CommandError::Precondition(format!(
                    "tasks are approved; run `conductor run {name}` to execute them"
                )));
            }
            ProjectPhase::Complete => {
                return Err(CommandError::Precondition(format!(
                    "project is complete; run `conductor retro {name}` for the retrospective"
                )));
            }
        };

        let requires_document =
            matches!(target, ProjectPhase::SpecApproved | ProjectPhase::PlanApproved);
        if requires_document && provided.is_none() && read_artifact(&document)?.is_none() {
            return Err(CommandError::Precondition(format!(
                "nothing to approve: no document at {}; pass --artifact FILE",
                document.display()
            )));
        }
        if let Some(contents) = &provided {
            write_artifact(&document, contents)?;
            info!(path = %document.display(), "artifact stored");
        }

        self.advance(&mut state, target)?;
        self.save(&paths, &state)?;
        Ok(target)
    }

    /// `conductor tasks`: create the task list from a breakdown document or the planner.
    #[instrument(skip_all, fields(project = name))]
    pub fn generate_tasks<A: AgentInvoker>(
        &self,
        name: &str,
        from: Option<&Path>,
        invoker: &A,
    ) -> CmdResult<Vec<Task>> {
        let (paths, mut state) = self.load(name)?;
        if state.phase > ProjectPhase::PlanApproved {
            return Err(CommandError::Precondition(format!(
                "tasks for {} are already generated and locked (phase {})",
                state.version, state.phase
            )));
        }
        if state.phase != ProjectPhase::PlanApproved || !state.plan_approved {
            return Err(CommandError::Precondition(format!(
                "the plan must be approved before generating tasks (phase {})",
                state.phase
            )));
        }

        let text = match from {
            Some(path) => fs::read_to_string(path)
                .with_context(|| format!("read task breakdown {}", path.display()))?,
            None => self.plan_tasks(&paths, &state, invoker)?,
        };
        let mut tasks = parse_task_breakdown(&text, &state.version)
            .map_err(|err| CommandError::Precondition(format!("{err:#}")))?;

        write_artifact(
            &paths.tasks_path(&state.version),
            &render_task_breakdown(&tasks)?,
        )?;
        for task in &mut tasks {
            transition_task(task, TaskState::Ready)?;
        }
        state.tasks = tasks.clone();
        self.advance(&mut state, ProjectPhase::TasksGenerated)?;
        self.save(&paths, &state)?;
        self.reporter.report(Event::Notice(format!(
            "generated {} tasks for {}",
            tasks.len(),
            state.version
        )));
        Ok(tasks)
    }

    fn plan_tasks<A: AgentInvoker>(
        &self,
        paths: &ProjectPaths,
        state: &ProjectState,
        invoker: &A,
    ) -> CmdResult<String> {
        let engine = self.engine(paths.clone(), invoker)?;
        let spec = engine.spec(state)?;
        let plan = engine.plan(state)?;
        let prompt = engine.prompts.compose(
            PromptKind::Tasks,
            &PromptInputs {
                project: &state.project_name,
                version: &state.version,
                spec: &spec,
                plan: &plan,
                preferences: &engine.preferences,
                lessons: &engine.lessons,
                ..PromptInputs::default()
            },
        )?;
        let slot_id = format!("{}-tasks", state.version);
        let call = engine.call_agent(AgentRole::Planner, prompt, &slot_id);
        engine.record(
            &call,
            LogSlot {
                task_id: &slot_id,
                attempt: 0,
                round: 0,
            },
            Vec::new(),
        )?;
        match call.output.as_planner() {
            Some(planner)
                if planner.envelope.status != AgentStatus::Blocked
                    && !planner.artifact_content.trim().is_empty() =>
            {
                Ok(planner.artifact_content.clone())
            }
            _ => Err(CommandError::Other(anyhow!(
                "planner could not generate tasks: {}",
                call.output.envelope().summary
            ))),
        }
    }

    fn require_executable(&self, state: &ProjectState) -> CmdResult<()> {
        let executable = matches!(
            state.phase,
            ProjectPhase::TasksGenerated | ProjectPhase::Executing
        );
        if !executable || !state.tasks_approved {
            return Err(CommandError::Precondition(format!(
                "tasks must be generated and approved before running (phase {})",
                state.phase
            )));
        }
        Ok(())
    }

    /// `conductor run`: run every eligible task, then the retrospective when configured.
    #[instrument(skip_all, fields(project = name))]
    pub fn run_all<A: AgentInvoker, W: Workspace>(
        &self,
        name: &str,
        invoker: &A,
        workspace: &W,
        confirm: impl FnMut(&Task) -> bool,
    ) -> CmdResult<RunReport> {
        let (paths, mut state) = self.load(name)?;
        if state.phase == ProjectPhase::Complete {
            self.reporter
                .report(Event::Notice(format!("project {name} is already complete")));
            return Ok(RunReport {
                stop: PipelineStop::Complete,
                retro: None,
            });
        }
        self.require_executable(&state)?;

        let engine = self.engine(paths, invoker)?;
        let stop = run_pipeline(&engine, workspace, &mut state, confirm)?;
        let retro = if stop == PipelineStop::Complete && self.config.engine.retro_on_complete {
            match run_retrospective(&engine, &state, &self.home.lessons_dir) {
                Ok(report) => Some(report),
                Err(err) => {
                    warn!(err = %format!("{err:#}"), "retrospective failed");
                    self.reporter.report(Event::Notice(format!(
                        "retrospective failed: {err:#}; rerun with `conductor retro {name}`"
                    )));
                    None
                }
            }
        } else {
            None
        };
        Ok(RunReport { stop, retro })
    }

    /// `conductor task`: run one task by id. A blocked task is reset first;
    /// its open escalation, if any, is closed as superseded. A task left
    /// mid-attempt by an interrupted run is blocked and reset the same way.
    #[instrument(skip_all, fields(project = name, task_id))]
    pub fn run_single<A: AgentInvoker, W: Workspace>(
        &self,
        name: &str,
        task_id: &str,
        invoker: &A,
        workspace: &W,
    ) -> CmdResult<TaskOutcome> {
        let (paths, mut state) = self.load(name)?;
        self.require_executable(&state)?;
        let Some(task) = state.task(task_id) else {
            return Err(CommandError::TaskNotFound {
                project: name.to_string(),
                task_id: task_id.to_string(),
            });
        };
        let runnable = matches!(task.state, TaskState::Ready | TaskState::Blocked)
            || task.state.is_in_flight();
        if !runnable {
            return Err(CommandError::Precondition(format!(
                "task {task_id} is {}; only ready, blocked or interrupted tasks can be run",
                task.state
            )));
        }
        if !dependencies_satisfied(&state, task) {
            return Err(CommandError::Precondition(format!(
                "task {task_id} waits on unfinished dependencies: {}",
                task.dependencies.join(", ")
            )));
        }

        let engine = self.engine(paths, invoker)?;
        if state.phase == ProjectPhase::TasksGenerated {
            self.advance(&mut state, ProjectPhase::Executing)?;
        }
        if let Some(task) = state.task_mut(task_id)
            && task.state.is_in_flight()
        {
            let reason = format!("Interrupted attempt (left {})", task.state);
            warn!(task_id, reason = %reason, "restarting interrupted task");
            block_task(task, reason)?;
        }
        if state.task(task_id).is_some_and(|t| t.state == TaskState::Blocked) {
            if let Some(open) = state.open_escalation(task_id).map(|e| e.id.clone()) {
                resolve_escalation(&mut state, &open, "Superseded by manual retry");
            }
            if let Some(task) = state.task_mut(task_id) {
                transition_task(task, TaskState::Ready)?;
            }
            state.touch();
        }
        engine.save(&state)?;

        let outcome = run_task(&engine, workspace, &mut state, task_id)?;
        if outcome.is_done() && all_tasks_done(&state) {
            self.advance(&mut state, ProjectPhase::Complete)?;
            engine.save(&state)?;
        }
        Ok(outcome)
    }

    /// `conductor status`.
    pub fn status(&self, name: &str) -> CmdResult<StatusSnapshot> {
        let (_, state) = self.load(name)?;
        Ok(snapshot(&state))
    }

    /// `conductor retro`: requires a completed project.
    #[instrument(skip_all, fields(project = name))]
    pub fn retrospective<A: AgentInvoker>(
        &self,
        name: &str,
        invoker: &A,
    ) -> CmdResult<RetroReport> {
        let (paths, state) = self.load(name)?;
        if state.phase != ProjectPhase::Complete {
            return Err(CommandError::Precondition(format!(
                "retrospective needs a complete project (phase {})",
                state.phase
            )));
        }
        let engine = self.engine(paths, invoker)?;
        Ok(run_retrospective(&engine, &state, &self.home.lessons_dir)?)
    }
}
