//! Running one task end to end, with escalation to the planner when the
//! attempt loop leaves it blocked.

use anyhow::{Result, anyhow};
use tracing::{info, instrument, warn};

use crate::attempt::{AFTER_ESCALATION, AttemptOutcome, run_attempts};
use crate::core::digest::escalation_context;
use crate::core::escalations::{open_escalation, resolve_escalation};
use crate::core::feedback::escalation_guidance;
use crate::core::output::Resolution;
use crate::core::task_machine::{block_task, transition_task};
use crate::core::types::{AgentRole, AgentStatus, ProjectState, TaskState};
use crate::engine::{Engine, LogSlot};
use crate::io::agent::AgentInvoker;
use crate::io::prompt::{PromptInputs, PromptKind};
use crate::io::workspace::Workspace;
use crate::reporter::Event;

/// How a task run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Done,
    /// Blocked with no escalation left to try.
    Blocked { reason: String },
    /// The planner handed the task to a human.
    HumanNeeded { reason: String },
    /// The planner gave no usable decision; the escalation stays open.
    EscalationUnresolved { reason: String },
}

impl TaskOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, TaskOutcome::Done)
    }
}

enum Decision {
    Retry(String),
    Stop(TaskOutcome),
}

/// Whether another escalation is allowed for `task_id` in this run.
fn may_escalate<A: AgentInvoker>(
    engine: &Engine<'_, A>,
    state: &ProjectState,
    task_id: &str,
    escalations_this_run: u32,
) -> bool {
    let cfg = &engine.config.engine;
    if escalations_this_run >= cfg.max_escalation_retries {
        return false;
    }
    if let Some(cap) = cfg.max_escalations_per_task
        && state.escalation_count(task_id) >= cap
    {
        return false;
    }
    state.open_escalation(task_id).is_none()
}

/// Run a `ready` task until it is done or no escalation can move it.
///
/// An error part way through blocks the task with the error as its reason
/// before it is returned, so the task never stays mid-attempt.
#[instrument(skip_all, fields(task_id))]
pub fn run_task<A: AgentInvoker, W: Workspace>(
    engine: &Engine<'_, A>,
    workspace: &W,
    state: &mut ProjectState,
    task_id: &str,
) -> Result<TaskOutcome> {
    drive_task(engine, workspace, state, task_id).inspect_err(|err| {
        abandon(engine, state, task_id, err);
    })
}

/// Block a task an error left mid-attempt. Best effort: failures are logged.
fn abandon<A: AgentInvoker>(
    engine: &Engine<'_, A>,
    state: &mut ProjectState,
    task_id: &str,
    err: &anyhow::Error,
) {
    let Some(task) = state.task_mut(task_id) else {
        return;
    };
    if !task.state.is_in_flight() {
        return;
    }
    let reason = format!("Attempt aborted: {err:#}");
    if let Err(block_err) = block_task(task, reason.clone()) {
        warn!(err = %block_err, "could not block aborted task");
        return;
    }
    state.touch();
    if let Err(save_err) = engine.save(state) {
        warn!(err = %format!("{save_err:#}"), "could not save aborted task");
    }
    engine.report(Event::TaskBlocked {
        task_id: task_id.to_string(),
        reason,
    });
}

fn drive_task<A: AgentInvoker, W: Workspace>(
    engine: &Engine<'_, A>,
    workspace: &W,
    state: &mut ProjectState,
    task_id: &str,
) -> Result<TaskOutcome> {
    let task = state
        .task_mut(task_id)
        .ok_or_else(|| anyhow!("unknown task {task_id}"))?;
    transition_task(task, TaskState::InProgress)?;
    let title = task.title.clone();
    state.touch();
    engine.save(state)?;
    engine.report(Event::TaskStarted {
        task_id: task_id.to_string(),
        title,
    });

    let mut outcome = run_attempts(engine, workspace, state, task_id, String::new(), "")?;
    let mut escalations = 0u32;
    loop {
        let reason = match outcome {
            AttemptOutcome::Passed => return Ok(TaskOutcome::Done),
            AttemptOutcome::Blocked { reason } => reason,
        };
        if !may_escalate(engine, state, task_id, escalations) {
            info!(escalations, "no escalation left");
            return Ok(TaskOutcome::Blocked { reason });
        }
        escalations += 1;

        match escalate(engine, workspace, state, task_id, &reason)? {
            Decision::Retry(guidance) => {
                outcome = run_attempts(
                    engine,
                    workspace,
                    state,
                    task_id,
                    guidance,
                    AFTER_ESCALATION,
                )?;
            }
            Decision::Stop(stop) => return Ok(stop),
        }
    }
}

/// Record an escalation, ask the planner, and apply its decision.
///
/// On `retry` the task is back `in_progress` when this returns.
fn escalate<A: AgentInvoker, W: Workspace>(
    engine: &Engine<'_, A>,
    workspace: &W,
    state: &mut ProjectState,
    task_id: &str,
    reason: &str,
) -> Result<Decision> {
    let escalation_id = open_escalation(
        state,
        task_id,
        AgentRole::Coder,
        Some(AgentRole::Planner),
        reason,
    )?;
    engine.save(state)?;
    info!(escalation_id = %escalation_id, "escalated to planner");
    engine.report(Event::EscalationOpened {
        task_id: task_id.to_string(),
        escalation_id: escalation_id.clone(),
    });

    let task = state
        .task(task_id)
        .cloned()
        .ok_or_else(|| anyhow!("unknown task {task_id}"))?;
    let history = engine.ledger.task_history(task_id)?;
    let context = escalation_context(&task, &history);
    let spec = engine.spec(state)?;
    let plan = engine.plan(state)?;
    let file_tree = workspace.file_tree();
    let prompt = engine.prompts.compose(
        PromptKind::Escalation,
        &PromptInputs {
            project: &state.project_name,
            version: &state.version,
            spec: &spec,
            plan: &plan,
            preferences: &engine.preferences,
            lessons: &engine.lessons,
            file_tree: &file_tree,
            extra_context: &context,
            ..PromptInputs::default()
        },
    )?;
    let call = engine.call_agent(AgentRole::Planner, prompt, task_id);
    engine.record(
        &call,
        LogSlot {
            task_id,
            attempt: task.attempt,
            round: state.escalation_count(task_id),
        },
        Vec::new(),
    )?;

    let planner = call.output.as_planner().cloned();
    let resolution = planner
        .as_ref()
        .filter(|planner| planner.envelope.status != AgentStatus::Blocked)
        .and_then(|planner| planner.resolution);

    match (resolution, planner) {
        (Some(Resolution::Retry), Some(planner)) => {
            resolve(engine, state, &escalation_id, planner.envelope.summary.clone());
            let task = state
                .task_mut(task_id)
                .ok_or_else(|| anyhow!("unknown task {task_id}"))?;
            transition_task(task, TaskState::Ready)?;
            transition_task(task, TaskState::InProgress)?;
            state.touch();
            engine.save(state)?;
            Ok(Decision::Retry(escalation_guidance(&planner)))
        }
        (Some(Resolution::HumanNeeded), Some(planner)) => {
            resolve(
                engine,
                state,
                &escalation_id,
                format!("Human needed: {}", planner.envelope.summary),
            );
            let reason = format!(
                "Planner: human intervention needed — {}",
                planner.guidance
            );
            if let Some(task) = state.task_mut(task_id) {
                task.blocked_reason = Some(reason.clone());
            }
            state.touch();
            engine.save(state)?;
            engine.report(Event::TaskBlocked {
                task_id: task_id.to_string(),
                reason: reason.clone(),
            });
            Ok(Decision::Stop(TaskOutcome::HumanNeeded { reason }))
        }
        (_, planner) => {
            let summary = planner
                .map(|planner| planner.envelope.summary)
                .unwrap_or_default();
            warn!(escalation_id = %escalation_id, "planner gave no usable resolution");
            let reason = format!(
                "Escalation {escalation_id} was not resolved ({summary}); human review recommended"
            );
            engine.report(Event::TaskBlocked {
                task_id: task_id.to_string(),
                reason: reason.clone(),
            });
            Ok(Decision::Stop(TaskOutcome::EscalationUnresolved { reason }))
        }
    }
}

fn resolve<A: AgentInvoker>(
    engine: &Engine<'_, A>,
    state: &mut ProjectState,
    escalation_id: &str,
    resolution: String,
) {
    if resolve_escalation(state, escalation_id, resolution.clone()) {
        engine.report(Event::EscalationResolved {
            escalation_id: escalation_id.to_string(),
            resolution,
        });
    }
}
