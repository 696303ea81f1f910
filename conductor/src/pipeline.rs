//! Run every eligible task in dependency order.

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::core::phase::transition_phase;
use crate::core::selector::{IdleState, Selection, select};
use crate::core::types::{ProjectPhase, ProjectState, Task};
use crate::engine::Engine;
use crate::escalation::{TaskOutcome, run_task};
use crate::io::agent::AgentInvoker;
use crate::io::workspace::Workspace;
use crate::reporter::Event;

/// Why the run loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineStop {
    /// Every task finished; the project is `complete`.
    Complete,
    /// These tasks were left mid-attempt; `conductor task` restarts them.
    Interrupted { tasks: Vec<String> },
    /// These tasks are blocked and wait on a human or `conductor task`.
    Blocked { tasks: Vec<String> },
    /// These ready tasks wait on dependencies that cannot finish.
    WaitingOnDependencies { tasks: Vec<String> },
    NothingToRun,
    /// A task did not finish and `stop_on_failure` is set.
    TaskFailed {
        task_id: String,
        outcome: TaskOutcome,
    },
    /// The confirmation callback declined to continue.
    Paused,
}

/// Move the project to `target` and report it. The caller saves.
pub fn advance_phase<A: AgentInvoker>(
    engine: &Engine<'_, A>,
    state: &mut ProjectState,
    target: ProjectPhase,
) -> Result<()> {
    let from = state.phase;
    transition_phase(state, target)?;
    engine.report(Event::PhaseChanged { from, to: target });
    Ok(())
}

/// Drive the project from `tasks_generated`/`executing` until nothing is runnable.
///
/// `confirm` is asked before every task after the first; returning `false`
/// pauses the run with state as last saved.
#[instrument(skip_all, fields(project = %state.project_name))]
pub fn run_pipeline<A: AgentInvoker, W: Workspace>(
    engine: &Engine<'_, A>,
    workspace: &W,
    state: &mut ProjectState,
    mut confirm: impl FnMut(&Task) -> bool,
) -> Result<PipelineStop> {
    if state.phase == ProjectPhase::TasksGenerated {
        advance_phase(engine, state, ProjectPhase::Executing)?;
        engine.save(state)?;
    }

    let mut ran = 0usize;
    loop {
        let task_id = match select(state) {
            Selection::Run(task_id) => task_id,
            Selection::Idle(IdleState::Complete) => {
                advance_phase(engine, state, ProjectPhase::Complete)?;
                engine.save(state)?;
                info!(ran, "all tasks finished");
                return Ok(PipelineStop::Complete);
            }
            Selection::Idle(IdleState::Interrupted(tasks)) => {
                warn!(tasks = %tasks.join(", "), "tasks left mid-attempt");
                return Ok(PipelineStop::Interrupted { tasks });
            }
            Selection::Idle(IdleState::Blocked(tasks)) => {
                return Ok(PipelineStop::Blocked { tasks });
            }
            Selection::Idle(IdleState::WaitingOnDependencies(tasks)) => {
                return Ok(PipelineStop::WaitingOnDependencies { tasks });
            }
            Selection::Idle(IdleState::NothingToRun) => return Ok(PipelineStop::NothingToRun),
        };

        if ran > 0
            && let Some(next) = state.task(&task_id)
            && !confirm(next)
        {
            info!(next = %task_id, "run paused before next task");
            return Ok(PipelineStop::Paused);
        }

        let outcome = run_task(engine, workspace, state, &task_id)?;
        ran += 1;
        if !outcome.is_done() && engine.config.engine.stop_on_failure {
            return Ok(PipelineStop::TaskFailed { task_id, outcome });
        }
    }
}
