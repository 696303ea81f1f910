//! Bounded build -> validate loop for one task.
//!
//! Each cycle asks the coder for changes, applies them, runs the requested
//! and detected build commands, then asks QA for a verdict. A failed verdict
//! feeds structured feedback into the next cycle until the attempt budget is
//! spent.

use anyhow::{Context, Result, anyhow};
use tracing::{info, instrument, warn};

use crate::core::digest::{change_diff, command_results};
use crate::core::feedback::validation_feedback;
use crate::core::output::{AgentOutput, QaOutput, Verdict};
use crate::core::task_machine::{block_task, transition_task};
use crate::core::types::{AgentRole, AgentStatus, CommandResult, ProjectState, Task, TaskState};
use crate::engine::{Engine, LogSlot};
use crate::io::agent::AgentInvoker;
use crate::io::prompt::{PromptInputs, PromptKind};
use crate::io::workspace::Workspace;
use crate::reporter::Event;

/// Blocked-reason suffix for the retry loop that follows an escalation.
pub const AFTER_ESCALATION: &str = " (after escalation)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// QA passed; the task is `done`.
    Passed,
    /// The task is `blocked` with `reason`.
    Blocked { reason: String },
}

enum QaDecision {
    Pass,
    Blocked(String),
    Fail,
}

fn decide(qa: &QaOutput) -> QaDecision {
    if qa.envelope.status == AgentStatus::Blocked || qa.verdict == Verdict::Blocked {
        let detail = if qa.notes.trim().is_empty() {
            qa.envelope.summary.clone()
        } else {
            qa.notes.clone()
        };
        return QaDecision::Blocked(detail);
    }
    match qa.verdict {
        Verdict::Pass => QaDecision::Pass,
        _ => QaDecision::Fail,
    }
}

fn current_task(state: &ProjectState, task_id: &str) -> Result<Task> {
    state
        .task(task_id)
        .cloned()
        .ok_or_else(|| anyhow!("unknown task {task_id}"))
}

fn move_task(state: &mut ProjectState, task_id: &str, target: TaskState) -> Result<()> {
    let task = state
        .task_mut(task_id)
        .ok_or_else(|| anyhow!("unknown task {task_id}"))?;
    transition_task(task, target)?;
    state.touch();
    Ok(())
}

fn block<A: AgentInvoker>(
    engine: &Engine<'_, A>,
    state: &mut ProjectState,
    task_id: &str,
    reason: String,
) -> Result<AttemptOutcome> {
    let task = state
        .task_mut(task_id)
        .ok_or_else(|| anyhow!("unknown task {task_id}"))?;
    block_task(task, reason.clone())?;
    state.touch();
    engine.save(state)?;
    warn!(task_id, reason = %reason, "task blocked");
    engine.report(Event::TaskBlocked {
        task_id: task_id.to_string(),
        reason: reason.clone(),
    });
    Ok(AttemptOutcome::Blocked { reason })
}

/// Apply problems surface to QA and the ledger as failed commands.
fn apply_failures(errors: &[String]) -> Vec<CommandResult> {
    errors
        .iter()
        .map(|error| CommandResult {
            command: "apply file operations".to_string(),
            exit_code: 1,
            stdout: String::new(),
            stderr: error.clone(),
        })
        .collect()
}

/// Drive `task_id`, which must be `in_progress`, through up to
/// `engine.max_attempts` build/validate cycles.
///
/// `prior_feedback` seeds the first coder prompt. `label` is appended to the
/// blocked reason only. State is saved after every transition.
#[instrument(skip_all, fields(task_id, label))]
pub fn run_attempts<A: AgentInvoker, W: Workspace>(
    engine: &Engine<'_, A>,
    workspace: &W,
    state: &mut ProjectState,
    task_id: &str,
    prior_feedback: String,
    label: &str,
) -> Result<AttemptOutcome> {
    let max_attempts = engine.config.engine.max_attempts.max(1);
    let spec = engine.spec(state)?;
    let plan = engine.plan(state)?;
    let mut feedback = prior_feedback;
    let mut cycle = 0u32;

    loop {
        cycle += 1;
        let task = current_task(state, task_id)?;
        if task.state != TaskState::InProgress {
            return Err(anyhow!(
                "task {task_id} must be in_progress to attempt, found {}",
                task.state
            ));
        }
        let round = state.escalation_count(task_id);
        let slot = LogSlot {
            task_id,
            attempt: task.attempt,
            round,
        };
        info!(cycle, attempt = task.attempt, round, "attempt started");
        engine.report(Event::AttemptStarted {
            task_id: task_id.to_string(),
            attempt: task.attempt,
            round,
        });

        let file_tree = workspace.file_tree();
        let sources = workspace.read_sources(engine.config.engine.source_budget_bytes);
        let dependents = workspace.dependents_map();
        let prompt = engine.prompts.compose(
            PromptKind::Coder,
            &PromptInputs {
                project: &state.project_name,
                version: &state.version,
                task: Some(&task),
                spec: &spec,
                plan: &plan,
                preferences: &engine.preferences,
                lessons: &engine.lessons,
                file_tree: &file_tree,
                sources: &sources,
                dependents: &dependents,
                prior_feedback: &feedback,
                ..PromptInputs::default()
            },
        )?;
        let call = engine.call_agent(AgentRole::Coder, prompt, task_id);
        let coder = match &call.output {
            AgentOutput::Coder(coder) if coder.envelope.status != AgentStatus::Blocked => {
                coder.clone()
            }
            _ => {
                engine.record(&call, slot, Vec::new())?;
                return block(
                    engine,
                    state,
                    task_id,
                    format!("Build agent could not complete the task{label}"),
                );
            }
        };

        let applied = workspace.apply(&coder.file_operations);
        let mut results = apply_failures(&applied.errors);
        results.extend(workspace.run(&coder.commands));
        engine.record(&call, slot, results.clone())?;

        move_task(state, task_id, TaskState::InReview)?;
        engine.save(state)?;
        let build_results = workspace.run(&workspace.detect_build_commands());
        results.extend(build_results.iter().cloned());
        move_task(state, task_id, TaskState::InQa)?;
        engine.save(state)?;

        let task = current_task(state, task_id)?;
        let diff = change_diff(&coder.file_operations);
        let results_text = command_results(&results);
        let prompt = engine.prompts.compose(
            PromptKind::Qa,
            &PromptInputs {
                project: &state.project_name,
                version: &state.version,
                task: Some(&task),
                spec: &spec,
                preferences: &engine.preferences,
                lessons: &engine.lessons,
                diff: &diff,
                command_results: &results_text,
                ..PromptInputs::default()
            },
        )?;
        let call = engine.call_agent(AgentRole::Qa, prompt, task_id);
        engine.record(&call, slot, build_results)?;
        let qa = call
            .output
            .as_qa()
            .cloned()
            .context("validation agent returned a non-qa response")?;

        match decide(&qa) {
            QaDecision::Pass => {
                move_task(state, task_id, TaskState::Done)?;
                engine.save(state)?;
                info!("task passed validation");
                engine.report(Event::TaskDone {
                    task_id: task_id.to_string(),
                });
                return Ok(AttemptOutcome::Passed);
            }
            QaDecision::Blocked(detail) => {
                return block(
                    engine,
                    state,
                    task_id,
                    format!("Validation blocked: {detail}"),
                );
            }
            QaDecision::Fail if cycle < max_attempts => {
                engine.report(Event::ValidationFailed {
                    task_id: task_id.to_string(),
                    attempt: task.attempt,
                    attempts_left: max_attempts - cycle,
                });
                feedback = validation_feedback(&qa, &results);
                move_task(state, task_id, TaskState::InProgress)?;
                engine.save(state)?;
            }
            QaDecision::Fail => {
                return block(
                    engine,
                    state,
                    task_id,
                    format!("Failed validation after {max_attempts} attempts{label}"),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::output::Envelope;

    fn qa(status: AgentStatus, verdict: Verdict, notes: &str) -> QaOutput {
        QaOutput {
            envelope: Envelope::new(AgentRole::Qa, status, "qa summary"),
            verdict,
            violations: Vec::new(),
            notes: notes.to_string(),
            commands_run: Vec::new(),
        }
    }

    #[test]
    fn blocked_status_or_verdict_blocks() {
        assert!(matches!(
            decide(&qa(AgentStatus::Blocked, Verdict::Unknown, "")),
            QaDecision::Blocked(detail) if detail == "qa summary"
        ));
        assert!(matches!(
            decide(&qa(AgentStatus::Failed, Verdict::Blocked, "contradicts spec")),
            QaDecision::Blocked(detail) if detail == "contradicts spec"
        ));
    }

    #[test]
    fn only_pass_passes() {
        assert!(matches!(
            decide(&qa(AgentStatus::Passed, Verdict::Pass, "")),
            QaDecision::Pass
        ));
        assert!(matches!(
            decide(&qa(AgentStatus::Failed, Verdict::Fail, "")),
            QaDecision::Fail
        ));
        assert!(matches!(
            decide(&qa(AgentStatus::Passed, Verdict::Unknown, "")),
            QaDecision::Fail
        ));
    }

    #[test]
    fn apply_errors_become_failed_commands() {
        let results = apply_failures(&["refused path outside the workspace: ../x".to_string()]);
        assert_eq!(results.len(), 1);
        assert!(!results[0].succeeded());
        assert!(results[0].stderr.contains("../x"));
    }
}
