//! Text digests handed to agents: change diffs, command results, escalation
//! history and the retrospective summary.
//!
//! Lengths are counted in characters, never bytes, so multi-byte output is
//! never split mid-character.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::core::types::{
    AgentStatus, CommandResult, FileAction, FileOperation, ProjectState, RunLog, Task, TaskState,
};

/// Largest file body shown in a change diff.
pub const DIFF_CONTENT_LIMIT: usize = 3000;
/// Tail of each stream shown with command results.
pub const COMMAND_RESULT_TAIL: usize = 1500;
/// Head of a failing command's stderr shown in escalation context.
pub const ESCALATION_STDERR_HEAD: usize = 500;

/// First `max_chars` characters of `text`.
pub fn head(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Last `max_chars` characters of `text`.
pub fn tail(text: &str, max_chars: usize) -> &str {
    let total = text.chars().count();
    if total <= max_chars {
        return text;
    }
    match text.char_indices().nth(total - max_chars) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}

/// Readable summary of the builder's file operations.
pub fn change_diff(operations: &[FileOperation]) -> String {
    if operations.is_empty() {
        return "(no file changes)".to_string();
    }
    let parts: Vec<String> = operations
        .iter()
        .map(|op| match op.action {
            FileAction::Delete => format!("--- DELETED: {} ---", op.path),
            FileAction::Create | FileAction::Edit => {
                let label = if op.action == FileAction::Create {
                    "NEW FILE"
                } else {
                    "MODIFIED"
                };
                let total = op.content.chars().count();
                let body = if total > DIFF_CONTENT_LIMIT {
                    format!(
                        "{}\n... (truncated, {total} chars total)",
                        head(&op.content, DIFF_CONTENT_LIMIT)
                    )
                } else {
                    op.content.clone()
                };
                format!("--- {label}: {} ---\n{body}", op.path)
            }
        })
        .collect();
    parts.join("\n\n")
}

pub fn command_results(results: &[CommandResult]) -> String {
    if results.is_empty() {
        return "(no commands were run)".to_string();
    }
    let parts: Vec<String> = results
        .iter()
        .map(|result| {
            let mut block = format!("$ {}  ->  exit {}", result.command, result.exit_code);
            if !result.stdout.is_empty() {
                let _ = write!(block, "\nstdout:\n{}", tail(&result.stdout, COMMAND_RESULT_TAIL));
            }
            if !result.stderr.is_empty() {
                let _ = write!(block, "\nstderr:\n{}", tail(&result.stderr, COMMAND_RESULT_TAIL));
            }
            block
        })
        .collect();
    parts.join("\n\n")
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Task details plus its full run history, for the escalation decision.
pub fn escalation_context(task: &Task, history: &[RunLog]) -> String {
    let mut parts = vec![
        format!("## Escalation: Task {}", task.id),
        format!("\n**Title:** {}", task.title),
        format!("**Description:** {}", task.description),
        format!("**Attempts used:** {}", task.attempt),
        format!(
            "**Blocked reason:** {}",
            task.blocked_reason.as_deref().unwrap_or("Max attempts reached")
        ),
    ];
    if !task.acceptance_criteria.is_empty() {
        let criteria: Vec<String> = task
            .acceptance_criteria
            .iter()
            .map(|criterion| format!("  - {criterion}"))
            .collect();
        parts.push(format!("\n**Acceptance Criteria:**\n{}", criteria.join("\n")));
    }
    if !history.is_empty() {
        parts.push("\n## Attempt History\n".to_string());
        for log in history {
            let round = if log.round > 0 {
                format!(", round {}", log.round)
            } else {
                String::new()
            };
            parts.push(format!(
                "### {} (attempt {}{round})\n- **Status:** {}\n- **Summary:** {}",
                title_case(log.role.as_str()),
                log.attempt,
                log.status,
                log.summary
            ));
            for command in log.commands.iter().filter(|command| !command.succeeded()) {
                parts.push(format!(
                    "- **Failed command:** `{}` -> exit {}",
                    command.command, command.exit_code
                ));
                if !command.stderr.is_empty() {
                    parts.push(format!(
                        "  ```\n  {}\n  ```",
                        head(&command.stderr, ESCALATION_STDERR_HEAD)
                    ));
                }
            }
            parts.push(String::new());
        }
    }
    parts.join("\n")
}

/// Project-wide summary for the retrospective pass.
pub fn retro_context(state: &ProjectState, logs: &[RunLog], existing_lessons: &[String]) -> String {
    let mut parts = vec!["## Task Summary\n".to_string()];
    let done = state.count_in(TaskState::is_finished);
    let blocked = state.count_in(|s| s == TaskState::Blocked);
    let total_attempts: u32 = state.tasks.iter().map(|task| task.attempt).sum();
    parts.push(format!("- Total tasks: {}", state.tasks.len()));
    parts.push(format!("- Completed: {done}"));
    parts.push(format!("- Blocked: {blocked}"));
    parts.push(format!(
        "- Total retry attempts across all tasks: {total_attempts}"
    ));
    parts.push(String::new());

    for task in &state.tasks {
        let mark = match task.state {
            TaskState::Done | TaskState::Archived => "x",
            TaskState::Blocked => "!",
            _ => " ",
        };
        parts.push(format!(
            "- [{mark}] {}: {} (attempts: {}, state: {})",
            task.id, task.title, task.attempt, task.state
        ));
        if let Some(reason) = &task.blocked_reason {
            parts.push(format!("  Blocked: {reason}"));
        }
    }

    if !state.escalations.is_empty() {
        parts.push("\n## Escalations\n".to_string());
        for escalation in &state.escalations {
            let label = if escalation.resolved {
                "resolved"
            } else {
                "unresolved"
            };
            parts.push(format!(
                "- {}: {} [{label}]",
                escalation.id, escalation.reason
            ));
            if !escalation.resolution.is_empty() {
                parts.push(format!("  Resolution: {}", escalation.resolution));
            }
        }
    }

    if !logs.is_empty() {
        parts.push("\n## Run Log Summary\n".to_string());
        let input: u64 = logs.iter().map(|log| log.token_usage.input).sum();
        let output: u64 = logs.iter().map(|log| log.token_usage.output).sum();
        let duration_ms: u64 = logs.iter().map(|log| log.duration_ms).sum();
        parts.push(format!("- Total agent calls: {}", logs.len()));
        parts.push(format!("- Total tokens: ~{input} input, ~{output} output"));
        parts.push(format!(
            "- Total duration: {:.1}s",
            duration_ms as f64 / 1000.0
        ));
        let mut by_role: BTreeMap<&str, usize> = BTreeMap::new();
        for log in logs {
            *by_role.entry(log.role.as_str()).or_default() += 1;
        }
        let counts: Vec<String> = by_role
            .iter()
            .map(|(role, count)| format!("{role}: {count}"))
            .collect();
        parts.push(format!("- Calls by role: {}", counts.join(", ")));

        let unsuccessful: Vec<&RunLog> = logs
            .iter()
            .filter(|log| matches!(log.status, AgentStatus::Failed | AgentStatus::Blocked))
            .collect();
        if !unsuccessful.is_empty() {
            parts.push(format!(
                "\n### Failed/Blocked Invocations ({}):\n",
                unsuccessful.len()
            ));
            for log in unsuccessful {
                parts.push(format!(
                    "- {} / {} (attempt {}): {}",
                    log.task_id,
                    log.role,
                    log.attempt,
                    head(&log.summary, 150)
                ));
            }
        }
    }

    if !existing_lessons.is_empty() {
        parts.push("\n## Existing Lessons (do NOT duplicate)\n".to_string());
        for (idx, lesson) in existing_lessons.iter().enumerate() {
            parts.push(format!("{}. {}", idx + 1, head(lesson, 200)));
        }
    }

    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{AgentRole, TokenUsage};
    use crate::test_support::{executing_project, run_log, task};

    #[test]
    fn head_and_tail_respect_char_boundaries() {
        let text = "héllo wörld";
        assert_eq!(head(text, 2), "hé");
        assert_eq!(tail(text, 3), "rld");
        assert_eq!(tail(text, 5), "wörld");
        assert_eq!(head(text, 100), text);
        assert_eq!(tail(text, 100), text);
    }

    #[test]
    fn change_diff_labels_and_truncates() {
        let long = "x".repeat(DIFF_CONTENT_LIMIT + 10);
        let diff = change_diff(&[
            FileOperation {
                action: FileAction::Create,
                path: "a.rs".to_string(),
                content: "fn a() {}".to_string(),
            },
            FileOperation {
                action: FileAction::Edit,
                path: "b.rs".to_string(),
                content: long,
            },
            FileOperation {
                action: FileAction::Delete,
                path: "c.rs".to_string(),
                content: String::new(),
            },
        ]);
        assert!(diff.contains("--- NEW FILE: a.rs ---\nfn a() {}"));
        assert!(diff.contains("--- MODIFIED: b.rs ---"));
        assert!(diff.contains("(truncated, 3010 chars total)"));
        assert!(diff.contains("--- DELETED: c.rs ---"));
        assert_eq!(change_diff(&[]), "(no file changes)");
    }

    #[test]
    fn command_results_show_tails() {
        let rendered = command_results(&[CommandResult {
            command: "cargo build".to_string(),
            exit_code: 101,
            stdout: String::new(),
            stderr: format!("{}error[E0425]", "a".repeat(5000)),
        }]);
        assert!(rendered.starts_with("$ cargo build  ->  exit 101"));
        assert!(rendered.ends_with("error[E0425]"));
        assert!(!rendered.contains("stdout:"));
        assert_eq!(command_results(&[]), "(no commands were run)");
    }

    #[test]
    fn escalation_context_lists_history_and_failed_commands() {
        let mut blocked = task("T1", 1, TaskState::Blocked, &[]);
        blocked.acceptance_criteria = vec!["compiles".to_string()];
        blocked.blocked_reason = Some("Failed validation after 3 attempts".to_string());
        let mut coder = run_log("T1", AgentRole::Coder, 0, AgentStatus::Complete);
        coder.commands.push(CommandResult {
            command: "npm run build".to_string(),
            exit_code: 2,
            stdout: String::new(),
            stderr: "Cannot find module './x'".to_string(),
        });
        let qa = run_log("T1", AgentRole::Qa, 0, AgentStatus::Failed);

        let context = escalation_context(&blocked, &[coder, qa]);
        assert!(context.contains("## Escalation: Task T1"));
        assert!(context.contains("**Blocked reason:** Failed validation after 3 attempts"));
        assert!(context.contains("  - compiles"));
        assert!(context.contains("### Coder (attempt 0)"));
        assert!(context.contains("### Qa (attempt 0)"));
        assert!(context.contains("`npm run build` -> exit 2"));
        assert!(context.contains("Cannot find module './x'"));
    }

    #[test]
    fn retro_context_aggregates_logs() {
        let state = executing_project(vec![
            task("T1", 1, TaskState::Done, &[]),
            task("T2", 2, TaskState::Blocked, &[]),
        ]);
        let mut first = run_log("T1", AgentRole::Coder, 0, AgentStatus::Complete);
        first.token_usage = TokenUsage {
            input: 100,
            output: 20,
        };
        first.duration_ms = 1500;
        let second = run_log("T2", AgentRole::Qa, 0, AgentStatus::Failed);

        let context = retro_context(&state, &[first, second], &["keep tests fast".to_string()]);
        assert!(context.contains("- Completed: 1"));
        assert!(context.contains("- Blocked: 1"));
        assert!(context.contains("- Total agent calls: 2"));
        assert!(context.contains("~100 input, ~20 output"));
        assert!(context.contains("- Total duration: 1.5s"));
        assert!(context.contains("- Calls by role: coder: 1, qa: 1"));
        assert!(context.contains("### Failed/Blocked Invocations (1):"));
        assert!(context.contains("1. keep tests fast"));
    }
}
