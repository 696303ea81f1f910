//! Feedback carried from one attempt to the next.

use crate::core::digest::head;
use crate::core::output::{PlannerOutput, QaOutput};
use crate::core::types::CommandResult;

/// Head of each failing command's stderr included in retry feedback.
pub const FEEDBACK_STDERR_HEAD: usize = 800;

/// Standing instruction appended to every retry feedback.
pub const DEPENDENTS_REMINDER: &str = "IMPORTANT: Build errors often surface one at a time. \
If you fix one import/reference error, the same pattern may be broken in other files. \
Check ALL files that import from or depend on any file you modified, \
and fix every instance of the same class of error in a single pass.";

/// Structured feedback for the builder after a failed validation.
pub fn validation_feedback(qa: &QaOutput, build_results: &[CommandResult]) -> String {
    let mut parts = vec![format!("Validation verdict: FAIL - {}", qa.envelope.summary)];

    if !qa.violations.is_empty() {
        parts.push("\nViolations:".to_string());
        parts.extend(qa.violations.iter().map(|violation| format!("  - {violation}")));
    }
    if !qa.notes.is_empty() {
        parts.push(format!("\nNotes: {}", qa.notes));
    }

    let failed: Vec<&CommandResult> = build_results
        .iter()
        .filter(|result| !result.succeeded())
        .collect();
    if !failed.is_empty() {
        parts.push("\nFailed commands:".to_string());
        for result in failed {
            parts.push(format!("  $ {} -> exit {}", result.command, result.exit_code));
            if !result.stderr.is_empty() {
                parts.push(format!(
                    "    stderr: {}",
                    head(&result.stderr, FEEDBACK_STDERR_HEAD)
                ));
            }
        }
    }

    parts.push(format!("\n{DEPENDENTS_REMINDER}"));
    parts.join("\n")
}

/// Prior feedback for the first attempt after an escalation was resolved with `retry`.
pub fn escalation_guidance(planner: &PlannerOutput) -> String {
    let decisions = if planner.decisions.is_empty() {
        "none".to_string()
    } else {
        planner.decisions.join(", ")
    };
    format!(
        "Planner escalation guidance:\n\n{}\n\nDecisions made: {decisions}\n\n\
         IMPORTANT: Follow this guidance precisely. Previous attempts failed; \
         this is the corrected approach from the project planner.",
        planner.guidance
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::output::{Envelope, Resolution, Verdict};
    use crate::core::types::{AgentRole, AgentStatus};

    fn qa(summary: &str) -> QaOutput {
        QaOutput {
            envelope: Envelope::new(AgentRole::Qa, AgentStatus::Failed, summary),
            verdict: Verdict::Fail,
            violations: vec!["missing route".to_string()],
            notes: "see router".to_string(),
            commands_run: Vec::new(),
        }
    }

    #[test]
    fn validation_feedback_includes_everything_the_builder_needs() {
        let results = vec![
            CommandResult {
                command: "npm run lint".to_string(),
                exit_code: 0,
                stdout: String::new(),
                stderr: "warning only".to_string(),
            },
            CommandResult {
                command: "npm run build".to_string(),
                exit_code: 1,
                stdout: String::new(),
                stderr: "x".repeat(FEEDBACK_STDERR_HEAD + 50),
            },
        ];
        let feedback = validation_feedback(&qa("route missing"), &results);
        assert!(feedback.starts_with("Validation verdict: FAIL - route missing"));
        assert!(feedback.contains("  - missing route"));
        assert!(feedback.contains("Notes: see router"));
        assert!(feedback.contains("$ npm run build -> exit 1"));
        assert!(!feedback.contains("npm run lint"));
        assert!(!feedback.contains(&"x".repeat(FEEDBACK_STDERR_HEAD + 1)));
        assert!(feedback.ends_with(DEPENDENTS_REMINDER));
    }

    #[test]
    fn escalation_guidance_lists_decisions() {
        let planner = PlannerOutput {
            envelope: Envelope::new(AgentRole::Planner, AgentStatus::Complete, "retry it"),
            artifact_content: String::new(),
            decisions: vec!["use sqlite".to_string(), "drop cache".to_string()],
            resolution: Some(Resolution::Retry),
            guidance: "Split the module.".to_string(),
        };
        let text = escalation_guidance(&planner);
        assert!(text.contains("Split the module."));
        assert!(text.contains("Decisions made: use sqlite, drop cache"));
        assert!(text.contains("Follow this guidance precisely"));
    }
}
