//! Prompt composition for agent invocations.
//!
//! Templates live in `prompts/` and mark their sections with
//! `<!-- section:KEY required|droppable -->`. When a rendered prompt exceeds
//! the character budget, droppable sections are removed in a fixed order and
//! the last remaining section is truncated if that is still not enough.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use tracing::debug;

use crate::core::digest::head;
use crate::core::types::Task;

const CODER_TEMPLATE: &str = include_str!("prompts/coder.md");
const QA_TEMPLATE: &str = include_str!("prompts/qa.md");
const ESCALATION_TEMPLATE: &str = include_str!("prompts/escalation.md");
const TASKS_TEMPLATE: &str = include_str!("prompts/tasks.md");
const DISTILLER_TEMPLATE: &str = include_str!("prompts/distiller.md");

/// Roughly 70% of a 180k-token context window at four characters per token.
pub const DEFAULT_PROMPT_BUDGET_CHARS: usize = 500_000;

/// Sections dropped first when over budget.
const DROP_ORDER: &[&str] = &[
    "lessons",
    "sources",
    "dependents",
    "tree",
    "plan",
    "preferences",
    "spec",
];

static SECTION_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->").ok());

/// Which prompt to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    Coder,
    Qa,
    Escalation,
    Tasks,
    Distiller,
}

impl PromptKind {
    fn template_name(self) -> &'static str {
        match self {
            PromptKind::Coder => "coder",
            PromptKind::Qa => "qa",
            PromptKind::Escalation => "escalation",
            PromptKind::Tasks => "tasks",
            PromptKind::Distiller => "distiller",
        }
    }
}

/// Everything a template may reference. Empty strings render as absent sections.
#[derive(Debug, Clone, Default)]
pub struct PromptInputs<'a> {
    pub project: &'a str,
    pub version: &'a str,
    pub task: Option<&'a Task>,
    pub spec: &'a str,
    pub plan: &'a str,
    pub preferences: &'a str,
    pub lessons: &'a str,
    pub file_tree: &'a str,
    pub sources: &'a str,
    /// Which files import which, for the builder.
    pub dependents: &'a str,
    pub prior_feedback: &'a str,
    pub diff: &'a str,
    pub command_results: &'a str,
    pub extra_context: &'a str,
}

/// Markdown block describing one task.
pub fn task_block(task: &Task) -> String {
    let mut parts = vec![format!(
        "## Current Task\n\n- **ID:** {}\n- **Title:** {}\n- **Description:** {}\n- **Attempt:** {}\n- **Version:** {}",
        task.id, task.title, task.description, task.attempt, task.version
    )];
    if !task.acceptance_criteria.is_empty() {
        let criteria: Vec<String> = task
            .acceptance_criteria
            .iter()
            .map(|criterion| format!("  - {criterion}"))
            .collect();
        parts.push(format!("- **Acceptance Criteria:**\n{}", criteria.join("\n")));
    }
    if !task.dependencies.is_empty() {
        parts.push(format!("- **Dependencies:** {}", task.dependencies.join(", ")));
    }
    parts.join("\n")
}

#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let Some(re) = SECTION_RE.as_ref() else {
        return vec![ParsedSection {
            key: "all".to_string(),
            required: true,
            content: rendered.trim().to_string(),
        }];
    };
    let markers: Vec<(usize, usize, String, bool)> = re
        .captures_iter(rendered)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some((
                whole.start(),
                whole.end(),
                caps.get(1)?.as_str().to_string(),
                caps.get(2)?.as_str() == "required",
            ))
        })
        .collect();

    let mut sections = Vec::new();
    for (idx, (_, end, key, required)) in markers.iter().enumerate() {
        let stop = markers
            .get(idx + 1)
            .map(|(next_start, ..)| *next_start)
            .unwrap_or(rendered.len());
        let content = rendered[*end..stop].trim().to_string();
        if !content.is_empty() || *required {
            sections.push(ParsedSection {
                key: key.clone(),
                required: *required,
                content,
            });
        }
    }
    sections
}

fn total_chars(sections: &[ParsedSection]) -> usize {
    sections.iter().map(|s| s.content.chars().count()).sum()
}

fn apply_budget(sections: &mut Vec<ParsedSection>, budget: usize) {
    for key in DROP_ORDER {
        if total_chars(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == *key && !s.required) {
            debug!(
                section = key,
                chars_dropped = sections[idx].content.chars().count(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    let total = total_chars(sections);
    if total <= budget {
        return;
    }
    if let Some(last) = sections.last_mut() {
        let last_len = last.content.chars().count();
        let allowed = budget.saturating_sub(total - last_len);
        let marker = "\n[truncated]";
        let keep = allowed.saturating_sub(marker.len());
        last.content = format!("{}{marker}", head(&last.content, keep));
        debug!(section = %last.key, before = last_len, after = keep, "truncated section for budget");
    }
}

/// Renders role prompts within a character budget.
pub struct PromptComposer {
    env: Environment<'static>,
    budget_chars: usize,
}

impl PromptComposer {
    pub fn new(budget_chars: usize) -> Result<Self> {
        let mut env = Environment::new();
        for (name, source) in [
            ("coder", CODER_TEMPLATE),
            ("qa", QA_TEMPLATE),
            ("escalation", ESCALATION_TEMPLATE),
            ("tasks", TASKS_TEMPLATE),
            ("distiller", DISTILLER_TEMPLATE),
        ] {
            env.add_template(name, source)
                .with_context(|| format!("load {name} prompt template"))?;
        }
        Ok(Self { env, budget_chars })
    }

    pub fn compose(&self, kind: PromptKind, inputs: &PromptInputs<'_>) -> Result<String> {
        let template = self.env.get_template(kind.template_name())?;
        let task_text = inputs.task.map(task_block).unwrap_or_default();
        let rendered = template
            .render(context! {
                project => inputs.project,
                version => inputs.version,
                task_block => task_text,
                spec => inputs.spec.trim(),
                plan => inputs.plan.trim(),
                preferences => inputs.preferences.trim(),
                lessons => inputs.lessons.trim(),
                file_tree => inputs.file_tree.trim(),
                sources => inputs.sources.trim(),
                dependents => inputs.dependents.trim(),
                prior_feedback => inputs.prior_feedback.trim(),
                diff => inputs.diff.trim(),
                command_results => inputs.command_results.trim(),
                extra_context => inputs.extra_context.trim(),
            })
            .with_context(|| format!("render {} prompt", kind.template_name()))?;

        let mut sections = parse_sections(&rendered);
        apply_budget(&mut sections, self.budget_chars);
        Ok(sections
            .iter()
            .map(|s| s.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TaskState;
    use crate::test_support::task;

    fn composer() -> PromptComposer {
        PromptComposer::new(DEFAULT_PROMPT_BUDGET_CHARS).expect("templates")
    }

    #[test]
    fn coder_prompt_orders_sections_and_omits_empty_ones() {
        let mut current = task("T1", 1, TaskState::InProgress, &["T0"]);
        current.acceptance_criteria = vec!["returns 42".to_string()];
        let prompt = composer()
            .compose(
                PromptKind::Coder,
                &PromptInputs {
                    project: "demo",
                    task: Some(&current),
                    spec: "the spec",
                    file_tree: "src/",
                    prior_feedback: "fix the import",
                    ..PromptInputs::default()
                },
            )
            .expect("compose");

        let contract = prompt.find("<contract>").expect("contract");
        let task_pos = prompt.find("## Current Task").expect("task");
        let feedback = prompt.find("fix the import").expect("feedback");
        let spec = prompt.find("the spec").expect("spec");
        assert!(contract < task_pos && task_pos < feedback && feedback < spec);
        assert!(prompt.contains("  - returns 42"));
        assert!(prompt.contains("- **Dependencies:** T0"));
        assert!(!prompt.contains("## Approved Plan"));
        assert!(!prompt.contains("## Active Preferences"));
        assert!(!prompt.contains("section:"));
        assert!(prompt.trim_end().ends_with("</output>"));
    }

    #[test]
    fn coder_prompt_carries_dependents_after_tree() {
        let current = task("T1", 1, TaskState::InProgress, &[]);
        let inputs = PromptInputs {
            project: "demo",
            task: Some(&current),
            file_tree: "src/",
            dependents: "## Import Dependency Map\n\n### util.py\n  - `app.py`: `from util import f`",
            ..PromptInputs::default()
        };
        let prompt = composer().compose(PromptKind::Coder, &inputs).expect("compose");
        let tree = prompt.find("## Project File Tree").expect("tree");
        let map = prompt.find("## Import Dependency Map").expect("map");
        assert!(tree < map);
        assert!(prompt.contains("`app.py`: `from util import f`"));

        let without = composer()
            .compose(
                PromptKind::Coder,
                &PromptInputs {
                    dependents: "",
                    ..inputs
                },
            )
            .expect("compose");
        assert!(!without.contains("Import Dependency Map"));
    }

    #[test]
    fn qa_prompt_includes_diff_and_results() {
        let current = task("T1", 1, TaskState::InQa, &[]);
        let prompt = composer()
            .compose(
                PromptKind::Qa,
                &PromptInputs {
                    project: "demo",
                    task: Some(&current),
                    diff: "--- NEW FILE: a.rs ---",
                    command_results: "$ cargo build  ->  exit 0",
                    ..PromptInputs::default()
                },
            )
            .expect("compose");
        assert!(prompt.contains("--- NEW FILE: a.rs ---"));
        assert!(prompt.contains("$ cargo build  ->  exit 0"));
        assert!(prompt.contains("\"verdict\""));
    }

    /// Droppable sections go first; required ones survive a tight budget.
    #[test]
    fn budget_drops_droppable_sections_first() {
        let current = task("T1", 1, TaskState::InProgress, &[]);
        let big = "L".repeat(20_000);
        let inputs = PromptInputs {
            project: "demo",
            task: Some(&current),
            lessons: &big,
            spec: "short spec",
            ..PromptInputs::default()
        };
        let full = composer().compose(PromptKind::Coder, &inputs).expect("compose");
        assert!(full.contains(&big));

        let tight = PromptComposer::new(5_000)
            .expect("templates")
            .compose(PromptKind::Coder, &inputs)
            .expect("compose");
        assert!(!tight.contains("LLLL"));
        assert!(tight.contains("short spec"));
        assert!(tight.contains("## Current Task"));
    }

    #[test]
    fn every_template_renders() {
        for kind in [
            PromptKind::Coder,
            PromptKind::Qa,
            PromptKind::Escalation,
            PromptKind::Tasks,
            PromptKind::Distiller,
        ] {
            let prompt = composer()
                .compose(kind, &PromptInputs::default())
                .expect("compose");
            assert!(prompt.contains("<contract>"), "{kind:?}");
        }
    }
}
