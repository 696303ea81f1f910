//! Structural invariants for project state and task graphs.

use std::collections::{HashMap, HashSet};

use crate::core::types::{ProjectPhase, ProjectState};

/// Minimal view of a task needed to check a dependency graph.
pub struct GraphNode<'a> {
    pub id: &'a str,
    pub dependencies: &'a [String],
}

/// Validate project state invariants.
///
/// Returns a list of stable error messages (empty on success).
pub fn validate_invariants(state: &ProjectState) -> Vec<String> {
    let mut errors = Vec::new();

    if state.phase > ProjectPhase::SpecApproved && !state.spec_approved {
        errors.push(format!("phase {} requires spec_approved", state.phase));
    }
    if state.phase > ProjectPhase::PlanApproved && !state.plan_approved {
        errors.push(format!("phase {} requires plan_approved", state.phase));
    }
    if state.phase >= ProjectPhase::TasksGenerated && !state.tasks_approved {
        errors.push(format!("phase {} requires tasks_approved", state.phase));
    }
    if state.phase < ProjectPhase::TasksGenerated && !state.tasks.is_empty() {
        errors.push(format!(
            "phase {} must not have tasks (found {})",
            state.phase,
            state.tasks.len()
        ));
    }

    let nodes: Vec<GraphNode<'_>> = state
        .tasks
        .iter()
        .map(|task| GraphNode {
            id: &task.id,
            dependencies: &task.dependencies,
        })
        .collect();
    errors.extend(validate_task_graph(&nodes));

    let mut open: HashMap<&str, usize> = HashMap::new();
    let mut escalation_ids = HashSet::new();
    for escalation in &state.escalations {
        if !escalation_ids.insert(escalation.id.as_str()) {
            errors.push(format!("duplicate escalation id '{}'", escalation.id));
        }
        if state.task(&escalation.task_id).is_none() {
            errors.push(format!(
                "escalation '{}' references unknown task '{}'",
                escalation.id, escalation.task_id
            ));
        }
        if !escalation.resolved {
            *open.entry(escalation.task_id.as_str()).or_default() += 1;
        }
    }
    let mut crowded: Vec<_> = open.into_iter().filter(|(_, count)| *count > 1).collect();
    crowded.sort();
    for (task_id, count) in crowded {
        errors.push(format!(
            "task '{task_id}' has {count} unresolved escalations"
        ));
    }

    errors
}

/// Check ids are unique, dependencies resolve and the graph is acyclic.
pub fn validate_task_graph(nodes: &[GraphNode<'_>]) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    for node in nodes {
        if node.id.trim().is_empty() {
            errors.push("task id must be non-empty".to_string());
        }
        if !seen.insert(node.id) {
            errors.push(format!("duplicate task id '{}'", node.id));
        }
    }
    for node in nodes {
        for dep in node.dependencies {
            if dep == node.id {
                errors.push(format!("task '{}' depends on itself", node.id));
            } else if !seen.contains(dep.as_str()) {
                errors.push(format!(
                    "task '{}' depends on unknown task '{}'",
                    node.id, dep
                ));
            }
        }
    }
    if let Some(cycle) = find_cycle(nodes) {
        errors.push(format!("dependency cycle: {}", cycle.join(" -> ")));
    }
    errors
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Depth-first search for a cycle of length two or more.
fn find_cycle(nodes: &[GraphNode<'_>]) -> Option<Vec<String>> {
    let edges: HashMap<&str, &[String]> = nodes
        .iter()
        .map(|node| (node.id, node.dependencies))
        .collect();
    let mut marks: HashMap<&str, Mark> = HashMap::new();
    let mut stack: Vec<&str> = Vec::new();

    fn visit<'a>(
        id: &'a str,
        edges: &HashMap<&'a str, &'a [String]>,
        marks: &mut HashMap<&'a str, Mark>,
        stack: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        match marks.get(id) {
            Some(Mark::Done) => return None,
            Some(Mark::Visiting) => {
                let start = stack.iter().position(|entry| *entry == id)?;
                let mut cycle: Vec<String> =
                    stack[start..].iter().map(|entry| entry.to_string()).collect();
                cycle.push(id.to_string());
                return Some(cycle);
            }
            None => {}
        }
        marks.insert(id, Mark::Visiting);
        stack.push(id);
        for dep in edges.get(id).copied().unwrap_or_default() {
            // Self-loops and unknown ids are reported separately.
            if dep == id || !edges.contains_key(dep.as_str()) {
                continue;
            }
            if let Some(cycle) = visit(dep.as_str(), edges, marks, stack) {
                return Some(cycle);
            }
        }
        stack.pop();
        marks.insert(id, Mark::Done);
        None
    }

    for node in nodes {
        if let Some(cycle) = visit(node.id, &edges, &mut marks, &mut stack) {
            return Some(cycle);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{AgentRole, Escalation, TaskState};
    use crate::test_support::{executing_project, project_with, task};
    use chrono::Utc;

    fn escalation(id: &str, task_id: &str, resolved: bool) -> Escalation {
        Escalation {
            id: id.to_string(),
            task_id: task_id.to_string(),
            from_role: AgentRole::Coder,
            to_role: Some(AgentRole::Planner),
            reason: "r".to_string(),
            resolved,
            resolution: String::new(),
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    #[test]
    fn executing_project_is_valid() {
        let state = executing_project(vec![
            task("T1", 1, TaskState::Ready, &[]),
            task("T2", 2, TaskState::Ready, &["T1"]),
        ]);
        assert!(validate_invariants(&state).is_empty());
    }

    #[test]
    fn flags_must_match_phase() {
        let mut state = project_with(Vec::new());
        state.phase = ProjectPhase::PlanDraft;
        let errors = validate_invariants(&state);
        assert_eq!(errors, vec!["phase plan_draft requires spec_approved"]);
    }

    #[test]
    fn tasks_before_generation_are_rejected() {
        let mut state = executing_project(vec![task("T1", 1, TaskState::New, &[])]);
        state.phase = ProjectPhase::PlanApproved;
        let errors = validate_invariants(&state);
        assert!(
            errors.iter().any(|e| e.contains("must not have tasks")),
            "{errors:?}"
        );
    }

    #[test]
    fn detects_duplicate_ids_and_unknown_dependencies() {
        let state = executing_project(vec![
            task("T1", 1, TaskState::Ready, &["nope"]),
            task("T1", 2, TaskState::Ready, &[]),
        ]);
        let errors = validate_invariants(&state);
        assert!(errors.contains(&"duplicate task id 'T1'".to_string()));
        assert!(errors.contains(&"task 'T1' depends on unknown task 'nope'".to_string()));
    }

    #[test]
    fn detects_dependency_cycle() {
        let state = executing_project(vec![
            task("A", 1, TaskState::Ready, &["C"]),
            task("B", 2, TaskState::Ready, &["A"]),
            task("C", 3, TaskState::Ready, &["B"]),
        ]);
        let errors = validate_invariants(&state);
        assert_eq!(errors, vec!["dependency cycle: A -> C -> B -> A"]);
    }

    #[test]
    fn detects_self_dependency() {
        let state = executing_project(vec![task("A", 1, TaskState::Ready, &["A"])]);
        assert_eq!(validate_invariants(&state), vec!["task 'A' depends on itself"]);
    }

    #[test]
    fn at_most_one_open_escalation_per_task() {
        let mut state = executing_project(vec![task("T1", 1, TaskState::Blocked, &[])]);
        state.escalations = vec![
            escalation("esc-T1-1", "T1", false),
            escalation("esc-T1-2", "T1", false),
        ];
        assert_eq!(
            validate_invariants(&state),
            vec!["task 'T1' has 2 unresolved escalations"]
        );

        state.escalations[0].resolved = true;
        assert!(validate_invariants(&state).is_empty());
    }
}
