//! Deterministic selection of the next runnable task.

use crate::core::types::{ProjectState, Task, TaskState};

/// Every dependency id names a task that is done or archived.
///
/// An unknown dependency id is never satisfied.
pub fn dependencies_satisfied(state: &ProjectState, task: &Task) -> bool {
    task.dependencies.iter().all(|dep| {
        state
            .task(dep)
            .is_some_and(|found| found.state.is_finished())
    })
}

/// The ready task with satisfied dependencies and the smallest `order`.
///
/// Ties go to the task listed first.
pub fn next_runnable_task(state: &ProjectState) -> Option<&Task> {
    state
        .tasks
        .iter()
        .filter(|task| task.state == TaskState::Ready && dependencies_satisfied(state, task))
        .min_by(|a, b| a.order.cmp(&b.order))
}

/// Every task is done or archived. Vacuously true for an empty task list.
pub fn all_tasks_done(state: &ProjectState) -> bool {
    state.tasks.iter().all(|task| task.state.is_finished())
}

/// Why nothing is runnable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdleState {
    /// All tasks are done or archived.
    Complete,
    /// These tasks were left mid-attempt by an interrupted run.
    Interrupted(Vec<String>),
    /// These tasks are blocked and need a human or a manual retry.
    Blocked(Vec<String>),
    /// These ready tasks wait on dependencies that are not finished.
    WaitingOnDependencies(Vec<String>),
    /// None of the above, e.g. tasks still `new`.
    NothingToRun,
}

/// Outcome of asking the resolver for work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Run(String),
    Idle(IdleState),
}

pub fn classify_idle(state: &ProjectState) -> IdleState {
    if all_tasks_done(state) {
        return IdleState::Complete;
    }
    let in_flight: Vec<String> = state
        .tasks
        .iter()
        .filter(|task| task.state.is_in_flight())
        .map(|task| task.id.clone())
        .collect();
    if !in_flight.is_empty() {
        return IdleState::Interrupted(in_flight);
    }
    let blocked: Vec<String> = state
        .tasks
        .iter()
        .filter(|task| task.state == TaskState::Blocked)
        .map(|task| task.id.clone())
        .collect();
    if !blocked.is_empty() {
        return IdleState::Blocked(blocked);
    }
    let waiting: Vec<String> = state
        .tasks
        .iter()
        .filter(|task| task.state == TaskState::Ready && !dependencies_satisfied(state, task))
        .map(|task| task.id.clone())
        .collect();
    if !waiting.is_empty() {
        return IdleState::WaitingOnDependencies(waiting);
    }
    IdleState::NothingToRun
}

pub fn select(state: &ProjectState) -> Selection {
    match next_runnable_task(state) {
        Some(task) => Selection::Run(task.id.clone()),
        None => Selection::Idle(classify_idle(state)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{project_with, task};

    /// T1 (order 1) runs before T2 (order 2, depends on T1); T2 follows once T1 is done.
    #[test]
    fn schedules_dependency_chain_in_order() {
        let mut state = project_with(vec![
            task("T2", 2, TaskState::Ready, &["T1"]),
            task("T1", 1, TaskState::Ready, &[]),
        ]);
        assert_eq!(next_runnable_task(&state).map(|t| t.id.as_str()), Some("T1"));

        state.task_mut("T1").expect("T1").state = TaskState::Done;
        assert_eq!(next_runnable_task(&state).map(|t| t.id.as_str()), Some("T2"));

        state.task_mut("T2").expect("T2").state = TaskState::Done;
        assert_eq!(next_runnable_task(&state), None);
        assert!(all_tasks_done(&state));
    }

    #[test]
    fn repeated_calls_return_the_same_task() {
        let state = project_with(vec![
            task("A", 1, TaskState::Ready, &[]),
            task("B", 1, TaskState::Ready, &[]),
        ]);
        let first = next_runnable_task(&state).map(|t| t.id.clone());
        for _ in 0..5 {
            assert_eq!(next_runnable_task(&state).map(|t| t.id.clone()), first);
        }
        assert_eq!(first.as_deref(), Some("A"));
    }

    #[test]
    fn archived_dependencies_count_as_satisfied() {
        let state = project_with(vec![
            task("A", 1, TaskState::Archived, &[]),
            task("B", 2, TaskState::Ready, &["A"]),
        ]);
        assert_eq!(next_runnable_task(&state).map(|t| t.id.as_str()), Some("B"));
    }

    #[test]
    fn unknown_dependency_is_never_satisfied() {
        let state = project_with(vec![task("A", 1, TaskState::Ready, &["ghost"])]);
        assert_eq!(next_runnable_task(&state), None);
        assert_eq!(
            classify_idle(&state),
            IdleState::WaitingOnDependencies(vec!["A".to_string()])
        );
    }

    #[test]
    fn idle_classification_prefers_blocked_over_waiting() {
        let state = project_with(vec![
            task("A", 1, TaskState::Blocked, &[]),
            task("B", 2, TaskState::Ready, &["A"]),
        ]);
        assert_eq!(
            select(&state),
            Selection::Idle(IdleState::Blocked(vec!["A".to_string()]))
        );
    }

    #[test]
    fn tasks_left_mid_attempt_are_reported_as_interrupted() {
        let state = project_with(vec![
            task("T1", 1, TaskState::InQa, &[]),
            task("T2", 2, TaskState::Blocked, &[]),
            task("T3", 3, TaskState::InProgress, &["T1"]),
        ]);
        assert_eq!(
            select(&state),
            Selection::Idle(IdleState::Interrupted(vec![
                "T1".to_string(),
                "T3".to_string()
            ]))
        );
    }

    #[test]
    fn idle_with_only_new_tasks_is_nothing_to_run() {
        let state = project_with(vec![task("A", 1, TaskState::New, &[])]);
        assert_eq!(classify_idle(&state), IdleState::NothingToRun);
    }

    #[test]
    fn empty_project_is_complete() {
        let state = project_with(Vec::new());
        assert_eq!(select(&state), Selection::Idle(IdleState::Complete));
    }
}
