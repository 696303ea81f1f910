//! Progress reporting for people watching a run.
//!
//! The engine never prints. It emits [`Event`]s to a [`Reporter`] handed in by
//! the caller: the CLI prints them, tests record them.

use std::cell::RefCell;

use crate::core::types::{AgentRole, AgentStatus, ProjectPhase};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    PhaseChanged {
        from: ProjectPhase,
        to: ProjectPhase,
    },
    TaskStarted {
        task_id: String,
        title: String,
    },
    AttemptStarted {
        task_id: String,
        attempt: u32,
        round: u32,
    },
    AgentFinished {
        role: AgentRole,
        task_id: String,
        status: AgentStatus,
        summary: String,
    },
    ValidationFailed {
        task_id: String,
        attempt: u32,
        attempts_left: u32,
    },
    TaskDone {
        task_id: String,
    },
    TaskBlocked {
        task_id: String,
        reason: String,
    },
    EscalationOpened {
        task_id: String,
        escalation_id: String,
    },
    EscalationResolved {
        escalation_id: String,
        resolution: String,
    },
    Notice(String),
}

impl Event {
    /// One human-readable line.
    pub fn render(&self) -> String {
        match self {
            Event::PhaseChanged { from, to } => format!("phase: {from} -> {to}"),
            Event::TaskStarted { task_id, title } => format!("[{task_id}] starting: {title}"),
            Event::AttemptStarted {
                task_id,
                attempt,
                round,
            } => {
                if *round > 0 {
                    format!("[{task_id}] attempt {} (after escalation {round})", attempt + 1)
                } else {
                    format!("[{task_id}] attempt {}", attempt + 1)
                }
            }
            Event::AgentFinished {
                role,
                task_id,
                status,
                summary,
            } => format!("[{task_id}] {role}: {status} - {summary}"),
            Event::ValidationFailed {
                task_id,
                attempt,
                attempts_left,
            } => format!(
                "[{task_id}] validation failed on attempt {}, {attempts_left} left",
                attempt + 1
            ),
            Event::TaskDone { task_id } => format!("[{task_id}] done"),
            Event::TaskBlocked { task_id, reason } => format!("[{task_id}] blocked: {reason}"),
            Event::EscalationOpened {
                task_id,
                escalation_id,
            } => format!("[{task_id}] escalated to planner ({escalation_id})"),
            Event::EscalationResolved {
                escalation_id,
                resolution,
            } => format!("{escalation_id} resolved: {resolution}"),
            Event::Notice(message) => message.clone(),
        }
    }
}

pub trait Reporter {
    fn report(&self, event: Event);
}

/// Prints each event on its own stdout line.
#[derive(Debug, Default)]
pub struct ConsoleReporter;

impl Reporter for ConsoleReporter {
    fn report(&self, event: Event) {
        println!("{}", event.render());
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    events: RefCell<Vec<Event>>,
}

impl RecordingReporter {
    pub fn events(&self) -> Vec<Event> {
        self.events.borrow().clone()
    }
}

impl Reporter for RecordingReporter {
    fn report(&self, event: Event) {
        self.events.borrow_mut().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_attempts_one_based() {
        let event = Event::AttemptStarted {
            task_id: "T1".to_string(),
            attempt: 0,
            round: 0,
        };
        assert_eq!(event.render(), "[T1] attempt 1");

        let event = Event::AttemptStarted {
            task_id: "T1".to_string(),
            attempt: 2,
            round: 1,
        };
        assert_eq!(event.render(), "[T1] attempt 3 (after escalation 1)");
    }

    #[test]
    fn recording_reporter_keeps_order() {
        let reporter = RecordingReporter::default();
        reporter.report(Event::Notice("a".to_string()));
        reporter.report(Event::TaskDone {
            task_id: "T1".to_string(),
        });
        assert_eq!(
            reporter.events(),
            vec![
                Event::Notice("a".to_string()),
                Event::TaskDone {
                    task_id: "T1".to_string()
                }
            ]
        );
    }
}
