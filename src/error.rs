//! Failure taxonomy for the testing engine.

use std::fmt::{self, Display, Formatter};

use serde::Serialize;

use crate::event::EventType;

/// A condition that ends an iteration with an error report. The first
/// failure per iteration is kept; later ones are discarded.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub enum Failure {
    /// A user assertion was false. See `Context::require`.
    Assertion(String),
    /// A machine received an event its current state neither handles,
    /// ignores, nor defers.
    UnhandledEvent {
        machine: String,
        event: EventType,
        state: String,
    },
    /// No operation is enabled while at least one machine waits to receive.
    Livelock { waiting: Vec<String> },
    /// A monitor stayed hot across a non-progressing cycle, or was hot when
    /// the program terminated.
    Liveness { monitors: Vec<String> },
    /// A suspension was attempted by a thread that does not hold the turn,
    /// so the exploration itself is unsound.
    UncontrolledConcurrency(String),
    /// A state-machine protocol violation: unbalanced pop, or a transition
    /// requested from within an exit action.
    Protocol(String),
    /// A recorded schedule could not be reproduced. Tooling error, not a
    /// reproduced bug.
    ReplayMismatch(String),
}

impl Failure {
    /// True for failures that indicate the exploration itself went wrong
    /// rather than a bug in the program under test.
    pub fn is_unsound(&self) -> bool {
        matches!(
            self,
            Failure::UncontrolledConcurrency(_) | Failure::ReplayMismatch(_)
        )
    }
}

impl std::error::Error for Failure {}

impl Display for Failure {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Assertion(text) => write!(f, "assertion failed: {}", text),
            Failure::UnhandledEvent {
                machine,
                event,
                state,
            } => write!(
                f,
                "machine '{}' received event '{}' that cannot be handled in state '{}'",
                machine, event, state
            ),
            Failure::Livelock { waiting } => write!(
                f,
                "livelock detected: {} waiting to receive an event, but no other \
                 operation is enabled",
                waiting.join(", ")
            ),
            Failure::Liveness { monitors } => write!(
                f,
                "liveness violation: monitor(s) {} detected potentially infinite \
                 execution without progress",
                monitors.join(", ")
            ),
            Failure::UncontrolledConcurrency(detail) => write!(
                f,
                "detected concurrency not controlled by the scheduler: {}",
                detail
            ),
            Failure::Protocol(detail) => write!(f, "protocol error: {}", detail),
            Failure::ReplayMismatch(detail) => {
                write!(f, "schedule is not reproducible: {}", detail)
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn classifies_unsound_failures() {
        assert!(Failure::ReplayMismatch("step 3".to_string()).is_unsound());
        assert!(Failure::UncontrolledConcurrency("task 9".to_string()).is_unsound());
        assert!(!Failure::Assertion("x < 3".to_string()).is_unsound());
        assert!(!Failure::Livelock { waiting: vec![] }.is_unsound());
    }

    #[test]
    fn displays_livelock_with_machine_names() {
        let failure = Failure::Livelock {
            waiting: vec!["Server(1)".to_string(), "Client(2)".to_string()],
        };
        let text = failure.to_string();
        assert!(text.contains("Server(1), Client(2)"));
        assert!(text.contains("livelock"));
    }
}
