//! Recording and persistence of schedules.
//!
//! Every scheduling decision and nondeterministic choice made during an
//! iteration is appended to a [`Schedule`]. A schedule losslessly determines
//! an execution, so saving the one that found a bug and feeding it back
//! through the `Replay` strategy reproduces the bug exactly.

use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::registry::Id;

/// One recorded decision.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum TraceStep {
    /// The strategy chose this operation to run next.
    Schedule { op: Id },
    /// A nondeterministic boolean choice returned this value.
    Bool { value: bool },
    /// A nondeterministic integer choice returned this value.
    Int { value: u64 },
}

/// An ordered log of [`TraceStep`]s for one iteration.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub steps: Vec<TraceStep>,
}

impl Schedule {
    pub fn push(&mut self, step: TraceStep) {
        self.steps.push(step);
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn clear(&mut self) {
        self.steps.clear();
    }

    /// Persists the schedule as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
    }

    /// Loads a schedule previously written by [`Schedule::save`].
    pub fn load(path: impl AsRef<Path>) -> io::Result<Schedule> {
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn saves_and_loads_a_schedule() {
        let mut schedule = Schedule::default();
        schedule.push(TraceStep::Schedule { op: Id::from(0) });
        schedule.push(TraceStep::Bool { value: true });
        schedule.push(TraceStep::Int { value: 4 });
        schedule.push(TraceStep::Schedule { op: Id::from(2) });

        let path = std::env::temp_dir().join(format!(
            "rehearse-schedule-{}-{}.json",
            std::process::id(),
            schedule.len()
        ));
        schedule.save(&path).unwrap();
        let loaded = Schedule::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded, schedule);
    }
}
