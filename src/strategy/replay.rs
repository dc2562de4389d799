//! Private module for selective re-export.

use crate::registry::Id;
use crate::strategy::{Strategy, StrategyError};
use crate::trace::{Schedule, TraceStep};

/// Replays a previously recorded [`Schedule`] step by step.
///
/// Because every source of nondeterminism goes through the strategy, feeding
/// the recorded choices back in reproduces the original execution exactly.
/// Any disagreement between the schedule and the program under test (a
/// choice of the wrong kind, or a scheduled operation that is no longer
/// enabled) means the program itself is not deterministic modulo the
/// recorded choices, and is reported as a fatal
/// [`StrategyError::Mismatch`] rather than as a reproduced bug.
pub struct ReplayStrategy {
    schedule: Schedule,
    index: usize,
}

impl ReplayStrategy {
    pub fn new(schedule: Schedule) -> Self {
        ReplayStrategy { schedule, index: 0 }
    }

    fn take_step(&mut self) -> Option<&TraceStep> {
        let step = self.schedule.steps.get(self.index);
        if step.is_some() {
            self.index += 1;
        }
        step
    }
}

impl Strategy for ReplayStrategy {
    fn next_operation(&mut self, enabled: &[Id], _current: Id) -> Result<Id, StrategyError> {
        let index = self.index;
        match self.take_step() {
            None => Err(StrategyError::Exhausted),
            Some(TraceStep::Schedule { op }) => {
                let op = *op;
                if enabled.contains(&op) {
                    Ok(op)
                } else {
                    Err(StrategyError::Mismatch(format!(
                        "schedule step {} picks {} but it is not enabled",
                        index, op
                    )))
                }
            }
            Some(other) => Err(StrategyError::Mismatch(format!(
                "schedule step {} is {:?} but the program asked for a scheduling choice",
                index, other
            ))),
        }
    }

    fn next_bool(&mut self) -> Result<bool, StrategyError> {
        let index = self.index;
        match self.take_step() {
            None => Err(StrategyError::Exhausted),
            Some(TraceStep::Bool { value }) => Ok(*value),
            Some(other) => Err(StrategyError::Mismatch(format!(
                "schedule step {} is {:?} but the program asked for a boolean choice",
                index, other
            ))),
        }
    }

    fn next_int(&mut self, _max: u64) -> Result<u64, StrategyError> {
        let index = self.index;
        match self.take_step() {
            None => Err(StrategyError::Exhausted),
            Some(TraceStep::Int { value }) => Ok(*value),
            Some(other) => Err(StrategyError::Mismatch(format!(
                "schedule step {} is {:?} but the program asked for an integer choice",
                index, other
            ))),
        }
    }

    fn prepare_for_next_iteration(&mut self) -> bool {
        // A schedule reproduces exactly one execution.
        false
    }

    fn reset(&mut self) {
        self.index = 0;
    }

    fn description(&self) -> String {
        format!("replay ({} steps)", self.schedule.len())
    }

    fn is_fair(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn recorded() -> Schedule {
        let mut schedule = Schedule::default();
        schedule.push(TraceStep::Schedule { op: Id::from(1) });
        schedule.push(TraceStep::Bool { value: true });
        schedule.push(TraceStep::Schedule { op: Id::from(0) });
        schedule
    }

    #[test]
    fn replays_recorded_choices_in_order() {
        let mut strategy = ReplayStrategy::new(recorded());
        let enabled = vec![Id::from(0), Id::from(1)];
        assert_eq!(
            strategy.next_operation(&enabled, Id::from(0)),
            Ok(Id::from(1))
        );
        assert_eq!(strategy.next_bool(), Ok(true));
        assert_eq!(
            strategy.next_operation(&enabled, Id::from(1)),
            Ok(Id::from(0))
        );
        assert_eq!(
            strategy.next_operation(&enabled, Id::from(0)),
            Err(StrategyError::Exhausted)
        );
    }

    #[test]
    fn disabled_operation_is_a_mismatch() {
        let mut strategy = ReplayStrategy::new(recorded());
        let enabled = vec![Id::from(0)]; // recorded step picks Id(1)
        assert!(matches!(
            strategy.next_operation(&enabled, Id::from(0)),
            Err(StrategyError::Mismatch(_))
        ));
    }

    #[test]
    fn wrong_choice_kind_is_a_mismatch() {
        let mut strategy = ReplayStrategy::new(recorded());
        // First recorded step is a scheduling choice, not a bool.
        assert!(matches!(
            strategy.next_bool(),
            Err(StrategyError::Mismatch(_))
        ));
    }

    #[test]
    fn single_iteration_only() {
        let mut strategy = ReplayStrategy::new(recorded());
        assert!(!strategy.prepare_for_next_iteration());
    }
}
