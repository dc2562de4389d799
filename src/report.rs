//! Private module for selective re-export.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::trace::Schedule;

/// Accumulated results of a test run.
///
/// Filled in by a single writer (the driver) as iterations complete;
/// [`TestReport::merge`] folds per-batch reports into a run total.
#[derive(Clone, Debug, Default, Serialize)]
pub struct TestReport {
    /// Iterations executed, including those cut short by the step bound.
    pub iterations: usize,
    /// Bugs found. Counts iterations, not distinct root causes.
    pub bugs_found: usize,
    /// Human-readable text of each bug, in discovery order.
    pub bug_reports: Vec<String>,
    /// Scheduling steps of the shortest completed iteration.
    pub min_steps: Option<usize>,
    /// Scheduling steps of the longest iteration.
    pub max_steps: usize,
    /// Scheduling steps across all iterations.
    pub total_steps: usize,
    /// Iterations aborted by the step bound.
    pub max_steps_hit: usize,
    /// Iterations whose result is unsound (uncontrolled concurrency or a
    /// replay mismatch). These indicate a tooling or test-harness problem,
    /// not a program bug.
    pub unsound_iterations: usize,
    /// Schedule reproducing the first bug found, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Schedule>,
    /// Wall-clock duration of the run.
    #[serde(skip)]
    pub duration: Duration,
}

impl TestReport {
    /// Records one finished iteration of `steps` scheduling steps.
    pub fn record_iteration(&mut self, steps: usize, hit_bound: bool) {
        self.iterations += 1;
        self.total_steps += steps;
        self.max_steps = self.max_steps.max(steps);
        self.min_steps = Some(match self.min_steps {
            Some(min) => min.min(steps),
            None => steps,
        });
        if hit_bound {
            self.max_steps_hit += 1;
        }
    }

    /// Records a bug, keeping the first reproducing schedule.
    pub fn record_bug(&mut self, text: String, schedule: Schedule) {
        self.bugs_found += 1;
        self.bug_reports.push(text);
        if self.schedule.is_none() {
            self.schedule = Some(schedule);
        }
    }

    /// Folds `other` into `self`. Single-writer: intended for the driver
    /// combining batches, never for concurrent accumulation.
    pub fn merge(&mut self, other: &TestReport) {
        self.iterations += other.iterations;
        self.bugs_found += other.bugs_found;
        self.bug_reports.extend(other.bug_reports.iter().cloned());
        self.min_steps = match (self.min_steps, other.min_steps) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.max_steps = self.max_steps.max(other.max_steps);
        self.total_steps += other.total_steps;
        self.max_steps_hit += other.max_steps_hit;
        self.unsound_iterations += other.unsound_iterations;
        if self.schedule.is_none() {
            self.schedule = other.schedule.clone();
        }
        self.duration += other.duration;
    }
}

impl fmt::Display for TestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} iterations, {} bugs found, steps min/avg/max {}/{}/{}",
            self.iterations,
            self.bugs_found,
            self.min_steps.unwrap_or(0),
            self.total_steps / self.iterations.max(1),
            self.max_steps,
        )?;
        if self.max_steps_hit > 0 {
            write!(f, ", {} hit the step bound", self.max_steps_hit)?;
        }
        if self.unsound_iterations > 0 {
            write!(f, ", {} unsound", self.unsound_iterations)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::registry::Id;
    use crate::trace::TraceStep;

    #[test]
    fn record_iteration_tracks_step_extremes() {
        let mut report = TestReport::default();
        report.record_iteration(10, false);
        report.record_iteration(4, false);
        report.record_iteration(25, true);
        assert_eq!(report.iterations, 3);
        assert_eq!(report.min_steps, Some(4));
        assert_eq!(report.max_steps, 25);
        assert_eq!(report.total_steps, 39);
        assert_eq!(report.max_steps_hit, 1);
    }

    #[test]
    fn first_schedule_wins() {
        let mut first = Schedule::default();
        first.push(TraceStep::Schedule { op: Id::from(0) });
        let mut second = Schedule::default();
        second.push(TraceStep::Schedule { op: Id::from(1) });

        let mut report = TestReport::default();
        report.record_bug("bug a".to_string(), first.clone());
        report.record_bug("bug b".to_string(), second);
        assert_eq!(report.bugs_found, 2);
        assert_eq!(report.schedule.as_ref().map(|s| s.len()), Some(1));
        assert_eq!(report.schedule.unwrap().steps, first.steps);
    }

    #[test]
    fn merge_accumulates() {
        let mut a = TestReport::default();
        a.record_iteration(10, false);
        let mut b = TestReport::default();
        b.record_iteration(3, true);
        b.record_bug("bug".to_string(), Schedule::default());
        a.merge(&b);
        assert_eq!(a.iterations, 2);
        assert_eq!(a.min_steps, Some(3));
        assert_eq!(a.bugs_found, 1);
        assert!(a.schedule.is_some());
    }
}
