//! Cycle detection for liveness monitors.
//!
//! A monitor declares some states hot ("obligation pending") and some cold
//! ("obligation discharged"). An execution that settles into a cycle while a
//! monitor stays hot throughout has stopped making progress toward that
//! monitor's obligation. Cycles are detected by fingerprinting the global
//! program state at a fixed step interval and watching for repeats within
//! the iteration.

use nohash_hasher::IntMap;

use crate::Fingerprint;

/// Temperature of a monitor's current state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MonitorStatus {
    Hot,
    Cold,
    Neutral,
}

#[derive(Clone, Debug)]
struct Snapshot {
    statuses: Vec<MonitorStatus>,
}

/// Detects potential non-progress cycles within a single iteration.
///
/// Every `interval` scheduling steps the scheduler hands over the global
/// fingerprint and each monitor's status. A fingerprint seen earlier in the
/// iteration marks a candidate cycle; a monitor that is hot somewhere in the
/// candidate window and cold nowhere in it is offending. The check is a
/// periodic approximation: a coarse `interval` can miss short cycles, and a
/// fingerprint collision can produce a spurious candidate window (which is
/// still only reported if a monitor is genuinely hot and never cold across
/// it).
pub struct CycleDetector {
    interval: usize,
    snapshots: Vec<Snapshot>,
    index: IntMap<Fingerprint, Vec<usize>>,
}

impl CycleDetector {
    pub fn new(interval: usize) -> Self {
        CycleDetector {
            interval: interval.max(1),
            snapshots: Vec::new(),
            index: IntMap::default(),
        }
    }

    /// Forgets all snapshots. Fingerprints never carry across iterations.
    pub fn reset(&mut self) {
        self.snapshots.clear();
        self.index.clear();
    }

    /// Records the state at `step` (when it falls on the interval) and
    /// returns the indices of offending monitors, if the fingerprint closes
    /// a hot cycle. An empty result means no violation so far.
    pub fn observe(
        &mut self,
        step: usize,
        fingerprint: Fingerprint,
        statuses: &[MonitorStatus],
    ) -> Vec<usize> {
        if step % self.interval != 0 {
            return Vec::new();
        }

        if let Some(earlier) = self.index.get(&fingerprint) {
            for &start in earlier {
                let offending = self.offending_in_window(start, statuses);
                if !offending.is_empty() {
                    log::debug!(
                        "hot cycle: fingerprint {:#018x} repeated at step {}, window starts at snapshot {}",
                        fingerprint,
                        step,
                        start
                    );
                    return offending;
                }
            }
        }

        self.index
            .entry(fingerprint)
            .or_default()
            .push(self.snapshots.len());
        self.snapshots.push(Snapshot {
            statuses: statuses.to_vec(),
        });
        Vec::new()
    }

    /// Monitors hot somewhere and cold nowhere in `snapshots[start..]` plus
    /// the closing statuses.
    fn offending_in_window(&self, start: usize, closing: &[MonitorStatus]) -> Vec<usize> {
        let window = self.snapshots[start..]
            .iter()
            .map(|s| s.statuses.as_slice())
            .chain(std::iter::once(closing));
        let mut hot = vec![false; closing.len()];
        let mut cold = vec![false; closing.len()];
        for statuses in window {
            for (m, status) in statuses.iter().enumerate() {
                match status {
                    MonitorStatus::Hot => hot[m] = true,
                    MonitorStatus::Cold => cold[m] = true,
                    MonitorStatus::Neutral => {}
                }
            }
        }
        (0..closing.len())
            .filter(|&m| hot[m] && !cold[m])
            .collect()
    }
}

/// Monitors still hot when the program has quiesced. A pending obligation at
/// termination is a liveness violation regardless of cycles.
pub fn hot_at_termination(statuses: &[MonitorStatus]) -> Vec<usize> {
    statuses
        .iter()
        .enumerate()
        .filter(|(_, s)| **s == MonitorStatus::Hot)
        .map(|(m, _)| m)
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use MonitorStatus::{Cold, Hot, Neutral};

    #[test]
    fn hot_cycle_is_reported() {
        let mut detector = CycleDetector::new(1);
        assert!(detector.observe(0, 100, &[Hot]).is_empty());
        assert!(detector.observe(1, 200, &[Hot]).is_empty());
        // Fingerprint 100 repeats; the monitor was hot in every snapshot of
        // the window and never cold.
        assert_eq!(detector.observe(2, 100, &[Hot]), vec![0]);
    }

    #[test]
    fn cold_state_in_window_discharges_the_monitor() {
        let mut detector = CycleDetector::new(1);
        assert!(detector.observe(0, 100, &[Hot]).is_empty());
        assert!(detector.observe(1, 200, &[Cold]).is_empty());
        assert!(detector.observe(2, 100, &[Hot]).is_empty());
    }

    #[test]
    fn neutral_monitor_never_offends() {
        let mut detector = CycleDetector::new(1);
        assert!(detector.observe(0, 100, &[Neutral, Hot]).is_empty());
        assert_eq!(detector.observe(1, 100, &[Neutral, Hot]), vec![1]);
    }

    #[test]
    fn interval_skips_intermediate_steps() {
        let mut detector = CycleDetector::new(3);
        assert!(detector.observe(0, 100, &[Hot]).is_empty());
        // Steps off the interval are not recorded, even with a repeat.
        assert!(detector.observe(1, 100, &[Hot]).is_empty());
        assert!(detector.observe(2, 100, &[Hot]).is_empty());
        assert_eq!(detector.observe(3, 100, &[Hot]), vec![0]);
    }

    #[test]
    fn reset_forgets_snapshots() {
        let mut detector = CycleDetector::new(1);
        assert!(detector.observe(0, 100, &[Hot]).is_empty());
        detector.reset();
        assert!(detector.observe(0, 100, &[Hot]).is_empty());
    }

    #[test]
    fn hot_at_termination_names_only_hot_monitors() {
        assert_eq!(hot_at_termination(&[Cold, Hot, Neutral, Hot]), vec![1, 3]);
        assert!(hot_at_termination(&[Cold, Neutral]).is_empty());
    }
}
