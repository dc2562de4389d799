//! Private module for selective re-export.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::registry::Id;
use crate::strategy::{Strategy, StrategyError};

/// Delay-bounded scheduling.
///
/// The deterministic baseline schedule keeps running the current operation,
/// falling over to the next enabled one in round-robin order only when it
/// blocks. A small budget of delay points perturbs that baseline: whenever
/// the step counter hits a delay point, the pick is pushed one further along
/// the round-robin order. Delay point positions are drawn uniformly over the
/// longest schedule observed so far and re-randomized every iteration, so a
/// budget of `k` delays explores the schedules reachable with at most `k`
/// deviations from the baseline.
pub struct DelayBoundingStrategy {
    max_delays: usize,
    seed: u64,
    rng: StdRng,
    /// Longest schedule length seen across iterations; the sample space for
    /// delay point positions.
    schedule_length: usize,
    steps: usize,
    remaining_delays: Vec<usize>,
}

impl DelayBoundingStrategy {
    pub fn new(max_delays: usize, seed: u64) -> Self {
        DelayBoundingStrategy {
            max_delays,
            seed,
            rng: StdRng::seed_from_u64(seed),
            schedule_length: 0,
            steps: 0,
            remaining_delays: Vec::new(),
        }
    }
}

impl Strategy for DelayBoundingStrategy {
    fn next_operation(&mut self, enabled: &[Id], current: Id) -> Result<Id, StrategyError> {
        // Round-robin order starting at the current operation, so that with
        // no delays the current operation keeps running while enabled. When
        // it blocks, the baseline moves to the next operation after it in
        // round-robin order, wrapping past the highest id.
        let start = enabled.iter().position(|id| *id >= current).unwrap_or(0);
        let mut idx = 0;
        while self.remaining_delays.first() == Some(&self.steps) {
            idx = (idx + 1) % enabled.len();
            self.remaining_delays.remove(0);
            log::trace!(
                "inserted delay at step {}, {} remaining",
                self.steps,
                self.remaining_delays.len()
            );
        }
        self.steps += 1;
        Ok(enabled[(start + idx) % enabled.len()])
    }

    fn next_bool(&mut self) -> Result<bool, StrategyError> {
        let mut next = false;
        if self.remaining_delays.first() == Some(&self.steps) {
            next = true;
            self.remaining_delays.remove(0);
        }
        self.steps += 1;
        Ok(next)
    }

    fn next_int(&mut self, max: u64) -> Result<u64, StrategyError> {
        self.steps += 1;
        Ok(self.rng.gen_range(0..max.max(1)))
    }

    fn prepare_for_next_iteration(&mut self) -> bool {
        self.schedule_length = self.schedule_length.max(self.steps);
        self.steps = 0;
        self.remaining_delays = (0..self.max_delays)
            .map(|_| self.rng.gen_range(0..self.schedule_length.max(1)))
            .collect();
        self.remaining_delays.sort_unstable();
        true
    }

    fn reset(&mut self) {
        self.rng = StdRng::seed_from_u64(self.seed);
        self.schedule_length = 0;
        self.steps = 0;
        self.remaining_delays.clear();
    }

    fn description(&self) -> String {
        format!("delay-bounding ({} delays, seed {})", self.max_delays, self.seed)
    }

    fn is_fair(&self) -> bool {
        false
    }
}
