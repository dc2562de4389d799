//! Private module for selective re-export.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::registry::Id;
use crate::strategy::{Strategy, StrategyError};

/// Uniformly samples among enabled operations and choice values using a
/// seeded generator. With a fixed seed the produced decision sequence is
/// identical across runs.
pub struct RandomStrategy {
    seed: u64,
    rng: StdRng,
}

impl RandomStrategy {
    pub fn new(seed: u64) -> Self {
        RandomStrategy {
            seed,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// The seed this strategy was created with.
    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl Strategy for RandomStrategy {
    fn next_operation(&mut self, enabled: &[Id], _current: Id) -> Result<Id, StrategyError> {
        let idx = self.rng.gen_range(0..enabled.len());
        Ok(enabled[idx])
    }

    fn next_bool(&mut self) -> Result<bool, StrategyError> {
        Ok(self.rng.gen())
    }

    fn next_int(&mut self, max: u64) -> Result<u64, StrategyError> {
        Ok(self.rng.gen_range(0..max.max(1)))
    }

    fn prepare_for_next_iteration(&mut self) -> bool {
        // The generator keeps advancing so each iteration explores a fresh
        // interleaving while the overall run stays a function of the seed.
        true
    }

    fn reset(&mut self) {
        self.rng = StdRng::seed_from_u64(self.seed);
    }

    fn description(&self) -> String {
        format!("random (seed {})", self.seed)
    }

    fn is_fair(&self) -> bool {
        true
    }
}
