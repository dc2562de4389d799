//! Private module for selective re-export.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crate::report::TestReport;
use crate::runtime::{Context, Entry, Kernel, ObservedOp, Outcome};
use crate::strategy::{
    DelayBoundingStrategy, DfsStrategy, RandomStrategy, ReplayStrategy, Strategy,
};
use crate::trace::Schedule;

/// Which exploration strategy drives the run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StrategyKind {
    /// Uniform random scheduling from a seed.
    Random,
    /// Exhaustive depth-first search with backtracking.
    Dfs,
    /// Round-robin schedules perturbed by a budget of delay points.
    DelayBounding { delays: usize },
    /// Step-for-step replay of the schedule in [`Config::schedule_file`].
    Replay,
}

/// Settings for a test run.
#[derive(Clone, Debug)]
pub struct Config {
    pub strategy: StrategyKind,
    /// Upper bound on iterations; exploration may stop earlier when the
    /// strategy is exhausted or enough bugs were found.
    pub iterations: usize,
    /// Scheduling steps after which an iteration is abandoned (not a bug).
    /// Zero means unbounded.
    pub max_steps: usize,
    /// Check liveness monitors for hot cycles and hot termination.
    pub check_liveness: bool,
    /// Fingerprint program states for cycle detection. Turning this off
    /// reduces liveness checking to the hot-at-termination test.
    pub cache_program_state: bool,
    /// Steps between fingerprint snapshots. Coarser intervals are cheaper
    /// but can miss short cycles.
    pub fingerprint_interval: usize,
    /// Seed for the random and delay-bounding strategies.
    pub seed: u64,
    /// Schedule to replay. Required by [`StrategyKind::Replay`].
    pub schedule_file: Option<PathBuf>,
    /// Where to write the first bug's reproducing schedule.
    pub schedule_output: Option<PathBuf>,
    /// Stop after this many bugs. Zero behaves as one.
    pub bugs_to_find: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            strategy: StrategyKind::Random,
            iterations: 100,
            max_steps: 10_000,
            check_liveness: false,
            cache_program_state: true,
            fingerprint_interval: 1,
            seed: 0,
            schedule_file: None,
            schedule_output: None,
            bugs_to_find: 1,
        }
    }
}

/// Drives a test entry point through many scheduled iterations and
/// accumulates a [`TestReport`].
pub struct TestRunner {
    config: Config,
    observed: Vec<ObservedOp>,
}

impl TestRunner {
    pub fn new(config: Config) -> Self {
        TestRunner {
            config,
            observed: Vec::new(),
        }
    }

    /// Runs `entry` for up to the configured number of iterations. Stops
    /// early once the bug budget is met or the strategy has explored
    /// everything.
    pub fn run<F>(&mut self, entry: F) -> io::Result<TestReport>
    where
        F: for<'a, 'b> Fn(&mut Context<'a, 'b>) -> Outcome + Send + Sync + 'static,
    {
        let entry: Entry = Arc::new(entry);
        let mut strategy = self.build_strategy()?;
        log::info!("starting test run: {}", strategy.description());
        let started = Instant::now();
        let mut report = TestReport::default();
        let bug_budget = self.config.bugs_to_find.max(1);

        for iteration in 0..self.config.iterations.max(1) {
            log::debug!("iteration {}", iteration);
            let kernel = Kernel::new(
                strategy,
                self.config.max_steps,
                self.config.check_liveness,
                self.config.cache_program_state,
                self.config.fingerprint_interval,
            );
            let out = kernel.execute(Arc::clone(&entry));
            strategy = out.strategy;
            self.observed = out.observed;

            if out.exhausted && out.steps == 0 && out.failure.is_none() {
                log::debug!("search space exhausted after {} iterations", iteration);
                break;
            }
            report.record_iteration(out.steps, out.hit_max_steps);

            if let Some(failure) = out.failure {
                if failure.is_unsound() {
                    report.unsound_iterations += 1;
                }
                log::info!("iteration {}: {}", iteration, failure);
                report.record_bug(failure.to_string(), out.schedule.clone());
                if report.bugs_found == 1 {
                    if let Some(path) = &self.config.schedule_output {
                        out.schedule.save(path)?;
                        log::info!("reproducing schedule written to {}", path.display());
                    }
                }
                if report.bugs_found >= bug_budget {
                    break;
                }
            }

            if !strategy.prepare_for_next_iteration() {
                log::debug!("search space exhausted after {} iterations", iteration + 1);
                break;
            }
        }

        report.duration = started.elapsed();
        log::info!("{}", report);
        Ok(report)
    }

    /// The serialized operation order of the last iteration, for external
    /// analyses such as a race detector.
    pub fn observed_operations(&self) -> &[ObservedOp] {
        &self.observed
    }

    fn build_strategy(&self) -> io::Result<Box<dyn Strategy>> {
        Ok(match &self.config.strategy {
            StrategyKind::Random => Box::new(RandomStrategy::new(self.config.seed)),
            StrategyKind::Dfs => Box::new(DfsStrategy::new()),
            StrategyKind::DelayBounding { delays } => {
                Box::new(DelayBoundingStrategy::new(*delays, self.config.seed))
            }
            StrategyKind::Replay => {
                let path = self.config.schedule_file.as_ref().ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "replay requires a schedule file",
                    )
                })?;
                Box::new(ReplayStrategy::new(Schedule::load(path)?))
            }
        })
    }
}
