//! Pluggable exploration strategies.
//!
//! A [`Strategy`] owns every point of nondeterminism in an iteration: which
//! enabled operation runs next and what each "random" boolean/integer choice
//! returns. The scheduler feeds it only non-empty enabled sets (empty sets
//! are handled as quiescence or livelock before the strategy is consulted).

mod delay;
mod dfs;
mod random;
mod replay;

pub use delay::DelayBoundingStrategy;
pub use dfs::DfsStrategy;
pub use random::RandomStrategy;
pub use replay::ReplayStrategy;

use crate::registry::Id;

/// Why a strategy declined to pick an operation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StrategyError {
    /// The strategy has nothing further to explore along this path; the
    /// iteration ends without a bug.
    Exhausted,
    /// A replayed schedule disagrees with the program's behavior. Fatal
    /// tooling error.
    Mismatch(String),
}

/// The contract every exploration strategy implements.
///
/// A strategy lives across iterations: between iterations the driver calls
/// [`Strategy::prepare_for_next_iteration`], which returns `false` once the
/// strategy has nothing more to explore (e.g. DFS exhausted the tree).
pub trait Strategy: Send {
    /// Picks the next operation among `enabled` (non-empty, id-ordered).
    /// `current` is the operation scheduled by the previous decision.
    fn next_operation(&mut self, enabled: &[Id], current: Id) -> Result<Id, StrategyError>;

    /// Returns the next nondeterministic boolean.
    fn next_bool(&mut self) -> Result<bool, StrategyError>;

    /// Returns the next nondeterministic integer in `0..max`.
    fn next_int(&mut self, max: u64) -> Result<u64, StrategyError>;

    /// Rewinds per-iteration state and advances exploration. Returns `false`
    /// when exploration is complete and the driver should stop.
    fn prepare_for_next_iteration(&mut self) -> bool;

    /// Forgets all accumulated exploration state.
    fn reset(&mut self);

    /// A human-readable description, surfaced in logs and reports so that a
    /// run can be reproduced (e.g. it includes the seed for random search).
    fn description(&self) -> String;

    /// Whether the strategy gives every enabled operation a chance over any
    /// infinite execution. Fair strategies are suitable for liveness
    /// checking.
    fn is_fair(&self) -> bool;
}
