//! Serialized execution of machine programs.
//!
//! Machines run on real OS threads, but at most one of them makes progress
//! at a time: a single mutex/condvar pair implements a turn token that the
//! scheduler hands to exactly one machine per step. Every operation that
//! could interleave with another machine (create, send, receive, yield,
//! nondeterministic choices) suspends at the token, which makes the
//! cross-machine order exactly the strategy's choice sequence and therefore
//! recordable and replayable.

mod context;
mod scheduler;

pub use context::{Context, Runtime};
pub use scheduler::ObservedOp;
pub(crate) use scheduler::{Entry, IterationOutput, Kernel};

use crate::error::Failure;

/// Why user code must stop running. Propagated with `?` out of every action
/// back to the machine's thread loop; nothing unwinds past the iteration
/// boundary.
#[derive(Debug)]
pub enum Signal {
    /// The iteration is over (bug found elsewhere, quiescence, step bound,
    /// or strategy exhaustion). Unwind without further side effects.
    Cancelled,
    /// This thread detected a failure. The scheduler keeps the first one
    /// per iteration.
    Fault(Failure),
}

/// What every machine action returns.
pub type Outcome = Result<(), Signal>;
