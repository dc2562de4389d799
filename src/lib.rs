//! A systematic concurrency testing engine for message-passing state
//! machines.
//!
//! A test declares machines ([`MachineDecl`]) that exchange [`Event`]s, and
//! an entry point that creates them. [`TestRunner`] executes the entry point
//! many times under a scheduler that owns every source of nondeterminism:
//! which machine runs next, and what every "random" choice returns. A
//! pluggable [`Strategy`] picks those choices, which lets the same test be
//! explored randomly, exhaustively (depth-first with backtracking), with
//! delay bounding, or replayed step for step from a recorded [`Schedule`].
//!
//! Detected failures (assertion violations, unhandled events, protocol
//! misuse, livelocks, and liveness violations flagged by hot/cold monitors)
//! come with the schedule that reproduces them exactly.
//!
//! # Example
//!
//! ```
//! use rehearse::{Config, Event, EventType, MachineDecl, StrategyKind, TestRunner};
//!
//! const PING: EventType = EventType("Ping");
//! const PONG: EventType = EventType("Pong");
//!
//! let ponger = MachineDecl::builder("Ponger")
//!     .state("Serving", |s| {
//!         s.start().on(PING, |cx, ev| {
//!             let requester = ev.payload.as_id().expect("ping carries the sender");
//!             cx.send(requester, Event::of(PONG))
//!         })
//!     })
//!     .build();
//!
//! let mut runner = TestRunner::new(Config {
//!     strategy: StrategyKind::Dfs,
//!     iterations: 100,
//!     ..Config::default()
//! });
//! let report = runner
//!     .run(move |cx| {
//!         let ponger = cx.create_machine(&ponger)?;
//!         cx.send(ponger, Event::with_id(PING, cx.id()))
//!     })
//!     .unwrap();
//! assert_eq!(report.bugs_found, 0);
//! ```

mod error;
mod event;
mod liveness;
mod machine;
mod registry;
mod report;
mod runner;
mod runtime;
mod strategy;
mod trace;

#[cfg(test)]
mod test_util;

pub use error::Failure;
pub use event::{Event, EventType, Payload};
pub use machine::{
    EntryAction, ExitAction, Handler, MachineDecl, MachineDeclBuilder, StateBuilder,
    StateDescriptor, StateId,
};
pub use registry::{Id, OperationKind, OperationStatus};
pub use report::TestReport;
pub use runner::{Config, StrategyKind, TestRunner};
pub use runtime::{Context, ObservedOp, Outcome, Runtime, Signal};
pub use strategy::{
    DelayBoundingStrategy, DfsStrategy, RandomStrategy, ReplayStrategy, Strategy, StrategyError,
};
pub use trace::{Schedule, TraceStep};

use std::hash::{Hash, Hasher};

/// A hash of the global program state, used to recognize revisited states
/// within an iteration. Never persisted across iterations or runs.
pub type Fingerprint = u64;

/// Hashing that is stable across processes and executions, for fingerprints
/// that participate in reproducibility.
mod stable {
    use ahash::{AHasher, RandomState};
    use std::hash::BuildHasher;

    pub(crate) fn hasher() -> AHasher {
        RandomState::with_seeds(1, 2, 3, 4).build_hasher()
    }
}

/// Converts a value to a [`Fingerprint`].
pub fn fingerprint<T: Hash>(value: &T) -> Fingerprint {
    let mut hasher = stable::hasher();
    value.hash(&mut hasher);
    hasher.finish()
}
