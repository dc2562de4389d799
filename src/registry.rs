//! Private module for selective re-export.

use std::fmt::{self, Debug, Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::event::EventType;

/// Uniquely identifies a machine and, equivalently, its schedulable
/// operation. Assigned sequentially at creation and never reused.
#[derive(
    Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize,
)]
pub struct Id(u64);

impl Debug for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("Id({})", self.0))
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl From<Id> for usize {
    fn from(id: Id) -> Self {
        id.0 as usize
    }
}

impl From<usize> for Id {
    fn from(u: usize) -> Self {
        Id(u as u64)
    }
}

/// The kind of action a machine will perform when next released by the
/// scheduler.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum OperationKind {
    /// Run the start state's entry action.
    Start,
    /// Create another machine.
    Create,
    /// Send an event to another machine.
    Send,
    /// Dequeue or wait for an event.
    Receive,
    /// Halt the machine.
    Stop,
    /// Yield the turn without any other effect.
    Yield,
}

/// Scheduling status of an operation.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum OperationStatus {
    /// May be chosen by the strategy.
    Enabled,
    /// Waiting for a matching event to be enqueued.
    BlockedOnReceive,
    /// The machine terminated; the operation is defunct.
    Completed,
}

/// One schedulable operation. Owned exclusively by [`OperationRegistry`];
/// the scheduler and machines refer to operations by [`Id`] only.
#[derive(Debug, Hash)]
pub struct Operation {
    pub id: Id,
    pub kind: OperationKind,
    pub status: OperationStatus,
    /// For an explicit blocking receive, the event types that unblock it.
    /// `None` means the default event loop, unblocked by any deliverable
    /// event.
    pub awaiting: Option<Vec<EventType>>,
}

/// Arena of live operations, indexed by [`Id`]. Mutated only by the thread
/// currently holding the turn (or the scheduler itself), so no internal
/// locking is needed.
#[derive(Debug, Default, Hash)]
pub struct OperationRegistry {
    ops: Vec<Operation>,
}

impl OperationRegistry {
    /// Registers a fresh operation in `Start`/`Enabled` state, returning its
    /// id. Ids are dense and creation-ordered, which keeps enabled sets
    /// deterministic across iterations.
    pub fn register(&mut self) -> Id {
        let id = Id::from(self.ops.len());
        self.ops.push(Operation {
            id,
            kind: OperationKind::Start,
            status: OperationStatus::Enabled,
            awaiting: None,
        });
        id
    }

    pub fn op(&self, id: Id) -> &Operation {
        &self.ops[usize::from(id)]
    }

    pub fn op_mut(&mut self, id: Id) -> &mut Operation {
        &mut self.ops[usize::from(id)]
    }

    /// The enabled operations in id order.
    pub fn enabled(&self) -> Vec<Id> {
        self.ops
            .iter()
            .filter(|op| op.status == OperationStatus::Enabled)
            .map(|op| op.id)
            .collect()
    }

    /// The operations blocked waiting to receive, in id order.
    pub fn blocked_on_receive(&self) -> Vec<Id> {
        self.ops
            .iter()
            .filter(|op| op.status == OperationStatus::BlockedOnReceive)
            .map(|op| op.id)
            .collect()
    }

    /// Marks the operation as performing `kind` at its next release.
    pub fn set_kind(&mut self, id: Id, kind: OperationKind) {
        self.op_mut(id).kind = kind;
    }

    pub fn set_status(&mut self, id: Id, status: OperationStatus) {
        self.op_mut(id).status = status;
    }

    /// Retires the operation once its machine has terminated.
    pub fn complete(&mut self, id: Id) {
        let op = self.op_mut(id);
        op.status = OperationStatus::Completed;
        op.awaiting = None;
    }
}
