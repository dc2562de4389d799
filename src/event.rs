//! Private module for selective re-export.

use std::fmt::{self, Debug, Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::Id;

/// Identifies a kind of event. Machines declare their transition tables in
/// terms of event types, and payloads ride along with each instance.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct EventType(pub &'static str);

impl Debug for EventType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl Display for EventType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// The data carried by an [`Event`].
///
/// Payloads are a small closed set rather than a generic parameter so that the
/// engine can hash every machine's queue into a global state fingerprint
/// without imposing trait bounds on user types.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    /// No payload.
    #[default]
    None,
    /// A boolean payload.
    Bool(bool),
    /// An integer payload.
    Int(i64),
    /// A machine id payload, typically the sender.
    Id(Id),
}

impl Payload {
    /// Extracts an integer payload, or `None` for the other variants.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Payload::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Extracts a machine id payload, or `None` for the other variants.
    pub fn as_id(&self) -> Option<Id> {
        match self {
            Payload::Id(id) => Some(*id),
            _ => None,
        }
    }
}

/// A message exchanged between machines, or raised within one.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize)]
pub struct Event {
    /// The event type, which transition tables key on.
    pub ty: EventType,
    /// The payload riding along with this instance.
    pub payload: Payload,
}

impl Event {
    /// An event with no payload.
    pub fn of(ty: EventType) -> Self {
        Event {
            ty,
            payload: Payload::None,
        }
    }

    /// An event carrying an arbitrary payload.
    pub fn with(ty: EventType, payload: Payload) -> Self {
        Event { ty, payload }
    }

    /// An event carrying an integer.
    pub fn with_int(ty: EventType, value: i64) -> Self {
        Event::with(ty, Payload::Int(value))
    }

    /// An event carrying a machine id, typically the sender.
    pub fn with_id(ty: EventType, id: Id) -> Self {
        Event::with(ty, Payload::Id(id))
    }
}
