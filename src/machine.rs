//! Declaration of machines: states, transition tables, and actions.
//!
//! A machine is declared once as a [`MachineDecl`]: a set of named states,
//! each with an optional entry/exit action and tagged-variant transition
//! tables (goto, push, do, ignored, deferred) keyed by [`EventType`]. The
//! tables are built up front by [`MachineDecl::builder`] and are immutable
//! afterwards, so dispatch at run time is a plain map lookup.
//!
//! ## Example
//!
//! ```
//! use rehearse::*;
//!
//! const PING: EventType = EventType("Ping");
//!
//! let decl = MachineDecl::builder("Ponger")
//!     .state("Serving", |s| {
//!         s.start().on(PING, |cx, ev| {
//!             let src = ev.payload.as_id().expect("ping carries sender");
//!             cx.send(src, Event::of(EventType("Pong")))
//!         })
//!     })
//!     .build();
//! assert_eq!(decl.name(), "Ponger");
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

use crate::event::EventType;
use crate::runtime::{Context, Outcome};
use crate::Event;

/// Index of a state within its [`MachineDecl`].
pub type StateId = usize;

/// An action bound to an event in a state's do-table.
pub type Handler = Arc<dyn for<'a, 'b> Fn(&mut Context<'a, 'b>, &Event) -> Outcome + Send + Sync>;

/// An action run when a state is entered. Receives the event that triggered
/// the transition, or `None` when the machine starts.
pub type EntryAction =
    Arc<dyn for<'a, 'b> Fn(&mut Context<'a, 'b>, Option<&Event>) -> Outcome + Send + Sync>;

/// An action run when a state is exited via a goto or pop transition.
pub type ExitAction = Arc<dyn for<'a, 'b> Fn(&mut Context<'a, 'b>) -> Outcome + Send + Sync>;

/// Immutable per-state dispatch tables, built once at declaration time.
pub struct StateDescriptor {
    pub(crate) name: &'static str,
    pub(crate) entry: Option<EntryAction>,
    pub(crate) exit: Option<ExitAction>,
    pub(crate) gotos: BTreeMap<EventType, StateId>,
    pub(crate) pushes: BTreeMap<EventType, StateId>,
    pub(crate) handlers: BTreeMap<EventType, Handler>,
    pub(crate) ignored: BTreeSet<EventType>,
    pub(crate) deferred: BTreeSet<EventType>,
    pub(crate) is_start: bool,
    pub(crate) is_hot: bool,
    pub(crate) is_cold: bool,
}

impl StateDescriptor {
    /// The state's declared name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the event type is silently dropped in this state.
    pub fn ignores(&self, ty: EventType) -> bool {
        self.ignored.contains(&ty)
    }

    /// Whether the event type is left queued but skipped in this state.
    pub fn defers(&self, ty: EventType) -> bool {
        self.deferred.contains(&ty)
    }

    /// Whether this state handles the event type at all (goto, push, or do).
    pub fn handles(&self, ty: EventType) -> bool {
        self.gotos.contains_key(&ty)
            || self.pushes.contains_key(&ty)
            || self.handlers.contains_key(&ty)
    }
}

impl Debug for StateDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateDescriptor")
            .field("name", &self.name)
            .field("gotos", &self.gotos)
            .field("pushes", &self.pushes)
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .field("ignored", &self.ignored)
            .field("deferred", &self.deferred)
            .field("is_start", &self.is_start)
            .field("is_hot", &self.is_hot)
            .field("is_cold", &self.is_cold)
            .finish()
    }
}

/// The immutable declaration of a machine (or monitor): its states and their
/// transition tables. Shared between all instances created from it.
pub struct MachineDecl {
    name: &'static str,
    states: Vec<StateDescriptor>,
    start: StateId,
}

impl MachineDecl {
    /// Starts declaring a machine with the given type name.
    pub fn builder(name: &'static str) -> MachineDeclBuilder {
        MachineDeclBuilder {
            name,
            states: Vec::new(),
        }
    }

    /// The machine's type name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The id of the declared start state.
    pub fn start_state(&self) -> StateId {
        self.start
    }

    /// The descriptor for a state id. Ids are handed out by this decl, so the
    /// index is always in bounds.
    pub fn state(&self, id: StateId) -> &StateDescriptor {
        &self.states[id]
    }

    /// Number of declared states.
    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    pub(crate) fn state_id(&self, name: &str) -> Option<StateId> {
        self.states.iter().position(|s| s.name == name)
    }
}

impl Debug for MachineDecl {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("MachineDecl")
            .field("name", &self.name)
            .field("states", &self.states)
            .field("start", &self.start)
            .finish()
    }
}

/// Accumulates one state's tables before [`MachineDeclBuilder::build`]
/// resolves goto/push targets by name.
pub struct StateBuilder {
    name: &'static str,
    entry: Option<EntryAction>,
    exit: Option<ExitAction>,
    gotos: BTreeMap<EventType, &'static str>,
    pushes: BTreeMap<EventType, &'static str>,
    handlers: BTreeMap<EventType, Handler>,
    ignored: BTreeSet<EventType>,
    deferred: BTreeSet<EventType>,
    is_start: bool,
    is_hot: bool,
    is_cold: bool,
}

impl StateBuilder {
    /// Marks this state as the machine's start state. Exactly one state per
    /// machine must be marked.
    pub fn start(mut self) -> Self {
        self.is_start = true;
        self
    }

    /// Marks a monitor state as hot: an execution must not stay within hot
    /// states forever.
    pub fn hot(mut self) -> Self {
        self.is_hot = true;
        self
    }

    /// Marks a monitor state as cold: visiting it discharges any pending hot
    /// obligation.
    pub fn cold(mut self) -> Self {
        self.is_cold = true;
        self
    }

    /// Runs `action` when the state is entered.
    pub fn on_entry<F>(mut self, action: F) -> Self
    where
        F: for<'a, 'b> Fn(&mut Context<'a, 'b>, Option<&Event>) -> Outcome + Send + Sync + 'static,
    {
        self.entry = Some(Arc::new(action));
        self
    }

    /// Runs `action` when the state is exited via goto or pop. Exit actions
    /// must not raise, goto, push, pop, or halt.
    pub fn on_exit<F>(mut self, action: F) -> Self
    where
        F: for<'a, 'b> Fn(&mut Context<'a, 'b>) -> Outcome + Send + Sync + 'static,
    {
        self.exit = Some(Arc::new(action));
        self
    }

    /// Runs `action` when an event of type `ty` is dispatched in this state.
    pub fn on<F>(mut self, ty: EventType, action: F) -> Self
    where
        F: for<'a, 'b> Fn(&mut Context<'a, 'b>, &Event) -> Outcome + Send + Sync + 'static,
    {
        self.reserve(ty);
        self.handlers.insert(ty, Arc::new(action));
        self
    }

    /// Transitions to `target` (running exit then entry actions) when an
    /// event of type `ty` is dispatched in this state.
    pub fn on_goto(mut self, ty: EventType, target: &'static str) -> Self {
        self.reserve(ty);
        self.gotos.insert(ty, target);
        self
    }

    /// Pushes `target` over this state (no exit action runs) when an event of
    /// type `ty` is dispatched. A later `pop` reinstates this state.
    pub fn on_push(mut self, ty: EventType, target: &'static str) -> Self {
        self.reserve(ty);
        self.pushes.insert(ty, target);
        self
    }

    /// Silently drops events of type `ty` while in this state.
    pub fn ignore(mut self, ty: EventType) -> Self {
        self.reserve(ty);
        self.ignored.insert(ty);
        self
    }

    /// Leaves events of type `ty` queued but skips them while in this state.
    pub fn defer(mut self, ty: EventType) -> Self {
        self.reserve(ty);
        self.deferred.insert(ty);
        self
    }

    fn reserve(&self, ty: EventType) {
        assert!(
            !self.gotos.contains_key(&ty)
                && !self.pushes.contains_key(&ty)
                && !self.handlers.contains_key(&ty)
                && !self.ignored.contains(&ty)
                && !self.deferred.contains(&ty),
            "state '{}' already declares a policy for event '{}'",
            self.name,
            ty
        );
    }
}

/// Builder for [`MachineDecl`]. Declaration mistakes (duplicate states,
/// missing start state, unknown transition targets) panic with a message
/// naming the offending state, since they are programming errors in the test
/// itself rather than run-time conditions.
pub struct MachineDeclBuilder {
    name: &'static str,
    states: Vec<StateBuilder>,
}

impl MachineDeclBuilder {
    /// Declares a state and its tables.
    pub fn state<F>(mut self, name: &'static str, f: F) -> Self
    where
        F: FnOnce(StateBuilder) -> StateBuilder,
    {
        assert!(
            self.states.iter().all(|s| s.name != name),
            "machine '{}' declares state '{}' twice",
            self.name,
            name
        );
        let builder = StateBuilder {
            name,
            entry: None,
            exit: None,
            gotos: BTreeMap::new(),
            pushes: BTreeMap::new(),
            handlers: BTreeMap::new(),
            ignored: BTreeSet::new(),
            deferred: BTreeSet::new(),
            is_start: false,
            is_hot: false,
            is_cold: false,
        };
        self.states.push(f(builder));
        self
    }

    /// Resolves transition targets and freezes the declaration.
    pub fn build(self) -> Arc<MachineDecl> {
        assert!(
            !self.states.is_empty(),
            "machine '{}' declares no states",
            self.name
        );
        let start_states: Vec<_> = self
            .states
            .iter()
            .filter(|s| s.is_start)
            .map(|s| s.name)
            .collect();
        assert!(
            start_states.len() == 1,
            "machine '{}' must declare exactly one start state, found {:?}",
            self.name,
            start_states
        );

        let resolve = |machine: &'static str, state: &'static str, target: &'static str| {
            self.states
                .iter()
                .position(|s| s.name == target)
                .unwrap_or_else(|| {
                    panic!(
                        "machine '{}', state '{}': transition target '{}' is not a declared state",
                        machine, state, target
                    )
                })
        };

        let mut states = Vec::with_capacity(self.states.len());
        let mut start = 0;
        for (id, s) in self.states.iter().enumerate() {
            assert!(
                !(s.is_hot && s.is_cold),
                "machine '{}', state '{}': a state cannot be both hot and cold",
                self.name,
                s.name
            );
            if s.is_start {
                start = id;
            }
            states.push(StateDescriptor {
                name: s.name,
                entry: s.entry.clone(),
                exit: s.exit.clone(),
                gotos: s
                    .gotos
                    .iter()
                    .map(|(ty, target)| (*ty, resolve(self.name, s.name, target)))
                    .collect(),
                pushes: s
                    .pushes
                    .iter()
                    .map(|(ty, target)| (*ty, resolve(self.name, s.name, target)))
                    .collect(),
                handlers: s.handlers.clone(),
                ignored: s.ignored.clone(),
                deferred: s.deferred.clone(),
                is_start: s.is_start,
                is_hot: s.is_hot,
                is_cold: s.is_cold,
            });
        }

        Arc::new(MachineDecl {
            name: self.name,
            states,
            start,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const PING: EventType = EventType("Ping");
    const PONG: EventType = EventType("Pong");

    #[test]
    fn builds_transition_tables() {
        let decl = MachineDecl::builder("M")
            .state("A", |s| {
                s.start()
                    .on_goto(PING, "B")
                    .defer(PONG)
            })
            .state("B", |s| s.ignore(PING).on(PONG, |_cx, _ev| Ok(())))
            .build();

        assert_eq!(decl.start_state(), decl.state_id("A").unwrap());
        let a = decl.state(decl.state_id("A").unwrap());
        assert_eq!(a.gotos.get(&PING), Some(&decl.state_id("B").unwrap()));
        assert!(a.defers(PONG));
        let b = decl.state(decl.state_id("B").unwrap());
        assert!(b.ignores(PING));
        assert!(b.handles(PONG));
    }

    #[test]
    #[should_panic(expected = "exactly one start state")]
    fn rejects_missing_start_state() {
        MachineDecl::builder("M").state("A", |s| s).build();
    }

    #[test]
    #[should_panic(expected = "not a declared state")]
    fn rejects_unknown_goto_target() {
        MachineDecl::builder("M")
            .state("A", |s| s.start().on_goto(PING, "Nowhere"))
            .build();
    }

    #[test]
    #[should_panic(expected = "already declares a policy")]
    fn rejects_conflicting_policies_for_one_event() {
        MachineDecl::builder("M")
            .state("A", |s| s.start().ignore(PING).on_goto(PING, "A"))
            .build();
    }

    #[test]
    #[should_panic(expected = "both hot and cold")]
    fn rejects_hot_and_cold_state() {
        MachineDecl::builder("M")
            .state("A", |s| s.start().hot().cold())
            .build();
    }
}
