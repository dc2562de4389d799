//! Private module for selective re-export.

use std::sync::Arc;

use parking_lot::MutexGuard;

use crate::error::Failure;
use crate::event::{Event, EventType, Payload};
use crate::machine::MachineDecl;
use crate::registry::{Id, OperationKind, OperationStatus};
use crate::runtime::scheduler::{ActorCore, Effect, Engine, Entry, Kernel, Turn};
use crate::runtime::{Outcome, Signal};
use crate::strategy::StrategyError;
use crate::trace::TraceStep;

/// The context handed to the test entry point. Identical to the handler
/// context: the entry runs as a machine of its own (the harness).
pub type Runtime<'a, 'b> = Context<'a, 'b>;

#[derive(Clone, Copy)]
enum ActorRef {
    Machine(Id),
    Monitor(usize),
}

/// A machine's (or monitor's) handle into the engine, passed to every
/// action. All engine state is behind the turn-token mutex; a context only
/// exists while its thread holds the token, so field access needs no further
/// synchronization.
pub struct Context<'a, 'b> {
    kernel: &'b Arc<Kernel>,
    guard: &'a mut MutexGuard<'b, Engine>,
    host: Id,
    actor: ActorRef,
}

fn wait_for_turn(kernel: &Kernel, guard: &mut MutexGuard<'_, Engine>, me: Id) -> Result<(), Signal> {
    loop {
        if guard.cancelled {
            return Err(Signal::Cancelled);
        }
        if guard.turn == Turn::Machine(me) {
            return Ok(());
        }
        kernel.cv.wait(guard);
    }
}

impl<'a, 'b> Context<'a, 'b> {
    /// Thread body of the harness: waits for its first release, then runs
    /// the test entry once.
    pub(super) fn run_harness(
        kernel: &'b Arc<Kernel>,
        guard: &'a mut MutexGuard<'b, Engine>,
        id: Id,
        entry: &Entry,
    ) -> Outcome {
        wait_for_turn(kernel, guard, id)?;
        let mut ctx = Context {
            kernel,
            guard,
            host: id,
            actor: ActorRef::Machine(id),
        };
        entry(&mut ctx)
    }

    /// Thread body of a created machine: start entry action first, then one
    /// dequeue-and-dispatch unit per release until halted.
    pub(super) fn run_machine(
        kernel: &'b Arc<Kernel>,
        guard: &'a mut MutexGuard<'b, Engine>,
        id: Id,
    ) -> Outcome {
        wait_for_turn(kernel, guard, id)?;
        let mut ctx = Context {
            kernel,
            guard,
            host: id,
            actor: ActorRef::Machine(id),
        };
        ctx.run_entry(None)?;
        loop {
            if ctx.host_halted() {
                return Ok(());
            }
            ctx.await_next_turn()?;
            if let Some(event) = ctx.guard.dequeue(id) {
                ctx.dispatch(event)?;
            }
        }
    }

    // ----- user API ---------------------------------------------------

    /// The machine this context belongs to.
    pub fn id(&self) -> Id {
        match self.actor {
            ActorRef::Machine(id) => id,
            ActorRef::Monitor(_) => self.host,
        }
    }

    /// Creates a machine from `decl` and returns its id. The new machine's
    /// start action runs when the scheduler first releases it, not here.
    /// Suspension point.
    pub fn create_machine(&mut self, decl: &Arc<MachineDecl>) -> Result<Id, Signal> {
        self.machine_only("create_machine")?;
        let id = self.guard.add_machine(decl.clone());
        self.kernel.spawn_machine(id);
        self.guard.registry.set_kind(self.host, OperationKind::Create);
        self.yield_turn()?;
        Ok(id)
    }

    /// Sends `event` to `target`'s queue. Sending to a halted machine drops
    /// the event silently. Suspension point.
    pub fn send(&mut self, target: Id, event: Event) -> Outcome {
        self.machine_only("send")?;
        log::trace!(
            "{} sends '{}' to {}",
            self.guard.machines[usize::from(self.host)].core.name,
            event.ty,
            target
        );
        self.guard.enqueue(target, event);
        self.guard.registry.set_kind(self.host, OperationKind::Send);
        self.yield_turn()
    }

    /// Waits mid-action for an event whose type is in `types`, bypassing the
    /// current state's transition tables. If a matching event is already
    /// queued it is taken immediately without a scheduling point; otherwise
    /// the operation blocks until a matching send arrives.
    pub fn receive(&mut self, types: &[EventType]) -> Result<Event, Signal> {
        self.machine_only("receive")?;
        let me = self.host;
        loop {
            let m = &mut self.guard.machines[usize::from(me)];
            if let Some(pos) = m.queue.iter().position(|e| types.contains(&e.ty)) {
                if let Some(event) = m.queue.remove(pos) {
                    return Ok(event);
                }
            }
            {
                let op = self.guard.registry.op_mut(me);
                op.status = OperationStatus::BlockedOnReceive;
                op.kind = OperationKind::Receive;
                op.awaiting = Some(types.to_vec());
            }
            log::trace!(
                "{} blocked waiting to receive {:?}",
                self.guard.machines[usize::from(me)].core.name,
                types
            );
            self.yield_turn()?;
            self.guard.registry.op_mut(me).awaiting = None;
        }
    }

    /// Draws a nondeterministic boolean from the strategy. Suspension point.
    pub fn random_bool(&mut self) -> Result<bool, Signal> {
        self.machine_only("random_bool")?;
        let value = match self.guard.strategy.next_bool() {
            Ok(value) => value,
            Err(error) => return self.choice_failed(error),
        };
        self.guard.trace.push(TraceStep::Bool { value });
        self.guard.steps += 1;
        self.yield_turn()?;
        Ok(value)
    }

    /// Draws a nondeterministic integer in `0..max` from the strategy.
    /// Suspension point.
    pub fn random_int(&mut self, max: u64) -> Result<u64, Signal> {
        self.machine_only("random_int")?;
        let value = match self.guard.strategy.next_int(max) {
            Ok(value) => value,
            Err(error) => return self.choice_failed(error),
        };
        self.guard.trace.push(TraceStep::Int { value });
        self.guard.steps += 1;
        self.yield_turn()?;
        Ok(value)
    }

    /// Gives up the turn with no other effect. Suspension point.
    pub fn yield_now(&mut self) -> Outcome {
        self.machine_only("yield_now")?;
        self.guard.registry.set_kind(self.host, OperationKind::Yield);
        self.yield_turn()
    }

    /// Raises `event` on the current machine or monitor. The raised event is
    /// dispatched when the action returns, before any queued event.
    pub fn raise(&mut self, event: Event) -> Outcome {
        self.set_effect(Effect::Raise(event), "raise")
    }

    /// Transitions to the named state when the action returns, running the
    /// current state's exit action and the target's entry action.
    pub fn goto_state(&mut self, state: &'static str) -> Outcome {
        let target = self.resolve_state(state)?;
        self.set_effect(Effect::Goto(target), "goto")
    }

    /// Pushes the named state over the current one when the action returns.
    /// No exit action runs; a later [`Context::pop_state`] reinstates the
    /// current state without re-running its entry action.
    pub fn push_state(&mut self, state: &'static str) -> Outcome {
        let target = self.resolve_state(state)?;
        self.set_effect(Effect::Push(target), "push")
    }

    /// Pops back to the state below the current one when the action returns.
    pub fn pop_state(&mut self) -> Outcome {
        self.set_effect(Effect::Pop, "pop")
    }

    /// Halts the machine when the action returns. Pending and future events
    /// are dropped silently.
    pub fn halt(&mut self) -> Outcome {
        self.machine_only("halt")?;
        self.set_effect(Effect::Halt, "halt")
    }

    /// Fails the iteration with an assertion bug unless `condition` holds.
    pub fn require(&mut self, condition: bool, text: impl Into<String>) -> Outcome {
        if condition {
            Ok(())
        } else {
            Err(Signal::Fault(Failure::Assertion(text.into())))
        }
    }

    /// Registers a liveness monitor and synchronously runs its start action.
    pub fn register_monitor(&mut self, decl: &Arc<MachineDecl>) -> Outcome {
        self.machine_only("register_monitor")?;
        let idx = self.guard.add_monitor(decl.clone());
        self.as_monitor(idx, |ctx| ctx.run_entry(None))
    }

    /// Synchronously dispatches `event` to the monitor registered under
    /// `name`. Not a suspension point.
    pub fn notify_monitor(&mut self, name: &str, event: Event) -> Outcome {
        self.machine_only("notify_monitor")?;
        let idx = self
            .guard
            .monitors
            .iter()
            .position(|m| m.core.name == name)
            .ok_or_else(|| {
                Signal::Fault(Failure::Protocol(format!(
                    "no registered monitor named '{}'",
                    name
                )))
            })?;
        log::trace!("monitor {} notified of '{}'", name, event.ty);
        self.as_monitor(idx, |ctx| ctx.dispatch(event))
    }

    /// Stores a local value that participates in the state fingerprint.
    pub fn set_local(&mut self, key: &'static str, value: Payload) {
        self.core_mut().locals.insert(key, value);
    }

    /// Reads back a local value; `Payload::None` if never set.
    pub fn local(&self, key: &'static str) -> Payload {
        self.core().locals.get(key).copied().unwrap_or(Payload::None)
    }

    // ----- turn token -------------------------------------------------

    /// Hands the turn to the scheduler and parks until it comes back.
    fn yield_turn(&mut self) -> Result<(), Signal> {
        let me = self.host;
        if self.guard.turn != Turn::Machine(me) {
            return Err(Signal::Fault(Failure::UncontrolledConcurrency(format!(
                "{} suspended without holding the turn",
                self.guard.machines[usize::from(me)].core.name
            ))));
        }
        self.guard.turn = Turn::Scheduler;
        self.kernel.cv.notify_all();
        loop {
            if self.guard.cancelled {
                return Err(Signal::Cancelled);
            }
            if self.guard.turn == Turn::Machine(me) {
                return Ok(());
            }
            self.kernel.cv.wait(self.guard);
        }
    }

    /// Ends the current unit of work: the machine is marked idle if its
    /// queue holds nothing deliverable, then the turn goes back to the
    /// scheduler until the machine is released again.
    fn await_next_turn(&mut self) -> Result<(), Signal> {
        let me = self.host;
        let deliverable = self.guard.has_deliverable(me);
        let op = self.guard.registry.op_mut(me);
        op.kind = OperationKind::Receive;
        if !deliverable {
            op.status = OperationStatus::Completed;
            log::trace!(
                "{} idle",
                self.guard.machines[usize::from(me)].core.name
            );
        }
        self.yield_turn()
    }

    fn choice_failed<T>(&mut self, error: StrategyError) -> Result<T, Signal> {
        match error {
            StrategyError::Exhausted => {
                self.guard.exhausted = true;
                self.yield_turn()?;
                Err(Signal::Cancelled)
            }
            StrategyError::Mismatch(detail) => {
                Err(Signal::Fault(Failure::ReplayMismatch(detail)))
            }
        }
    }

    // ----- dispatch ---------------------------------------------------

    fn core(&self) -> &ActorCore {
        match self.actor {
            ActorRef::Machine(id) => &self.guard.machines[usize::from(id)].core,
            ActorRef::Monitor(idx) => &self.guard.monitors[idx].core,
        }
    }

    fn core_mut(&mut self) -> &mut ActorCore {
        match self.actor {
            ActorRef::Machine(id) => &mut self.guard.machines[usize::from(id)].core,
            ActorRef::Monitor(idx) => &mut self.guard.monitors[idx].core,
        }
    }

    fn host_halted(&self) -> bool {
        self.guard.machines[usize::from(self.host)].halted
    }

    fn actor_halted(&self) -> bool {
        match self.actor {
            ActorRef::Machine(id) => self.guard.machines[usize::from(id)].halted,
            ActorRef::Monitor(_) => false,
        }
    }

    fn machine_only(&self, what: &str) -> Outcome {
        match self.actor {
            ActorRef::Machine(_) => Ok(()),
            ActorRef::Monitor(idx) => Err(Signal::Fault(Failure::Protocol(format!(
                "monitor {} may not call {}",
                self.guard.monitors[idx].core.name, what
            )))),
        }
    }

    fn as_monitor<R>(&mut self, idx: usize, f: impl FnOnce(&mut Self) -> R) -> R {
        let saved = std::mem::replace(&mut self.actor, ActorRef::Monitor(idx));
        let result = f(self);
        self.actor = saved;
        result
    }

    fn resolve_state(&self, state: &'static str) -> Result<usize, Signal> {
        let core = self.core();
        core.decl.state_id(state).ok_or_else(|| {
            Signal::Fault(Failure::Protocol(format!(
                "{} names unknown state '{}'",
                core.name, state
            )))
        })
    }

    /// Records a transition request to apply when the running action
    /// returns. At most one per action; none at all from exit actions
    /// (except halt).
    fn set_effect(&mut self, effect: Effect, what: &str) -> Outcome {
        let core = self.core_mut();
        if core.in_exit && !matches!(effect, Effect::Halt) {
            return Err(Signal::Fault(Failure::Protocol(format!(
                "{} requested {} inside an exit action",
                core.name, what
            ))));
        }
        if core.pending.is_some() {
            return Err(Signal::Fault(Failure::Protocol(format!(
                "{} requested {} but the action already requested a transition",
                core.name, what
            ))));
        }
        core.pending = Some(effect);
        Ok(())
    }

    /// Dispatches one event against the current state's tables. Raised
    /// events chain through here before any queued event is considered.
    pub(super) fn dispatch(&mut self, event: Event) -> Outcome {
        let decl = self.core().decl.clone();
        let state = decl.state(self.core().current);
        log::trace!(
            "{} handles '{}' in {}",
            self.core().name,
            event.ty,
            state.name()
        );

        if let Some(&target) = state.gotos.get(&event.ty) {
            return self.goto_transition(target, Some(event));
        }
        if let Some(&target) = state.pushes.get(&event.ty) {
            return self.push_transition(target, Some(event));
        }
        if let Some(handler) = state.handlers.get(&event.ty).cloned() {
            handler(self, &event)?;
            return self.apply_pending(Some(&event));
        }
        if state.ignores(event.ty) {
            return Ok(());
        }
        if state.defers(event.ty) {
            // Only reachable for raised events; queued ones are filtered by
            // the dequeue scan.
            return match self.actor {
                ActorRef::Machine(id) => {
                    self.guard.machines[usize::from(id)].queue.push_back(event);
                    Ok(())
                }
                ActorRef::Monitor(_) => self.unhandled(event),
            };
        }
        self.unhandled(event)
    }

    fn unhandled(&self, event: Event) -> Outcome {
        let core = self.core();
        Err(Signal::Fault(Failure::UnhandledEvent {
            machine: core.name.clone(),
            event: event.ty,
            state: core.decl.state(core.current).name().to_string(),
        }))
    }

    /// Runs the current state's entry action (if any) and applies whatever
    /// transition it requested.
    pub(super) fn run_entry(&mut self, trigger: Option<&Event>) -> Outcome {
        let core = self.core();
        let decl = core.decl.clone();
        let state = decl.state(core.current);
        log::trace!("{} enters {}", core.name, state.name());
        if let Some(entry) = state.entry.clone() {
            entry(self, trigger)?;
        }
        self.apply_pending(trigger)
    }

    /// Runs the current state's exit action. A halt requested by the exit
    /// action takes effect immediately; other transitions are rejected by
    /// [`Context::set_effect`].
    fn run_exit(&mut self) -> Outcome {
        let core = self.core();
        let exit = core.decl.state(core.current).exit.clone();
        if let Some(exit) = exit {
            self.core_mut().in_exit = true;
            let result = exit(self);
            self.core_mut().in_exit = false;
            result?;
            if matches!(self.core().pending, Some(Effect::Halt)) {
                self.core_mut().pending = None;
                self.apply_halt()?;
            }
        }
        Ok(())
    }

    fn apply_pending(&mut self, trigger: Option<&Event>) -> Outcome {
        match self.core_mut().pending.take() {
            None => Ok(()),
            Some(Effect::Raise(event)) => self.dispatch(event),
            Some(Effect::Goto(target)) => self.goto_transition(target, trigger.cloned()),
            Some(Effect::Push(target)) => self.push_transition(target, trigger.cloned()),
            Some(Effect::Pop) => self.pop_transition(),
            Some(Effect::Halt) => self.apply_halt(),
        }
    }

    fn goto_transition(&mut self, target: usize, trigger: Option<Event>) -> Outcome {
        self.run_exit()?;
        if self.actor_halted() {
            return Ok(());
        }
        self.core_mut().current = target;
        self.run_entry(trigger.as_ref())
    }

    fn push_transition(&mut self, target: usize, trigger: Option<Event>) -> Outcome {
        let core = self.core_mut();
        let pushed = core.current;
        core.stack.push(pushed);
        core.current = target;
        self.run_entry(trigger.as_ref())
    }

    fn pop_transition(&mut self) -> Outcome {
        self.run_exit()?;
        if self.actor_halted() {
            return Ok(());
        }
        let core = self.core_mut();
        match core.stack.pop() {
            Some(previous) => {
                core.current = previous;
                log::trace!(
                    "{} pops back to {}",
                    core.name,
                    core.decl.state(previous).name()
                );
                Ok(())
            }
            None => Err(Signal::Fault(Failure::Protocol(format!(
                "{} popped without a matching push",
                core.name
            )))),
        }
    }

    fn apply_halt(&mut self) -> Outcome {
        match self.actor {
            ActorRef::Machine(id) => {
                let m = &mut self.guard.machines[usize::from(id)];
                log::debug!("{} halts", m.core.name);
                m.halted = true;
                m.queue.clear();
                Ok(())
            }
            ActorRef::Monitor(idx) => Err(Signal::Fault(Failure::Protocol(format!(
                "monitor {} may not halt",
                self.guard.monitors[idx].core.name
            )))),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::machine::MachineDecl;
    use crate::strategy::RandomStrategy;
    use parking_lot::Mutex;

    const GO: EventType = EventType("Go");
    const BACK: EventType = EventType("Back");
    const BOOM: EventType = EventType("Boom");

    /// Builds a kernel with one machine and hands a live context to `f`.
    /// No threads: the test itself plays the machine's turn.
    fn with_context<R>(
        decl: Arc<MachineDecl>,
        f: impl FnOnce(&mut Context<'_, '_>) -> R,
    ) -> R {
        let kernel = Kernel::new(Box::new(RandomStrategy::new(0)), 0, false, true, 1);
        let mut guard = kernel.state.lock();
        let id = guard.add_machine(decl);
        guard.turn = Turn::Machine(id);
        let mut ctx = Context {
            kernel: &kernel,
            guard: &mut guard,
            host: id,
            actor: ActorRef::Machine(id),
        };
        f(&mut ctx)
    }

    #[test]
    fn goto_runs_exit_then_entry() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let (exit_log, entry_log) = (calls.clone(), calls.clone());
        let decl = MachineDecl::builder("Walker")
            .state("A", move |s| {
                let exit_log = exit_log.clone();
                s.start()
                    .on_goto(GO, "B")
                    .on_exit(move |_| {
                        exit_log.lock().push("exit A");
                        Ok(())
                    })
            })
            .state("B", move |s| {
                let entry_log = entry_log.clone();
                s.on_entry(move |_, _| {
                    entry_log.lock().push("enter B");
                    Ok(())
                })
            })
            .build();
        with_context(decl, |ctx| {
            ctx.dispatch(Event::of(GO)).unwrap();
            assert_eq!(ctx.core().current, 1);
        });
        assert_eq!(*calls.lock(), vec!["exit A", "enter B"]);
    }

    #[test]
    fn raised_event_dispatches_before_returning() {
        let decl = MachineDecl::builder("Raiser")
            .state("A", |s| {
                s.start()
                    .on(GO, |ctx, _| ctx.raise(Event::of(BACK)))
                    .on_goto(BACK, "B")
            })
            .state("B", |s| s)
            .build();
        with_context(decl, |ctx| {
            ctx.dispatch(Event::of(GO)).unwrap();
            assert_eq!(ctx.core().current, 1);
        });
    }

    #[test]
    fn pop_reinstates_pushed_state_without_entry() {
        let entries = Arc::new(Mutex::new(0));
        let counter = entries.clone();
        let decl = MachineDecl::builder("Stacker")
            .state("A", move |s| {
                let counter = counter.clone();
                s.start()
                    .on_push(GO, "B")
                    .on_entry(move |_, _| {
                        *counter.lock() += 1;
                        Ok(())
                    })
            })
            .state("B", |s| s.on(BACK, |ctx, _| ctx.pop_state()))
            .build();
        with_context(decl, |ctx| {
            ctx.run_entry(None).unwrap();
            ctx.dispatch(Event::of(GO)).unwrap();
            assert_eq!(ctx.core().current, 1);
            ctx.dispatch(Event::of(BACK)).unwrap();
            assert_eq!(ctx.core().current, 0);
        });
        // Entry ran once at start; the pop must not re-run it.
        assert_eq!(*entries.lock(), 1);
    }

    #[test]
    fn pop_without_push_is_a_protocol_failure() {
        let decl = MachineDecl::builder("Popper")
            .state("A", |s| s.start().on(GO, |ctx, _| ctx.pop_state()))
            .build();
        let result = with_context(decl, |ctx| ctx.dispatch(Event::of(GO)));
        assert!(matches!(
            result,
            Err(Signal::Fault(Failure::Protocol(_)))
        ));
    }

    #[test]
    fn transition_inside_exit_action_is_a_protocol_failure() {
        let decl = MachineDecl::builder("BadExit")
            .state("A", |s| {
                s.start()
                    .on_goto(GO, "B")
                    .on_exit(|ctx| ctx.goto_state("B"))
            })
            .state("B", |s| s)
            .build();
        let result = with_context(decl, |ctx| ctx.dispatch(Event::of(GO)));
        assert!(matches!(
            result,
            Err(Signal::Fault(Failure::Protocol(_)))
        ));
    }

    #[test]
    fn unhandled_event_names_machine_and_state() {
        let decl = MachineDecl::builder("Deaf")
            .state("Quiet", |s| s.start())
            .build();
        let result = with_context(decl, |ctx| ctx.dispatch(Event::of(BOOM)));
        match result {
            Err(Signal::Fault(Failure::UnhandledEvent {
                machine, event, state,
            })) => {
                assert_eq!(machine, "Deaf(0)");
                assert_eq!(event, BOOM);
                assert_eq!(state, "Quiet");
            }
            other => panic!("expected unhandled event, got {:?}", other.err()),
        }
    }

    #[test]
    fn halt_drops_queued_events() {
        let decl = MachineDecl::builder("Mortal")
            .state("A", |s| s.start().on(GO, |ctx, _| ctx.halt()))
            .build();
        with_context(decl, |ctx| {
            let id = ctx.host;
            ctx.guard.enqueue(id, Event::of(BOOM));
            ctx.dispatch(Event::of(GO)).unwrap();
            assert!(ctx.host_halted());
            assert!(ctx.guard.machines[usize::from(id)].queue.is_empty());
        });
    }

    #[test]
    fn locals_default_to_none() {
        let decl = MachineDecl::builder("Counter")
            .state("A", |s| s.start())
            .build();
        with_context(decl, |ctx| {
            assert_eq!(ctx.local("n"), Payload::None);
            ctx.set_local("n", Payload::Int(3));
            assert_eq!(ctx.local("n"), Payload::Int(3));
        });
    }
}
