//! Private module for selective re-export.

use std::collections::{BTreeMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::thread;

use parking_lot::{Condvar, Mutex};
use serde::Serialize;

use crate::error::Failure;
use crate::event::{Event, Payload};
use crate::liveness::{self, CycleDetector, MonitorStatus};
use crate::machine::{MachineDecl, StateId};
use crate::registry::{Id, OperationKind, OperationRegistry, OperationStatus};
use crate::runtime::context::Context;
use crate::runtime::{Outcome, Signal};
use crate::strategy::Strategy;
use crate::trace::{Schedule, TraceStep};
use crate::Fingerprint;

/// The test entry point, run once per iteration on the harness thread.
pub(crate) type Entry = Arc<dyn for<'a, 'b> Fn(&mut Context<'a, 'b>) -> Outcome + Send + Sync>;

/// Who may run user code right now.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(super) enum Turn {
    Scheduler,
    Machine(Id),
}

/// A transition requested by an action, applied after the action returns.
#[derive(Debug)]
pub(super) enum Effect {
    Raise(Event),
    Goto(StateId),
    Push(StateId),
    Pop,
    Halt,
}

/// State shared by machines and monitors: current state, push-stack, and
/// the locals store that participates in fingerprints.
pub(super) struct ActorCore {
    pub(super) name: String,
    pub(super) decl: Arc<MachineDecl>,
    pub(super) current: StateId,
    pub(super) stack: Vec<StateId>,
    pub(super) locals: BTreeMap<&'static str, Payload>,
    pub(super) pending: Option<Effect>,
    pub(super) in_exit: bool,
}

impl ActorCore {
    fn new(name: String, decl: Arc<MachineDecl>) -> Self {
        let current = decl.start_state();
        ActorCore {
            name,
            decl,
            current,
            stack: Vec::new(),
            locals: BTreeMap::new(),
            pending: None,
            in_exit: false,
        }
    }
}

impl Hash for ActorCore {
    fn hash<H: Hasher>(&self, hasher: &mut H) {
        // pending/in_exit are transient within a single turn and always
        // empty when the scheduler fingerprints.
        self.name.hash(hasher);
        self.current.hash(hasher);
        self.stack.hash(hasher);
        self.locals.hash(hasher);
    }
}

pub(super) struct MachineInstance {
    pub(super) core: ActorCore,
    pub(super) queue: VecDeque<Event>,
    pub(super) halted: bool,
}

impl MachineInstance {
    fn new(name: String, decl: Arc<MachineDecl>) -> Self {
        MachineInstance {
            core: ActorCore::new(name, decl),
            queue: VecDeque::new(),
            halted: false,
        }
    }
}

impl Hash for MachineInstance {
    fn hash<H: Hasher>(&self, hasher: &mut H) {
        self.core.hash(hasher);
        self.queue.hash(hasher);
        self.halted.hash(hasher);
    }
}

pub(super) struct MonitorInstance {
    pub(super) core: ActorCore,
}

impl Hash for MonitorInstance {
    fn hash<H: Hasher>(&self, hasher: &mut H) {
        self.core.hash(hasher);
    }
}

/// One scheduled operation, as observed during the last iteration. Consumed
/// by external analyses (e.g. a race detector) that post-process the
/// serialized order.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct ObservedOp {
    /// The operation (equivalently, machine) that was released.
    pub op: Id,
    /// What the machine did with the turn.
    pub kind: OperationKind,
    /// Zero-based step index within the iteration.
    pub step: usize,
}

/// Everything a single iteration mutates, owned by the turn-token mutex.
pub(super) struct Engine {
    pub(super) machines: Vec<MachineInstance>,
    pub(super) monitors: Vec<MonitorInstance>,
    pub(super) registry: OperationRegistry,
    pub(super) strategy: Box<dyn Strategy>,
    pub(super) detector: CycleDetector,
    pub(super) turn: Turn,
    pub(super) current: Id,
    pub(super) steps: usize,
    pub(super) max_steps: usize,
    pub(super) hit_max_steps: bool,
    pub(super) check_liveness: bool,
    pub(super) cache_state: bool,
    pub(super) cancelled: bool,
    pub(super) exhausted: bool,
    pub(super) failure: Option<Failure>,
    pub(super) trace: Schedule,
    pub(super) observed: Vec<ObservedOp>,
}

impl Engine {
    fn new(
        strategy: Box<dyn Strategy>,
        max_steps: usize,
        check_liveness: bool,
        cache_state: bool,
        fingerprint_interval: usize,
    ) -> Self {
        Engine {
            machines: Vec::new(),
            monitors: Vec::new(),
            registry: OperationRegistry::default(),
            strategy,
            detector: CycleDetector::new(fingerprint_interval),
            turn: Turn::Scheduler,
            current: Id::from(0),
            steps: 0,
            max_steps,
            hit_max_steps: false,
            check_liveness,
            cache_state,
            cancelled: false,
            exhausted: false,
            failure: None,
            trace: Schedule::default(),
            observed: Vec::new(),
        }
    }

    /// Registers a machine and its operation, which starts out enabled so
    /// the strategy can schedule its start action.
    pub(super) fn add_machine(&mut self, decl: Arc<MachineDecl>) -> Id {
        let id = self.registry.register();
        let name = format!("{}({})", decl.name(), id);
        log::debug!("created machine {}", name);
        self.machines.push(MachineInstance::new(name, decl));
        id
    }

    pub(super) fn add_monitor(&mut self, decl: Arc<MachineDecl>) -> usize {
        let idx = self.monitors.len();
        log::debug!("registered monitor {}", decl.name());
        self.monitors.push(MonitorInstance {
            core: ActorCore::new(decl.name().to_string(), decl),
        });
        idx
    }

    /// Keeps the first failure of the iteration.
    pub(super) fn set_failure(&mut self, failure: Failure) {
        if self.failure.is_none() {
            log::debug!("step {}: {}", self.steps, failure);
            self.failure = Some(failure);
        }
    }

    /// Delivers `event` to `target`'s queue, or drops it if the target has
    /// halted or ignores the event type in its current state. Re-enables an
    /// idle target, and unblocks an explicit receive awaiting this type.
    pub(super) fn enqueue(&mut self, target: Id, event: Event) {
        let m = &mut self.machines[usize::from(target)];
        if m.halted {
            log::trace!("dropping '{}' sent to halted {}", event.ty, m.core.name);
            return;
        }
        let op = self.registry.op_mut(target);
        if op.status == OperationStatus::BlockedOnReceive {
            let unblocks = op
                .awaiting
                .as_ref()
                .map_or(true, |tys| tys.contains(&event.ty));
            m.queue.push_back(event);
            if unblocks {
                op.status = OperationStatus::Enabled;
            }
            return;
        }
        if m.core.decl.state(m.core.current).ignores(event.ty) {
            log::trace!("{} ignores '{}'", m.core.name, event.ty);
            return;
        }
        m.queue.push_back(event);
        if op.status == OperationStatus::Completed {
            op.status = OperationStatus::Enabled;
            op.kind = OperationKind::Receive;
        }
    }

    /// Removes and returns the first deliverable event of `id`'s queue:
    /// events ignored in the *current* state are dropped by the scan,
    /// deferred ones are left in place and skipped.
    pub(super) fn dequeue(&mut self, id: Id) -> Option<Event> {
        let m = &mut self.machines[usize::from(id)];
        let decl = m.core.decl.clone();
        let mut i = 0;
        while i < m.queue.len() {
            let ty = m.queue[i].ty;
            let state = decl.state(m.core.current);
            if state.ignores(ty) {
                log::trace!("{} drops ignored '{}'", m.core.name, ty);
                m.queue.remove(i);
            } else if state.defers(ty) {
                i += 1;
            } else {
                return m.queue.remove(i);
            }
        }
        None
    }

    /// Whether any queued event could be delivered in the current state.
    /// Like the dequeue scan, this drops events the current state ignores.
    pub(super) fn has_deliverable(&mut self, id: Id) -> bool {
        let m = &mut self.machines[usize::from(id)];
        let decl = m.core.decl.clone();
        let mut i = 0;
        while i < m.queue.len() {
            let ty = m.queue[i].ty;
            let state = decl.state(m.core.current);
            if state.ignores(ty) {
                m.queue.remove(i);
            } else if state.defers(ty) {
                i += 1;
            } else {
                return true;
            }
        }
        false
    }

    /// Hashes the full scheduling configuration. The registry participates
    /// so that two steps differing only in operation status (say, a machine
    /// going idle) never collide and fake a cycle.
    pub(super) fn fingerprint(&self) -> Fingerprint {
        crate::fingerprint(&(&self.machines, &self.monitors, &self.registry))
    }

    pub(super) fn monitor_statuses(&self) -> Vec<MonitorStatus> {
        self.monitors
            .iter()
            .map(|m| {
                let state = m.core.decl.state(m.core.current);
                if state.is_hot {
                    MonitorStatus::Hot
                } else if state.is_cold {
                    MonitorStatus::Cold
                } else {
                    MonitorStatus::Neutral
                }
            })
            .collect()
    }

    fn monitor_names(&self, indices: &[usize]) -> Vec<String> {
        indices
            .iter()
            .map(|&i| self.monitors[i].core.name.clone())
            .collect()
    }

    fn machine_names(&self, ids: &[Id]) -> Vec<String> {
        ids.iter()
            .map(|&id| self.machines[usize::from(id)].core.name.clone())
            .collect()
    }
}

/// Results handed back to the driver when an iteration's threads have all
/// been joined.
pub(crate) struct IterationOutput {
    pub strategy: Box<dyn Strategy>,
    pub failure: Option<Failure>,
    pub steps: usize,
    pub hit_max_steps: bool,
    pub exhausted: bool,
    pub schedule: Schedule,
    pub observed: Vec<ObservedOp>,
}

/// The turn token and the threads parked on it. One kernel per iteration.
pub(crate) struct Kernel {
    pub(super) state: Mutex<Engine>,
    pub(super) cv: Condvar,
    threads: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl Kernel {
    pub(crate) fn new(
        strategy: Box<dyn Strategy>,
        max_steps: usize,
        check_liveness: bool,
        cache_state: bool,
        fingerprint_interval: usize,
    ) -> Arc<Kernel> {
        Arc::new(Kernel {
            state: Mutex::new(Engine::new(
                strategy,
                max_steps,
                check_liveness,
                cache_state,
                fingerprint_interval,
            )),
            cv: Condvar::new(),
            threads: Mutex::new(Vec::new()),
        })
    }

    /// Runs one iteration to completion: spawns the harness, drives the
    /// scheduling loop until quiescence, a failure, the step bound, or
    /// strategy exhaustion, then cancels and joins every machine thread.
    pub(crate) fn execute(self: Arc<Self>, entry: Entry) -> IterationOutput {
        self.spawn_harness(entry);
        self.scheduler_loop();

        let handles: Vec<_> = self.threads.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }

        let kernel = Arc::try_unwrap(self)
            .ok()
            .expect("machine threads joined, no other kernel handles remain");
        let engine = kernel.state.into_inner();
        IterationOutput {
            strategy: engine.strategy,
            failure: engine.failure,
            steps: engine.steps,
            hit_max_steps: engine.hit_max_steps,
            exhausted: engine.exhausted,
            schedule: engine.trace,
            observed: engine.observed,
        }
    }

    fn spawn_harness(self: &Arc<Self>, entry: Entry) {
        let decl = MachineDecl::builder("TestHarness")
            .state("Run", |s| s.start())
            .build();
        let id = self.state.lock().add_machine(decl);
        let kernel = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("harness".to_string())
            .spawn(move || {
                let mut guard = kernel.state.lock();
                let outcome = Context::run_harness(&kernel, &mut guard, id, &entry);
                Kernel::finish(&kernel, &mut guard, id, outcome);
            })
            .expect("failed to spawn harness thread");
        self.threads.lock().push(handle);
    }

    /// Spawns the thread backing a newly created machine. The thread blocks
    /// until the scheduler first releases the machine's start operation.
    pub(super) fn spawn_machine(self: &Arc<Self>, id: Id) {
        let kernel = Arc::clone(self);
        let handle = thread::Builder::new()
            .name(format!("machine-{}", id))
            .spawn(move || {
                let mut guard = kernel.state.lock();
                let outcome = Context::run_machine(&kernel, &mut guard, id);
                Kernel::finish(&kernel, &mut guard, id, outcome);
            })
            .expect("failed to spawn machine thread");
        self.threads.lock().push(handle);
    }

    /// Retires a machine whose thread loop returned, recording its failure
    /// (if any) and handing the turn back to the scheduler.
    fn finish(
        kernel: &Kernel,
        guard: &mut parking_lot::MutexGuard<'_, Engine>,
        id: Id,
        outcome: Outcome,
    ) {
        match outcome {
            Ok(()) => log::trace!("{} finished", guard.machines[usize::from(id)].core.name),
            Err(Signal::Cancelled) => return,
            Err(Signal::Fault(failure)) => guard.set_failure(failure),
        }
        guard.registry.complete(id);
        guard.registry.set_kind(id, OperationKind::Stop);
        guard.machines[usize::from(id)].halted = true;
        if guard.turn == Turn::Machine(id) {
            guard.turn = Turn::Scheduler;
            kernel.cv.notify_all();
        }
    }

    /// The scheduling loop. Runs on the driver's thread; owns the turn
    /// between machine releases.
    fn scheduler_loop(&self) {
        let mut guard = self.state.lock();
        loop {
            while guard.turn != Turn::Scheduler {
                self.cv.wait(&mut guard);
            }
            if guard.failure.is_some() || guard.exhausted {
                break;
            }

            let enabled = guard.registry.enabled();
            if enabled.is_empty() {
                let waiting = guard.registry.blocked_on_receive();
                if !waiting.is_empty() {
                    let waiting = guard.machine_names(&waiting);
                    guard.set_failure(Failure::Livelock { waiting });
                } else if guard.check_liveness {
                    let hot = liveness::hot_at_termination(&guard.monitor_statuses());
                    if !hot.is_empty() {
                        let monitors = guard.monitor_names(&hot);
                        guard.set_failure(Failure::Liveness { monitors });
                    } else {
                        log::trace!("quiescence after {} steps", guard.steps);
                    }
                } else {
                    log::trace!("quiescence after {} steps", guard.steps);
                }
                break;
            }

            if guard.max_steps > 0 && guard.steps >= guard.max_steps {
                log::debug!("step bound {} reached", guard.max_steps);
                guard.hit_max_steps = true;
                break;
            }

            if guard.check_liveness && guard.cache_state && !guard.monitors.is_empty() {
                let fingerprint = guard.fingerprint();
                let statuses = guard.monitor_statuses();
                let steps = guard.steps;
                let offending = guard.detector.observe(steps, fingerprint, &statuses);
                if !offending.is_empty() {
                    let monitors = guard.monitor_names(&offending);
                    guard.set_failure(Failure::Liveness { monitors });
                    break;
                }
            }

            let current = guard.current;
            match guard.strategy.next_operation(&enabled, current) {
                Ok(op) => {
                    let kind = guard.registry.op(op).kind;
                    log::trace!(
                        "step {}: releasing {} ({:?})",
                        guard.steps,
                        guard.machines[usize::from(op)].core.name,
                        kind
                    );
                    guard.trace.push(TraceStep::Schedule { op });
                    let step = guard.steps;
                    guard.observed.push(ObservedOp { op, kind, step });
                    guard.steps += 1;
                    guard.current = op;
                    guard.turn = Turn::Machine(op);
                    self.cv.notify_all();
                }
                Err(crate::strategy::StrategyError::Exhausted) => {
                    log::trace!("strategy exhausted at step {}", guard.steps);
                    guard.exhausted = true;
                    break;
                }
                Err(crate::strategy::StrategyError::Mismatch(detail)) => {
                    guard.set_failure(Failure::ReplayMismatch(detail));
                    break;
                }
            }
        }
        guard.cancelled = true;
        self.cv.notify_all();
    }
}
