//! Utility functions for tests.

use std::sync::Arc;

use crate::{Event, EventType, Id, MachineDecl, Outcome, Payload, Runtime};

pub const PING: EventType = EventType("Ping");
pub const PONG: EventType = EventType("Pong");
pub const INIT: EventType = EventType("Init");
pub const TICK: EventType = EventType("Tick");
pub const FIRST: EventType = EventType("First");
pub const SECOND: EventType = EventType("Second");
pub const NEVER: EventType = EventType("Never");
pub const WORK: EventType = EventType("Work");
pub const DONE: EventType = EventType("Done");

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A client that plays `rounds` request-response exchanges with a server
/// machine and then halts. Free of bugs under every schedule.
pub fn ping_pong_entry(
    rounds: i64,
) -> impl for<'a, 'b> Fn(&mut Runtime<'a, 'b>) -> Outcome + Send + Sync + 'static {
    move |cx| {
        let server = MachineDecl::builder("PingServer")
            .state("Serve", |s| {
                s.start().on(PING, |cx, ev| {
                    let requester = ev.payload.as_id().expect("ping carries the sender");
                    cx.send(requester, Event::of(PONG))
                })
            })
            .build();
        let client = MachineDecl::builder("PingClient")
            .state("Idle", |s| {
                s.start().on(INIT, |cx, ev| {
                    cx.set_local("server", ev.payload);
                    cx.goto_state("Round")
                })
            })
            .state("Round", move |s| {
                s.on_entry(|cx, _| {
                    let sent = cx.local("sent").as_int().unwrap_or(0);
                    cx.set_local("sent", Payload::Int(sent + 1));
                    let server = cx.local("server").as_id().expect("init names the server");
                    let me = cx.id();
                    cx.send(server, Event::with_id(PING, me))
                })
                .on(PONG, move |cx, _| {
                    if cx.local("sent").as_int().unwrap_or(0) < rounds {
                        cx.goto_state("Round")
                    } else {
                        cx.halt()
                    }
                })
            })
            .build();
        let server = cx.create_machine(&server)?;
        let client = cx.create_machine(&client)?;
        cx.send(client, Event::with_id(INIT, server))
    }
}

fn sender_decl(name: &'static str, ty: EventType, target: Id) -> Arc<MachineDecl> {
    MachineDecl::builder(name)
        .state("Fire", move |s| {
            s.start().on_entry(move |cx, _| {
                cx.send(target, Event::of(ty))?;
                cx.halt()
            })
        })
        .build()
}

/// Two machines race to deliver to a collector that only accepts `First`
/// before `Second`. The bug surfaces under schedules that run the second
/// sender first.
pub fn racy_entry() -> impl for<'a, 'b> Fn(&mut Runtime<'a, 'b>) -> Outcome + Send + Sync + 'static
{
    |cx| {
        let collector = MachineDecl::builder("Collector")
            .state("Empty", |s| s.start().on_goto(FIRST, "Loaded"))
            .state("Loaded", |s| s.on(SECOND, |cx, _| cx.halt()))
            .build();
        let collector = cx.create_machine(&collector)?;
        cx.create_machine(&sender_decl("FirstSender", FIRST, collector))?;
        cx.create_machine(&sender_decl("SecondSender", SECOND, collector))?;
        Ok(())
    }
}

/// A machine that blocks forever on an event nobody sends.
pub fn waiter_entry() -> impl for<'a, 'b> Fn(&mut Runtime<'a, 'b>) -> Outcome + Send + Sync + 'static
{
    |cx| {
        let waiter = MachineDecl::builder("Waiter")
            .state("Parked", |s| {
                s.start().on_entry(|cx, _| {
                    let _ = cx.receive(&[NEVER])?;
                    Ok(())
                })
            })
            .build();
        cx.create_machine(&waiter)?;
        Ok(())
    }
}

fn spinner_decl() -> Arc<MachineDecl> {
    MachineDecl::builder("Spinner")
        .state("Spin", |s| {
            s.start().on(TICK, |cx, _| {
                let me = cx.id();
                cx.send(me, Event::of(TICK))
            })
        })
        .build()
}

/// A machine that posts to itself forever.
pub fn spinner_entry() -> impl for<'a, 'b> Fn(&mut Runtime<'a, 'b>) -> Outcome + Send + Sync + 'static
{
    |cx| {
        let spinner = cx.create_machine(&spinner_decl())?;
        cx.send(spinner, Event::of(TICK))
    }
}

/// The spinner plus a monitor whose hot obligation is never discharged.
pub fn hot_spinner_entry(
) -> impl for<'a, 'b> Fn(&mut Runtime<'a, 'b>) -> Outcome + Send + Sync + 'static {
    |cx| {
        let progress = MachineDecl::builder("Progress")
            .state("Waiting", |s| s.start().hot().on_goto(DONE, "Finished"))
            .state("Finished", |s| s.cold())
            .build();
        cx.register_monitor(&progress)?;
        let spinner = cx.create_machine(&spinner_decl())?;
        cx.send(spinner, Event::of(TICK))
    }
}

/// A ticker that heats and cools a monitor on alternating ticks, forever.
/// The monitor starts hot, so it is also hot across the setup steps.
pub fn pulsing_monitor_entry(
) -> impl for<'a, 'b> Fn(&mut Runtime<'a, 'b>) -> Outcome + Send + Sync + 'static {
    |cx| {
        let pulse = MachineDecl::builder("Pulse")
            .state("Beat", |s| s.start().hot().on_goto(DONE, "Rest"))
            .state("Rest", |s| s.cold().on_goto(WORK, "Beat"))
            .build();
        cx.register_monitor(&pulse)?;
        let ticker = MachineDecl::builder("Ticker")
            .state("Run", |s| {
                s.start().on(TICK, |cx, _| {
                    if cx.local("phase").as_int().unwrap_or(0) == 0 {
                        cx.set_local("phase", Payload::Int(1));
                        cx.notify_monitor("Pulse", Event::of(DONE))?;
                    } else {
                        cx.set_local("phase", Payload::Int(0));
                        cx.notify_monitor("Pulse", Event::of(WORK))?;
                    }
                    let me = cx.id();
                    cx.send(me, Event::of(TICK))
                })
            })
            .build();
        let ticker = cx.create_machine(&ticker)?;
        cx.send(ticker, Event::of(TICK))
    }
}

/// Registers a hot monitor and terminates without discharging it.
pub fn hot_termination_entry(
) -> impl for<'a, 'b> Fn(&mut Runtime<'a, 'b>) -> Outcome + Send + Sync + 'static {
    |cx| {
        let obligation = MachineDecl::builder("Obligation")
            .state("Pending", |s| s.start().hot().on_goto(DONE, "Met"))
            .state("Met", |s| s.cold())
            .build();
        cx.register_monitor(&obligation)
    }
}

/// Heats a monitor and cools it again before terminating.
pub fn discharged_monitor_entry(
) -> impl for<'a, 'b> Fn(&mut Runtime<'a, 'b>) -> Outcome + Send + Sync + 'static {
    |cx| {
        let courier = MachineDecl::builder("Courier")
            .state("Idle", |s| s.start().on_goto(WORK, "Busy"))
            .state("Busy", |s| s.hot().on_goto(DONE, "Delivered"))
            .state("Delivered", |s| s.cold())
            .build();
        cx.register_monitor(&courier)?;
        cx.notify_monitor("Courier", Event::of(WORK))?;
        cx.notify_monitor("Courier", Event::of(DONE))
    }
}

/// Sends to a machine that halts itself on start. Either ordering of the
/// send and the halt must be silent.
pub fn halt_then_send_entry(
) -> impl for<'a, 'b> Fn(&mut Runtime<'a, 'b>) -> Outcome + Send + Sync + 'static {
    |cx| {
        let ephemeral = MachineDecl::builder("Ephemeral")
            .state("Gone", |s| s.start().on_entry(|cx, _| cx.halt()))
            .build();
        let ephemeral = cx.create_machine(&ephemeral)?;
        cx.send(ephemeral, Event::of(PING))
    }
}
