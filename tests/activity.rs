use serial_test::serial;
use simkern::net::activity::Activity;
use simkern::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering::SeqCst};
use std::sync::{Arc, Mutex};

#[test]
#[serial]
fn three_waits_advance_time() {
    let hits = Arc::new(Mutex::new(Vec::new()));

    let mut sim = Sim::new(());
    let hits_inner = hits.clone();
    sim.node(
        "waiter",
        Activity::new(move |ctx| {
            let hits = hits_inner.clone();
            async move {
                for _ in 0..3 {
                    ctx.wait(Duration::from_secs(2)).await;
                    hits.lock().unwrap().push(SimTime::now().as_secs_f64());
                }
            }
        }),
    );

    let result = Runtime::new_with(sim, RuntimeOptions::seeded(7)).run();

    // exactly three wakeup self-messages were processed
    assert_eq!(result.reason, TerminationReason::NoMoreEvents);
    assert_eq!(result.event_count, 3);
    assert_eq!(result.time, SimTime::from(6.0));
    assert_eq!(*hits.lock().unwrap(), [2.0, 4.0, 6.0]);
}

#[test]
#[serial]
fn receive_resolves_to_delivered_messages() {
    let seen = Arc::new(Mutex::new(Vec::new()));

    let mut sim = Sim::new(());
    let seen_inner = seen.clone();
    let receiver = sim.node(
        "receiver",
        Activity::new(move |ctx| {
            let seen = seen_inner.clone();
            async move {
                let first = ctx.receive().await;
                let second = ctx.receive().await;
                seen.lock()
                    .unwrap()
                    .push((first.header().kind, second.header().kind));
            }
        }),
    );

    let mut rt = Runtime::new_with(sim, RuntimeOptions::seeded(7));
    rt.handle_message_on(receiver.clone(), Message::new().kind(1), SimTime::from(1.0));
    rt.handle_message_on(receiver, Message::new().kind(2), SimTime::from(2.0));
    let result = rt.run();

    assert_eq!(result.reason, TerminationReason::NoMoreEvents);
    assert_eq!(*seen.lock().unwrap(), [(1, 2)]);
}

#[test]
#[serial]
fn receive_timeout_returns_none_when_idle() {
    let outcomes = Arc::new(Mutex::new(Vec::new()));

    let mut sim = Sim::new(());
    let outcomes_inner = outcomes.clone();
    let receiver = sim.node(
        "receiver",
        Activity::new(move |ctx| {
            let outcomes = outcomes_inner.clone();
            async move {
                // a message arrives at t=1, before the deadline
                let first = ctx.receive_timeout(Duration::from_secs(2)).await;
                outcomes
                    .lock()
                    .unwrap()
                    .push((SimTime::now().as_secs_f64(), first.is_some()));

                // nothing arrives anymore
                let second = ctx.receive_timeout(Duration::from_secs(2)).await;
                outcomes
                    .lock()
                    .unwrap()
                    .push((SimTime::now().as_secs_f64(), second.is_some()));
            }
        }),
    );

    let mut rt = Runtime::new_with(sim, RuntimeOptions::seeded(7));
    rt.handle_message_on(receiver, Message::new().kind(1), SimTime::from(1.0));
    let result = rt.run();

    assert_eq!(result.reason, TerminationReason::NoMoreEvents);
    assert_eq!(*outcomes.lock().unwrap(), [(1.0, true), (3.0, false)]);
}

#[test]
#[serial]
fn wait_keeps_foreign_messages_queued() {
    let seen = Arc::new(Mutex::new(Vec::new()));

    let mut sim = Sim::new(());
    let seen_inner = seen.clone();
    let receiver = sim.node(
        "receiver",
        Activity::new(move |ctx| {
            let seen = seen_inner.clone();
            async move {
                ctx.wait(Duration::from_secs(5)).await;
                // the message that arrived mid-wait is still there
                let msg = ctx.receive().await;
                seen.lock()
                    .unwrap()
                    .push((SimTime::now().as_secs_f64(), msg.header().kind));
            }
        }),
    );

    let mut rt = Runtime::new_with(sim, RuntimeOptions::seeded(7));
    rt.handle_message_on(receiver, Message::new().kind(9), SimTime::from(2.0));
    let result = rt.run();

    assert_eq!(result.reason, TerminationReason::NoMoreEvents);
    assert_eq!(*seen.lock().unwrap(), [(5.0, 9)]);
}

#[test]
#[serial]
fn cancelled_activity_unwinds_through_drop() {
    struct Canary {
        flag: Arc<AtomicBool>,
    }
    impl Drop for Canary {
        fn drop(&mut self) {
            self.flag.store(true, SeqCst);
        }
    }

    let dropped = Arc::new(AtomicBool::new(false));

    let mut sim = Sim::new(());
    let flag = dropped.clone();
    sim.node(
        "stuck",
        Activity::new(move |ctx| {
            let canary = Canary { flag: flag.clone() };
            async move {
                let _canary = canary;
                // blocks forever, the guard is released on teardown
                let _ = ctx.receive().await;
            }
        }),
    );

    let result = Runtime::new_with(sim, RuntimeOptions::seeded(7)).run();
    assert!(!dropped.load(SeqCst));

    drop(result);
    assert!(dropped.load(SeqCst));
}

#[test]
#[serial]
fn activities_and_handlers_interoperate() {
    let seen = Arc::new(Mutex::new(Vec::new()));

    let mut sim = Sim::new(());
    let seen_inner = seen.clone();
    let client = sim.node(
        "client",
        Activity::new(move |ctx| {
            let seen = seen_inner.clone();
            async move {
                ctx.wait(Duration::from_secs(1)).await;
                send(Message::new().kind(1), ("port$o", 0));
                let reply = ctx.receive().await;
                seen.lock()
                    .unwrap()
                    .push((SimTime::now().as_secs_f64(), reply.header().kind));
            }
        }),
    );
    sim.node(
        "server",
        HandlerFn::new(|msg: Message| {
            send(Message::new().kind(msg.header().kind + 1), ("port$o", 0));
        }),
    );

    sim.connect(
        "client",
        "server",
        Some(ChannelMetrics::new(0, Duration::from_millis(500))),
    );
    let _ = client;

    let result = Runtime::new_with(sim, RuntimeOptions::seeded(7)).run();
    assert_eq!(result.reason, TerminationReason::NoMoreEvents);
    assert_eq!(*seen.lock().unwrap(), [(2.0, 2)]);
}
