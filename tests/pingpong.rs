use serial_test::serial;
use simkern::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering::SeqCst};
use std::sync::Arc;

#[test]
#[serial]
fn ping_pong_terminates_at_time_limit() {
    let mut sim = Sim::new(());

    let a_count = Arc::new(AtomicUsize::new(0));
    let b_count = Arc::new(AtomicUsize::new(0));

    let a_inner = a_count.clone();
    let a = sim.node(
        "a",
        HandlerFn::new(move |_msg| {
            a_inner.fetch_add(1, SeqCst);
            send(Message::new(), ("port$o", 0));
        }),
    );
    let b_inner = b_count.clone();
    sim.node(
        "b",
        HandlerFn::new(move |_msg| {
            b_inner.fetch_add(1, SeqCst);
            send(Message::new(), ("port$o", 0));
        }),
    );

    sim.connect(
        "a",
        "b",
        Some(ChannelMetrics::new(0, Duration::from_secs(1))),
    );

    let mut rt = Runtime::new_with(
        sim,
        RuntimeOptions::seeded(123).max_time(SimTime::from(3.0)),
    );
    rt.handle_message_on(a, Message::new(), SimTime::ZERO);

    let result = rt.run();

    // t=0 a handles, t=1 b handles, t=2 a handles; the t=3 event is
    // not delivered anymore
    assert_eq!(result.reason, TerminationReason::TimeLimitReached);
    assert_eq!(result.event_count, 3);
    assert_eq!(result.time, SimTime::from(2.0));
    assert_eq!(a_count.load(SeqCst), 2);
    assert_eq!(b_count.load(SeqCst), 1);
}

#[test]
#[serial]
fn ping_pong_message_metadata() {
    let mut sim = Sim::new(());

    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));

    let seen_inner = seen.clone();
    let a = sim.node(
        "a",
        HandlerFn::new(move |_msg| {
            send(Message::new().kind(4), ("port$o", 0));
        }),
    );
    sim.node(
        "b",
        HandlerFn::new(move |msg: Message| {
            seen_inner.lock().unwrap().push((
                msg.header().kind,
                msg.header().sender_module_id,
                msg.header().arrival_time,
                msg.header().arrival_gate_id.is_some(),
            ));
        }),
    );

    sim.connect(
        "a",
        "b",
        Some(ChannelMetrics::new(0, Duration::from_millis(250))),
    );

    let a_id = a.id();
    let mut rt = Runtime::new_with(sim, RuntimeOptions::seeded(1));
    rt.handle_message_on(a, Message::new(), SimTime::ZERO);

    let result = rt.run();
    assert_eq!(result.reason, TerminationReason::NoMoreEvents);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    let (kind, sender, arrival, has_gate) = seen[0];
    assert_eq!(kind, 4);
    assert_eq!(sender, a_id);
    assert_eq!(arrival, SimTime::from(0.25));
    assert!(has_gate);
}
