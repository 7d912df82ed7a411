use serial_test::serial;
use simkern::net::eventlog::{decode_message, encode_message};
use simkern::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering::SeqCst};
use std::sync::Arc;

#[test]
#[serial]
fn module_panic_surfaces_as_internal_error() {
    let mut sim = Sim::new(());
    let module = sim.node(
        "faulty",
        HandlerFn::new(|_| {
            panic!("queue invariant broken");
        }),
    );

    let mut rt = Runtime::new_with(sim, RuntimeOptions::seeded(3));
    rt.handle_message_on(module, Message::new(), SimTime::ZERO);
    let result = rt.run();

    match &result.reason {
        TerminationReason::Error(SimError::Internal { reason }) => {
            assert!(reason.contains("queue invariant broken"));
        }
        other => panic!("expected an internal error, found: {other:?}"),
    }
    assert_eq!(result.exit_code(), 1);
}

#[test]
#[serial]
fn no_events_are_delivered_after_an_error() {
    let delivered = Arc::new(AtomicUsize::new(0));

    let mut sim = Sim::new(());
    let faulty = sim.node("faulty", HandlerFn::new(|_| panic!("boom")));
    let counter = delivered.clone();
    let witness = sim.node(
        "witness",
        HandlerFn::new(move |_| {
            counter.fetch_add(1, SeqCst);
        }),
    );

    let mut rt = Runtime::new_with(sim, RuntimeOptions::seeded(3));
    rt.handle_message_on(faulty, Message::new(), SimTime::from(1.0));
    rt.handle_message_on(witness, Message::new(), SimTime::from(2.0));
    let result = rt.run();

    assert!(result.is_error());
    assert_eq!(delivered.load(SeqCst), 0);
    assert_eq!(result.time, SimTime::from(1.0));
}

#[test]
#[serial]
fn scheduling_a_scheduled_message_id_fails() {
    let mut sim = Sim::new(());
    let module = sim.node(
        "m",
        HandlerFn::new(|_| {
            let original = Message::new().kind(1);
            // a forged twin carrying the same id
            let twin = decode_message(&encode_message(&original)).unwrap();

            schedule_in(original, Duration::from_secs(1));
            schedule_in(twin, Duration::from_secs(2));
        }),
    );

    let mut rt = Runtime::new_with(sim, RuntimeOptions::seeded(3));
    rt.handle_message_on(module, Message::new(), SimTime::ZERO);
    let result = rt.run();

    assert!(matches!(
        result.reason,
        TerminationReason::Error(SimError::AlreadyScheduled { .. })
    ));
}

#[test]
#[serial]
fn deleting_the_executing_module_fails() {
    let mut sim = Sim::new(());
    let module = sim.node(
        "suicidal",
        HandlerFn::new(|_| {
            delete_module(current().path());
        }),
    );

    let mut rt = Runtime::new_with(sim, RuntimeOptions::seeded(3));
    rt.handle_message_on(module, Message::new(), SimTime::ZERO);
    let result = rt.run();

    assert!(matches!(
        result.reason,
        TerminationReason::Error(SimError::InvalidDeletion { .. })
    ));
}

#[test]
#[serial]
fn deleting_other_modules_discards_their_events() {
    let delivered = Arc::new(AtomicUsize::new(0));

    let mut sim = Sim::new(());
    let reaper = sim.node(
        "reaper",
        HandlerFn::new(|_| {
            delete_module("victim");
        }),
    );
    let counter = delivered.clone();
    let victim = sim.node(
        "victim",
        HandlerFn::new(move |_| {
            counter.fetch_add(1, SeqCst);
        }),
    );

    let mut rt = Runtime::new_with(sim, RuntimeOptions::seeded(3));
    rt.handle_message_on(reaper, Message::new(), SimTime::from(1.0));
    rt.handle_message_on(victim, Message::new(), SimTime::from(2.0));
    let result = rt.run();

    // the message addressed to the deleted module is dropped silently
    assert_eq!(result.reason, TerminationReason::NoMoreEvents);
    assert_eq!(delivered.load(SeqCst), 0);
}

#[test]
#[serial]
fn shrinking_a_connected_gate_vector_fails() {
    let mut sim = Sim::new(());
    let a = sim.node("a", HandlerFn::new(|_| {}));
    sim.node("b", HandlerFn::new(|_| {}));
    sim.connect("a", "b", None);

    assert!(matches!(
        a.set_gate_size("port", 0),
        Err(SimError::GateStillConnected { .. })
    ));
    // the vector is left untouched
    assert_eq!(a.gate_size("port"), 1);
    assert!(a.set_gate_size("port", 4).is_ok());
}

#[test]
#[serial]
fn gate_mismatch_on_invalid_connections() {
    let mut sim = Sim::new(());
    let a = sim.node("a", HandlerFn::new(|_| {}));
    let b = sim.node("b", HandlerFn::new(|_| {}));

    let a_in = a.create_gate("in", GateType::Input);
    let b_out = b.create_gate("out", GateType::Output);

    // input halves cannot feed output halves
    let err = a_in.connect(b_out.clone(), None).unwrap_err();
    assert!(matches!(err, SimError::GateMismatch { .. }));

    let a_in2 = a.create_gate("in2", GateType::Input);
    b_out.clone().connect(a_in2.clone(), None).unwrap();
    // forward and backward pointers agree
    assert_eq!(b_out.next_gate().as_deref(), Some(&*a_in2));
    assert_eq!(a_in2.previous_gate().as_deref(), Some(&*b_out));
    // both endpoints are taken now
    assert!(b_out.connect(a_in2, None).is_err());
}

#[test]
#[serial]
fn error_codes_are_exposed() {
    let err = SimError::ChannelBusy {
        channel: "a.chan".into(),
        until: SimTime::from(1.0),
    };
    assert_eq!(err.code(), 8);
    assert_eq!(err.class(), "ChannelBusy");
    assert!(err.to_string().contains("a.chan"));
}
