use serial_test::serial;
use simkern::prelude::*;
use std::sync::{Arc, Mutex};

const WAKE: MessageKind = 42;

fn transmission_sim(
    second_send: impl Fn(MessageId) -> Message + 'static,
    received: Arc<Mutex<Vec<(f64, bool, MessageId)>>>,
) -> Runtime<Sim<()>> {
    let mut sim = Sim::new(());

    let first_id = Arc::new(Mutex::new(None));
    let sender = sim.node(
        "sender",
        HandlerFn::new(move |msg: Message| {
            if msg.header().kind == WAKE {
                let original = first_id.lock().unwrap().expect("first packet was sent");
                send(second_send(original), ("port$o", 0));
            } else {
                let packet = Message::new().bit_len(1000);
                *first_id.lock().unwrap() = Some(packet.id());
                send(packet, ("port$o", 0));
                schedule_at(Message::new().kind(WAKE), SimTime::from(0.0005));
            }
        }),
    );
    sim.node(
        "receiver",
        HandlerFn::new(move |msg: Message| {
            received.lock().unwrap().push((
                SimTime::now().as_secs_f64(),
                msg.header().is_update(),
                msg.header().update_of.unwrap_or(msg.id()),
            ));
        }),
    );

    // 1 Mbit/s, no propagation delay: a 1000 bit packet keeps the channel
    // busy for exactly 1 ms
    sim.connect(
        "sender",
        "receiver",
        Some(ChannelMetrics::new(1_000_000, Duration::ZERO)),
    );

    let mut rt = Runtime::new_with(sim, RuntimeOptions::seeded(9));
    rt.handle_message_on(sender, Message::new(), SimTime::ZERO);
    rt
}

#[test]
#[serial]
fn plain_send_on_busy_channel_fails() {
    let received = Arc::new(Mutex::new(Vec::new()));
    let rt = transmission_sim(|_| Message::new().bit_len(1000), received.clone());

    let result = rt.run();
    match result.reason {
        TerminationReason::Error(SimError::ChannelBusy { until, .. }) => {
            assert_eq!(until, SimTime::from(0.001));
        }
        other => panic!("expected a channel-busy error, found: {other:?}"),
    }
    assert_eq!(result.exit_code(), 1);
    // the initial transmission never completes after the error
    assert!(received.lock().unwrap().is_empty());
}

#[test]
#[serial]
fn update_replaces_inflight_transmission() {
    let received = Arc::new(Mutex::new(Vec::new()));
    let rt = transmission_sim(
        |original| Message::new().bit_len(1000).update_of(original),
        received.clone(),
    );

    let result = rt.run();
    assert_eq!(result.reason, TerminationReason::NoMoreEvents);

    let received = received.lock().unwrap();
    // the original delivery (due at t=1ms) was superseded; only the
    // update arrives, 1ms of transmission after it was issued
    assert_eq!(received.len(), 1);
    let (time, is_update, references) = received[0];
    assert!(is_update);
    assert!((time - 0.0015).abs() < 1e-9);
    assert_ne!(references, 0);
}

#[test]
#[serial]
fn channel_timing_accumulates_latency_and_duration() {
    let mut sim = Sim::new(());

    let arrivals = Arc::new(Mutex::new(Vec::new()));
    let arrivals_inner = arrivals.clone();

    let sender = sim.node(
        "sender",
        HandlerFn::new(|_| {
            send(Message::new().bit_len(8000), ("port$o", 0));
        }),
    );
    sim.node(
        "receiver",
        HandlerFn::new(move |msg: Message| {
            arrivals_inner.lock().unwrap().push((
                SimTime::now().as_secs_f64(),
                msg.header().duration,
                msg.header().reception_start,
            ));
        }),
    );

    // 1 kbit/s + 100ms latency: 8000 bits take 8s on the wire
    sim.connect(
        "sender",
        "receiver",
        Some(ChannelMetrics::new(1000, Duration::from_millis(100))),
    );

    let mut rt = Runtime::new_with(sim, RuntimeOptions::seeded(10));
    rt.handle_message_on(sender, Message::new(), SimTime::ZERO);
    let _ = rt.run();

    let arrivals = arrivals.lock().unwrap();
    assert_eq!(arrivals.len(), 1);
    let (time, duration, reception_start) = arrivals[0];
    assert!((time - 8.1).abs() < 1e-9);
    assert_eq!(duration, Duration::from_secs(8));
    assert!(!reception_start);
}

#[test]
#[serial]
fn deliver_on_reception_start_shifts_arrival() {
    let mut sim = Sim::new(());

    let arrivals = Arc::new(Mutex::new(Vec::new()));
    let arrivals_inner = arrivals.clone();

    let sender = sim.node(
        "sender",
        HandlerFn::new(|_| {
            send(Message::new().bit_len(8000), ("port$o", 0));
        }),
    );
    let receiver = sim.node(
        "receiver",
        HandlerFn::new(move |msg: Message| {
            arrivals_inner
                .lock()
                .unwrap()
                .push((SimTime::now().as_secs_f64(), msg.header().reception_start));
        }),
    );

    sim.connect(
        "sender",
        "receiver",
        Some(ChannelMetrics::new(1000, Duration::from_millis(100))),
    );
    receiver
        .gate("port$i", 0)
        .expect("connect created the port vector")
        .set_deliver_on_reception_start(true);

    let mut rt = Runtime::new_with(sim, RuntimeOptions::seeded(10));
    rt.handle_message_on(sender, Message::new(), SimTime::ZERO);
    let _ = rt.run();

    let arrivals = arrivals.lock().unwrap();
    assert_eq!(arrivals.len(), 1);
    let (time, reception_start) = arrivals[0];
    // delivered after the propagation delay, while the wire is still busy
    assert!((time - 0.1).abs() < 1e-9);
    assert!(reception_start);
}

#[test]
#[serial]
fn error_model_is_reproducible() {
    fn run(seed: u64) -> Vec<bool> {
        let flags = Arc::new(Mutex::new(Vec::new()));
        let flags_inner = flags.clone();

        let mut sim = Sim::new(());
        let sender = sim.node(
            "sender",
            HandlerFn::new(move |msg: Message| {
                send(Message::new().bit_len(1000), ("port$o", 0));
                if msg.header().kind < 9 {
                    schedule_in(
                        Message::new().kind(msg.header().kind + 1),
                        Duration::from_millis(2),
                    );
                }
            }),
        );
        sim.node(
            "receiver",
            HandlerFn::new(move |msg: Message| {
                flags_inner.lock().unwrap().push(msg.header().bit_errors);
            }),
        );

        let mut metrics = ChannelMetrics::new(1_000_000, Duration::ZERO);
        metrics.bit_error_prob = 0.001;
        sim.connect("sender", "receiver", Some(metrics));

        let mut rt = Runtime::new_with(sim, RuntimeOptions::seeded(seed));
        rt.handle_message_on(sender, Message::new(), SimTime::ZERO);
        let _ = rt.run();

        let flags = flags.lock().unwrap().clone();
        assert_eq!(flags.len(), 10);
        flags
    }

    assert_eq!(run(1234), run(1234));
}

#[test]
#[serial]
fn disabled_channels_drop_messages() {
    let mut sim = Sim::new(());

    let received = Arc::new(Mutex::new(0usize));
    let received_inner = received.clone();

    let sender = sim.node(
        "sender",
        HandlerFn::new(|_| {
            send(Message::new(), ("port$o", 0));
        }),
    );
    sim.node(
        "receiver",
        HandlerFn::new(move |_| {
            *received_inner.lock().unwrap() += 1;
        }),
    );

    let mut metrics = ChannelMetrics::new(0, Duration::from_millis(1));
    metrics.disabled = true;
    sim.connect("sender", "receiver", Some(metrics));

    let mut rt = Runtime::new_with(sim, RuntimeOptions::seeded(10));
    rt.handle_message_on(sender, Message::new(), SimTime::ZERO);
    let result = rt.run();

    assert_eq!(result.reason, TerminationReason::NoMoreEvents);
    assert_eq!(*received.lock().unwrap(), 0);
}
