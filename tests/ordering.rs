use serial_test::serial;
use simkern::prelude::*;
use std::sync::{Arc, Mutex};

#[test]
#[serial]
fn equal_time_equal_priority_is_fifo() {
    let order = Arc::new(Mutex::new(Vec::new()));

    let order_inner = order.clone();
    let mut sim = Sim::new(());
    let module = sim.node(
        "m",
        HandlerFn::new(move |msg: Message| {
            if msg.header().kind == 0 {
                schedule_at(Message::new().kind(1), SimTime::from(5.0));
                schedule_at(Message::new().kind(2), SimTime::from(5.0));
                schedule_at(Message::new().kind(3), SimTime::from(5.0));
            } else {
                order_inner.lock().unwrap().push(msg.header().kind);
            }
        }),
    );

    let mut rt = Runtime::new_with(sim, RuntimeOptions::seeded(42));
    rt.handle_message_on(module, Message::new(), SimTime::ZERO);
    let result = rt.run();

    assert_eq!(result.event_count, 4);
    assert_eq!(*order.lock().unwrap(), [1, 2, 3]);
}

#[test]
#[serial]
fn priority_breaks_equal_time_ties() {
    let order = Arc::new(Mutex::new(Vec::new()));

    let order_inner = order.clone();
    let mut sim = Sim::new(());
    let module = sim.node(
        "m",
        HandlerFn::new(move |msg: Message| {
            if msg.header().kind == 0 {
                // insertion order low-priority first, delivery order reversed
                schedule_at(Message::new().kind(10).priority(10), SimTime::from(5.0));
                schedule_at(Message::new().kind(1).priority(0), SimTime::from(5.0));
            } else {
                order_inner.lock().unwrap().push(msg.header().kind);
            }
        }),
    );

    let mut rt = Runtime::new_with(sim, RuntimeOptions::seeded(42));
    rt.handle_message_on(module, Message::new(), SimTime::ZERO);
    let _ = rt.run();

    assert_eq!(*order.lock().unwrap(), [1, 10]);
}

#[test]
#[serial]
fn cancel_within_handler_and_across_events() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let pending = Arc::new(Mutex::new(None));

    let order_inner = order.clone();
    let pending_inner = pending.clone();
    let mut sim = Sim::new(());
    let module = sim.node(
        "m",
        HandlerFn::new(move |msg: Message| {
            match msg.header().kind {
                0 => {
                    // cancelled before the buffer is flushed
                    let doomed = Message::new().kind(7);
                    let doomed_id = doomed.id();
                    schedule_at(doomed, SimTime::from(5.0));
                    assert!(cancel_event(doomed_id));

                    // cancelled from a later event, after entering the FES
                    let later = Message::new().kind(8);
                    *pending_inner.lock().unwrap() = Some(later.id());
                    schedule_at(later, SimTime::from(6.0));

                    schedule_at(Message::new().kind(1), SimTime::from(2.0));
                }
                1 => {
                    let id = pending_inner.lock().unwrap().take().unwrap();
                    assert!(cancel_event(id));
                    // cancelling an unscheduled id is a safe no-op
                    assert!(!cancel_event(id));

                    schedule_at(Message::new().kind(2), SimTime::from(7.0));
                }
                kind => order_inner.lock().unwrap().push(kind),
            }
        }),
    );

    let mut rt = Runtime::new_with(sim, RuntimeOptions::seeded(42));
    rt.handle_message_on(module, Message::new(), SimTime::ZERO);
    let result = rt.run();

    // only the uncancelled message arrives
    assert_eq!(*order.lock().unwrap(), [2]);
    assert_eq!(result.reason, TerminationReason::NoMoreEvents);
    assert_eq!(result.time, SimTime::from(7.0));
}

#[test]
#[serial]
fn module_ids_are_unique_and_stable() {
    let mut sim = Sim::new(());
    let mut ids = Vec::new();
    for name in ["a", "b", "c", "a.x", "a.y"] {
        ids.push(sim.node(name, HandlerFn::new(|_| {})).id());
    }

    let mut deduped = ids.clone();
    deduped.sort();
    deduped.dedup();
    assert_eq!(deduped.len(), ids.len());

    // stable across the whole lifetime
    for (name, id) in ["a", "b", "c", "a.x", "a.y"].iter().zip(&ids) {
        assert_eq!(sim.get(&ObjectPath::new(*name)).unwrap().id(), *id);
    }
}

#[test]
#[serial]
fn message_ids_are_unique_across_clones() {
    let ids = Arc::new(Mutex::new(Vec::new()));

    let ids_inner = ids.clone();
    let mut sim = Sim::new(());
    let module = sim.node(
        "m",
        HandlerFn::new(move |msg: Message| {
            if msg.header().kind == 0 {
                let original = Message::new().kind(1).content(42u32);
                let dup = original.dup();
                assert_eq!(original.tree_id(), dup.tree_id());
                assert_ne!(original.id(), dup.id());

                schedule_at(original, SimTime::from(1.0));
                schedule_at(dup, SimTime::from(2.0));
            } else {
                ids_inner.lock().unwrap().push(msg.id());
            }
        }),
    );

    let mut rt = Runtime::new_with(sim, RuntimeOptions::seeded(42));
    rt.handle_message_on(module, Message::new(), SimTime::ZERO);
    let _ = rt.run();

    let ids = ids.lock().unwrap();
    assert_eq!(ids.len(), 2);
    assert_ne!(ids[0], ids[1]);
}
