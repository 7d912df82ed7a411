use serial_test::serial;
use simkern::prelude::*;
use std::sync::{Arc, Mutex};

#[test]
#[serial]
fn signals_propagate_to_ancestor_subscriptions() {
    let observed = Arc::new(Mutex::new(Vec::new()));

    let mut sim = Sim::new(());
    let parent = sim.node("net", HandlerFn::new(|_| {}));
    let child = sim.node(
        "net.host",
        HandlerFn::new(|msg: Message| {
            emit(signal("pkt-seen"), i64::from(msg.header().kind));
        }),
    );

    let observed_inner = observed.clone();
    subscribe(&parent, signal("pkt-seen"), move |source, sig, value| {
        observed_inner.lock().unwrap().push((
            source.as_str().to_string(),
            sig.name().to_string(),
            value.clone(),
        ));
    });

    // an unrelated signal on the emitting module itself stays silent
    subscribe(&child, signal("other"), |_, _, _| {
        panic!("this listener must not fire");
    });

    let mut rt = Runtime::new_with(sim, RuntimeOptions::seeded(5));
    rt.handle_message_on(child, Message::new().kind(7), SimTime::ZERO);
    let result = rt.run();
    assert_eq!(result.reason, TerminationReason::NoMoreEvents);

    let observed = observed.lock().unwrap();
    assert_eq!(observed.len(), 1);
    assert_eq!(observed[0].0, "net.host");
    assert_eq!(observed[0].1, "pkt-seen");
    assert_eq!(observed[0].2, SignalValue::Int(7));
}

#[test]
#[serial]
fn unsubscribe_removes_the_listener() {
    let count = Arc::new(Mutex::new(0));

    let mut sim = Sim::new(());
    let module = sim.node(
        "m",
        HandlerFn::new(|msg: Message| {
            if msg.header().kind < 2 {
                emit(signal("tick"), 1i64);
            }
        }),
    );

    let count_inner = count.clone();
    let handle = subscribe(&module, signal("tick"), move |_, _, _| {
        *count_inner.lock().unwrap() += 1;
    });

    let mut rt = Runtime::new_with(sim, RuntimeOptions::seeded(5));
    rt.handle_message_on(module.clone(), Message::new().kind(0), SimTime::ZERO);
    let reason = rt.run_loop();
    assert_eq!(reason, TerminationReason::NoMoreEvents);
    assert_eq!(*count.lock().unwrap(), 1);

    unsubscribe(&module, handle);
    rt.handle_message_on(module, Message::new().kind(1), SimTime::from(1.0));
    let _ = rt.run_loop();
    assert_eq!(*count.lock().unwrap(), 1);
}

#[test]
#[serial]
fn signals_may_be_emitted_during_finish() {
    let observed = Arc::new(Mutex::new(0));

    struct Emitter;
    impl Module for Emitter {
        fn at_sim_end(&mut self) {
            emit(signal("final-state"), SimTime::now());
        }
    }

    let mut sim = Sim::new(());
    let module = sim.node("m", Emitter);

    let observed_inner = observed.clone();
    subscribe(&module, signal("final-state"), move |_, _, _| {
        *observed_inner.lock().unwrap() += 1;
    });

    let _ = Runtime::new_with(sim, RuntimeOptions::seeded(5)).run();
    assert_eq!(*observed.lock().unwrap(), 1);
}

#[test]
#[serial]
fn module_pars_are_readable_in_handlers() {
    let seen = Arc::new(Mutex::new(Vec::new()));

    let mut sim = Sim::new(());
    sim.include_par(
        "net.host.delay: 2ms\n\
         net.host.window: mtu * 2\n\
         net.mtu: 1500\n\
         *.*.role: \"host\"",
    );

    sim.node("net", HandlerFn::new(|_| {}));
    let seen_inner = seen.clone();
    let host = sim.node(
        "net.host",
        HandlerFn::new(move |_| {
            let delay = par("delay").as_time().unwrap();
            let window = par("window").as_int().unwrap();
            let role = par("role").as_str().unwrap();
            assert!(par("missing").is_none());
            assert!(matches!(
                par("missing").value(),
                Err(SimError::ParameterUnassigned { .. })
            ));
            seen_inner.lock().unwrap().push((delay, window, role));
        }),
    );

    let mut rt = Runtime::new_with(sim, RuntimeOptions::seeded(5));
    rt.handle_message_on(host, Message::new(), SimTime::ZERO);
    let result = rt.run();
    assert_eq!(result.reason, TerminationReason::NoMoreEvents);

    assert_eq!(
        *seen.lock().unwrap(),
        [(Duration::from_millis(2), 3000, "host".to_string())]
    );
}

#[test]
#[serial]
fn config_entries_become_module_pars() {
    let config = Config::parse(
        "[Config Lab]\n\
         m.delay = 5ms\n\
         *.queue = 8\n\
         sim-time-limit = 100s",
    )
    .unwrap();
    let active = config.activate("Lab", 0);

    let seen = Arc::new(Mutex::new(Vec::new()));

    let mut sim = Sim::new(());
    sim.include_config(&active);

    let seen_inner = seen.clone();
    let module = sim.node(
        "m",
        HandlerFn::new(move |_| {
            seen_inner.lock().unwrap().push((
                par("delay").as_time().unwrap(),
                par("queue").as_int().unwrap(),
            ));
        }),
    );

    let mut rt = Runtime::new_with(sim, RuntimeOptions::seeded(5));
    rt.handle_message_on(module, Message::new(), SimTime::ZERO);
    let _ = rt.run();

    assert_eq!(
        *seen.lock().unwrap(),
        [(Duration::from_millis(5), 8)]
    );
}

#[test]
#[serial]
fn pars_can_be_rewritten_at_runtime() {
    let seen = Arc::new(Mutex::new(Vec::new()));

    let mut sim = Sim::new(());
    sim.include_par("m.rate: 10");

    let seen_inner = seen.clone();
    let module = sim.node(
        "m",
        HandlerFn::new(move |msg: Message| {
            if msg.header().kind == 0 {
                par("rate").set(99);
            } else {
                seen_inner.lock().unwrap().push(par("rate").as_int().unwrap());
            }
        }),
    );

    let mut rt = Runtime::new_with(sim, RuntimeOptions::seeded(5));
    rt.handle_message_on(module.clone(), Message::new().kind(0), SimTime::ZERO);
    rt.handle_message_on(module, Message::new().kind(1), SimTime::from(1.0));
    let _ = rt.run();

    assert_eq!(*seen.lock().unwrap(), [99]);
}
