use serial_test::serial;
use simkern::net::eventlog::{set_eventlog, write_snapshot};
use simkern::prelude::*;
use std::io::Write;
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
#[serial]
fn event_log_records_sends_and_deliveries() {
    let buf = SharedBuf::default();

    let mut sim = Sim::new(());
    let a = sim.node(
        "a",
        HandlerFn::new(|_| {
            send(Message::new().bit_len(1000), ("port$o", 0));
        }),
    );
    sim.node("b", HandlerFn::new(|_| {}));
    sim.connect(
        "a",
        "b",
        Some(ChannelMetrics::new(1_000_000, Duration::from_millis(1))),
    );

    set_eventlog(buf.clone());

    let mut rt = Runtime::new_with(sim, RuntimeOptions::seeded(11));
    rt.handle_message_on(a, Message::new(), SimTime::ZERO);
    let result = rt.run();
    assert_eq!(result.reason, TerminationReason::NoMoreEvents);
    drop(result);

    let bytes = buf.0.lock().unwrap().clone();
    let log = String::from_utf8(bytes).unwrap();
    let kinds: Vec<char> = log
        .lines()
        .filter_map(|line| line.chars().next())
        .collect();

    // the seeded delivery, the send, the transmission begin, and the
    // final delivery at b
    assert!(kinds.contains(&'E'));
    assert!(kinds.contains(&'S'));
    assert!(kinds.contains(&'B'));
    assert!(kinds.contains(&'D'));

    for line in log.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        assert_eq!(tokens[1], "#");
        assert_eq!(tokens[3], "t");
        assert_eq!(tokens[5], "m");
        assert_eq!(tokens[7], "msg");
    }
}

#[test]
#[serial]
fn snapshot_dumps_the_object_tree() {
    let mut sim = Sim::new(());
    sim.node("net", HandlerFn::new(|_| {}));
    sim.node("net.a", HandlerFn::new(|_| {}));
    sim.node("net.b", HandlerFn::new(|_| {}));
    sim.connect(
        "net.a",
        "net.b",
        Some(ChannelMetrics::new(1000, Duration::from_millis(5))),
    );

    let mut out = Vec::new();
    write_snapshot(&sim, &mut out).unwrap();
    let dump = String::from_utf8(out).unwrap();

    assert!(dump.contains("net module"));
    assert!(dump.contains("net.a module"));
    assert!(dump.lines().any(|l| l.contains("gate connected=true")));
    assert!(dump.lines().any(|l| l.contains("channel 1000 bit/s")));

    // every line follows the `<path> <class> <info>` layout
    for line in dump.lines() {
        let mut tokens = line.split_whitespace();
        let _path = tokens.next().unwrap();
        let class = tokens.next().unwrap();
        assert!(["module", "gate", "channel"].contains(&class));
    }
}
