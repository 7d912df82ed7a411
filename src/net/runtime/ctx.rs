use fxhash::FxHashMap;
use std::sync::{Arc, Weak};

use super::{EventSink, HandleMessageEvent, MessageExitingConnection, NetEvents, Sim};
use crate::net::eventlog;
use crate::net::message::{Message, MessageId};
use crate::net::module::{with_ctx, ModuleRef};
use crate::net::par::ParMap;
use crate::net::path::ObjectPath;
use crate::net::runtime::route_message;
use crate::runtime::{raise, EventId, EventLifecycle, Runtime, SimError, TerminationReason};
use crate::time::{Duration, SimTime};

static BUF_CTX: spin::Mutex<BufferContext> = spin::Mutex::new(BufferContext::new());

///
/// Operations issued by module code while it processes an event. They are
/// collected here and applied to the runtime once the module yields, which
/// keeps delivery atomic and preserves causal insertion order.
///
struct BufferContext {
    events: Vec<(NetEvents, SimTime, i16)>,
    loopback: Vec<(Message, SimTime)>,
    cancels: Vec<MessageId>,
    deletions: Vec<ObjectPath>,
    finish: bool,
    globals: Option<Weak<Globals>>,
}

impl BufferContext {
    const fn new() -> Self {
        Self {
            events: Vec::new(),
            loopback: Vec::new(),
            cancels: Vec::new(),
            deletions: Vec::new(),
            finish: false,
            globals: None,
        }
    }
}

unsafe impl Send for BufferContext {}

///
/// The global state of a networking simulation that is publicly exposed.
///
#[derive(Debug)]
pub struct Globals {
    ///
    /// The current state of the parameter tree, derived from raw includes
    /// and parameter changes at runtime.
    ///
    pub parameters: Arc<ParMap>,

    /// Self-messages currently scheduled in the future event set.
    pub(crate) scheduled: spin::Mutex<FxHashMap<MessageId, EventId>>,

    /// A message whose removal from the event set ends the run.
    pub(crate) watch: spin::Mutex<Option<MessageId>>,
}

impl Default for Globals {
    fn default() -> Self {
        Self {
            parameters: Arc::new(ParMap::default()),
            scheduled: spin::Mutex::new(FxHashMap::default()),
            watch: spin::Mutex::new(None),
        }
    }
}

impl Globals {
    ///
    /// Requests the run to end as soon as the given message is removed
    /// from the future event set for delivery (it is not delivered).
    ///
    pub fn run_until_message(&self, id: MessageId) {
        *self.watch.lock() = Some(id);
    }

    pub(crate) fn watches(&self, id: MessageId) -> bool {
        *self.watch.lock() == Some(id)
    }

    pub(crate) fn forget_scheduled(&self, id: MessageId) {
        self.scheduled.lock().remove(&id);
    }

    pub(crate) fn log_delivery(&self, event_number: usize, module: &ModuleRef, msg: &Message) {
        eventlog::set_event_number(event_number);
        eventlog::log_record('E', module.ctx.id(), msg.id());
    }
}

///
/// Returns the globals of the currently active networking simulation.
///
/// # Panics
///
/// Panics if no simulation is currently active. A simulation is active
/// while an instance of [`Sim`] exists.
///
#[must_use]
pub fn globals() -> Arc<Globals> {
    let ctx = BUF_CTX.lock();
    ctx.globals
        .as_ref()
        .and_then(Weak::upgrade)
        .expect("no simulation globals attached, no simulation is currently active")
}

pub(crate) fn buf_init(globals: Weak<Globals>) {
    let mut ctx = BUF_CTX.lock();
    ctx.globals = Some(globals);
}

pub(crate) fn buf_drop() {
    let mut ctx = BUF_CTX.lock();
    *ctx = BufferContext::new();
}

/// Discards all buffered operations, e.g. after a failed delivery or
/// during the finish pass where no further events are processed.
pub(crate) fn buf_discard() {
    let mut ctx = BUF_CTX.lock();
    ctx.events.clear();
    ctx.loopback.clear();
    ctx.cancels.clear();
    ctx.deletions.clear();
    ctx.finish = false;
}

pub(crate) fn buf_send_at(mut msg: Message, gate: crate::net::gate::GateRef, send_time: SimTime) {
    let sender = with_ctx(|ctx| ctx.id());
    msg.header_mut().sender_module_id = sender;
    msg.header_mut().sender_gate_id = Some(gate.id());
    msg.header_mut().send_time = SimTime::now();
    eventlog::log_record('S', sender, msg.id());

    let mut ctx = BUF_CTX.lock();

    // Delayed sends begin their traversal at the deferred time, so the
    // busy state of channels is consulted then, not now.
    if send_time > SimTime::now() {
        let priority = msg.header().priority;
        ctx.events.push((
            NetEvents::MessageExitingConnection(MessageExitingConnection { gate, message: msg }),
            send_time,
            priority,
        ));
        return;
    }

    let result = route_message(gate, msg, &mut ctx.events);
    if let Err(e) = result {
        drop(ctx);
        raise(e);
    }
}

pub(crate) fn buf_send_direct(
    mut msg: Message,
    module: ModuleRef,
    gate: crate::net::gate::GateRef,
    prop_delay: Duration,
    tx_duration: Duration,
) {
    let sender = with_ctx(|ctx| ctx.id());
    let now = SimTime::now();

    msg.header_mut().sender_module_id = sender;
    msg.header_mut().send_time = now;
    msg.header_mut().duration = tx_duration;
    msg.header_mut().arrival_gate_id = Some(gate.id());
    eventlog::log_record('S', sender, msg.id());

    let arrival = if gate.deliver_on_reception_start() {
        msg.header_mut().reception_start = true;
        now + prop_delay
    } else {
        now + prop_delay + tx_duration
    };
    msg.header_mut().arrival_time = arrival;

    let priority = msg.header().priority;
    let mut ctx = BUF_CTX.lock();
    ctx.events.push((
        NetEvents::HandleMessageEvent(HandleMessageEvent {
            module,
            message: msg,
            via: None,
        }),
        arrival,
        priority,
    ));
}

pub(crate) fn buf_schedule_at(mut msg: Message, arrival_time: SimTime) {
    let sender = with_ctx(|ctx| ctx.id());

    let mut ctx = BUF_CTX.lock();
    let already_pending = ctx.loopback.iter().any(|(m, _)| m.id() == msg.id())
        || ctx
            .globals
            .as_ref()
            .and_then(Weak::upgrade)
            .is_some_and(|globals| globals.scheduled.lock().contains_key(&msg.id()));
    if already_pending {
        let message_id = msg.id();
        drop(ctx);
        raise(SimError::AlreadyScheduled { message_id });
    }

    let header = msg.header_mut();
    header.self_message = true;
    header.sender_module_id = sender;
    header.receiver_module_id = sender;
    header.sender_gate_id = None;
    header.arrival_gate_id = None;
    header.send_time = SimTime::now();
    header.arrival_time = arrival_time;

    ctx.loopback.push((msg, arrival_time));
}

pub(crate) fn buf_cancel(msg_id: MessageId) -> bool {
    let mut ctx = BUF_CTX.lock();
    if let Some(pos) = ctx.loopback.iter().position(|(m, _)| m.id() == msg_id) {
        // not yet flushed, reclaim directly
        let _ = ctx.loopback.remove(pos);
        return true;
    }
    // ids with a pending (deferred) cancellation count as unscheduled
    let in_fes = !ctx.cancels.contains(&msg_id)
        && ctx
            .globals
            .as_ref()
            .and_then(Weak::upgrade)
            .is_some_and(|globals| globals.scheduled.lock().contains_key(&msg_id));
    if in_fes {
        ctx.cancels.push(msg_id);
    }
    in_fes
}

pub(crate) fn buf_delete_module(path: ObjectPath) {
    let mut ctx = BUF_CTX.lock();
    ctx.deletions.push(path);
}

pub(crate) fn buf_end_simulation() {
    let mut ctx = BUF_CTX.lock();
    ctx.finish = true;
}

///
/// Applies all buffered operations of the module that just yielded to
/// the runtime.
///
pub(crate) fn buf_process<A>(module: &ModuleRef, rt: &mut Runtime<Sim<A>>)
where
    A: EventLifecycle<Sim<A>>,
{
    let globals = rt.app.globals();
    let mut ctx = BUF_CTX.lock();

    // (0) Events from send operations.
    for (event, time, priority) in ctx.events.drain(..) {
        rt.add(event, time, priority);
    }

    // (1) Loopback events from self-message scheduling.
    for (message, time) in ctx.loopback.drain(..) {
        let (id, priority) = (message.id(), message.header().priority);
        let event_id = rt.add_event_with_priority(
            NetEvents::HandleMessageEvent(HandleMessageEvent {
                module: module.clone(),
                message,
                via: None,
            }),
            time,
            priority,
        );
        globals.scheduled.lock().insert(id, event_id);
    }

    // (2) Deferred cancellations reclaim the message from the event set.
    for id in ctx.cancels.drain(..) {
        if let Some(event_id) = globals.scheduled.lock().remove(&id) {
            let _ = rt.cancel_event(event_id);
        }
    }

    let deletions: Vec<_> = ctx.deletions.drain(..).collect();
    let finish = std::mem::take(&mut ctx.finish);
    drop(ctx);

    // (3) Module deletions, bottom-up through the subtree.
    for path in deletions {
        if path == module.ctx.path {
            rt.shutdown(TerminationReason::Error(SimError::InvalidDeletion {
                path: path.as_str().to_string(),
            }));
            continue;
        }
        if let Some(removed) = rt.app.modules_mut().remove(&path) {
            tracing::debug!("deleting module '{path}'");
            removed.ctx.tear_down();
        } else {
            tracing::warn!("cannot delete module '{path}': no such module");
        }
    }

    // (4) A regular end of the simulation, requested by module code.
    if finish {
        rt.shutdown(TerminationReason::Finished);
    }
}
