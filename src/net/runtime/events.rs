use crate::net::channel::ChannelRef;
use crate::net::gate::{GateHalf, GateRef};
use crate::net::message::Message;
use crate::net::module::ModuleRef;
use crate::net::runtime::{buf_discard, buf_process, Sim};
use crate::runtime::{EventLifecycle, EventSet, Runtime, SimError, TerminationReason};
use crate::time::{Duration, SimTime};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

///
/// The event set of a networking simulation.
///
#[derive(Debug)]
pub enum NetEvents {
    /// A delayed message leaves a gate and traverses the connected chain.
    MessageExitingConnection(MessageExitingConnection),
    /// A message is delivered to its target module.
    HandleMessageEvent(HandleMessageEvent),
    /// A channel finished putting its current message onto the medium.
    ChannelUnbusyNotif(ChannelUnbusyNotif),
}

impl<A> EventSet<Sim<A>> for NetEvents
where
    A: EventLifecycle<Sim<A>>,
{
    fn handle(self, rt: &mut Runtime<Sim<A>>) {
        match self {
            Self::MessageExitingConnection(event) => event.handle(rt),
            Self::HandleMessageEvent(event) => event.handle(rt),
            Self::ChannelUnbusyNotif(event) => event.handle(rt),
        }
    }
}

///
/// A sink for events produced while routing messages. Buffered module
/// operations collect into a plain vector, events handled by the runtime
/// feed it directly.
///
pub(crate) trait EventSink {
    fn add(&mut self, event: NetEvents, time: SimTime, priority: i16);
}

impl EventSink for Vec<(NetEvents, SimTime, i16)> {
    fn add(&mut self, event: NetEvents, time: SimTime, priority: i16) {
        self.push((event, time, priority));
    }
}

impl<A> EventSink for Runtime<Sim<A>>
where
    A: EventLifecycle<Sim<A>>,
{
    fn add(&mut self, event: NetEvents, time: SimTime, priority: i16) {
        let _ = self.add_event_with_priority(event, time, priority);
    }
}

///
/// Walks the full gate chain starting *at* the given gate, accumulating
/// propagation delays and the transmission duration across all channels,
/// and enqueues the delivery at the input-side terminal. The whole path is
/// resolved at send time, so one send costs one delivery event.
///
/// # Errors
///
/// Forwards channel errors (busy transmissions) and fails with
/// [`SimError::GateMismatch`] if the chain dead-ends on an output half.
///
pub(crate) fn route_message(
    gate: GateRef,
    mut msg: Message,
    sink: &mut impl EventSink,
) -> Result<(), SimError> {
    let mut current = gate;
    let mut latency = Duration::ZERO;
    let mut tx_duration = Duration::ZERO;
    let mut via = None;

    while let Some(next) = current.next_gate() {
        if !current.owner().is_active() {
            tracing::warn!(
                "gate '{}' dropped message [{}]: owner module is inactive",
                current.name(),
                msg.str()
            );
            return Ok(());
        }

        msg.header_mut().last_gate = Some(GateRef::clone(&next));

        tracing::trace!(
            "gate '{}' forwarding message [{}] to next gate (channel: {})",
            current.name(),
            msg.str(),
            current.channel().is_some()
        );

        if let Some(channel) = current.channel() {
            let Some(crossing) = channel.process_message(&mut msg, sink)? else {
                return Ok(());
            };
            latency += crossing.latency;
            tx_duration += crossing.tx_duration;
            if crossing.tracker.is_some() {
                via = crossing.tracker;
            }
        }

        current = next;
    }

    if current.half() == GateHalf::Output {
        return Err(SimError::GateMismatch {
            reason: format!(
                "message [{}] cannot be delivered on output gate '{}'",
                msg.str(),
                current.path()
            ),
        });
    }

    let module = current.owner();
    if !module.is_active() {
        tracing::warn!(
            "gate '{}' dropped message [{}]: owner module is inactive",
            current.name(),
            msg.str()
        );
        return Ok(());
    }

    tracing::trace!(
        "gate '{}' forwarding message [{}] to module #{}",
        current.name(),
        msg.str(),
        module.id()
    );

    let at_reception_start =
        current.deliver_on_reception_start() && tx_duration > Duration::ZERO;
    let arrival = if at_reception_start {
        SimTime::now() + latency
    } else {
        SimTime::now() + latency + tx_duration
    };

    msg.header_mut().duration = tx_duration;
    msg.header_mut().reception_start = at_reception_start;
    msg.header_mut().arrival_gate_id = Some(current.id());
    msg.header_mut().arrival_time = arrival;

    let priority = msg.header().priority;
    sink.add(
        NetEvents::HandleMessageEvent(HandleMessageEvent {
            module,
            message: msg,
            via,
        }),
        arrival,
        priority,
    );
    Ok(())
}

/// Converts a caught unwind payload into a classified error.
pub(crate) fn classify_unwind(payload: Box<dyn Any + Send>) -> SimError {
    match payload.downcast::<SimError>() {
        Ok(error) => *error,
        Err(other) => {
            let reason = other
                .downcast_ref::<&str>()
                .map(ToString::to_string)
                .or_else(|| other.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "module code panicked".to_string());
            SimError::Internal { reason }
        }
    }
}

#[derive(Debug)]
pub struct MessageExitingConnection {
    pub(crate) gate: GateRef,
    pub(crate) message: Message,
}

impl MessageExitingConnection {
    fn handle<A>(self, rt: &mut Runtime<Sim<A>>)
    where
        A: EventLifecycle<Sim<A>>,
    {
        if let Err(e) = route_message(self.gate, self.message, rt) {
            rt.shutdown(TerminationReason::Error(e));
        }
    }
}

#[derive(Debug)]
pub struct HandleMessageEvent {
    pub(crate) module: ModuleRef,
    pub(crate) message: Message,
    /// The transmitting channel, for update-staleness checks.
    pub(crate) via: Option<ChannelRef>,
}

impl HandleMessageEvent {
    fn handle<A>(self, rt: &mut Runtime<Sim<A>>)
    where
        A: EventLifecycle<Sim<A>>,
    {
        if let Some(channel) = &self.via {
            if channel.take_superseded(self.message.id()) {
                tracing::trace!(
                    "channel '{}' dropped superseded transmission [{}]",
                    channel.path(),
                    self.message.str()
                );
                return;
            }
        }

        let mut message = self.message;
        let globals = rt.app.globals();
        globals.forget_scheduled(message.id());

        if globals.watches(message.id()) {
            rt.shutdown(TerminationReason::MessageReached);
            return;
        }

        if !self.module.is_active() {
            tracing::debug!("ignoring message [{}]: module is inactive", message.str());
            return;
        }

        message.header_mut().receiver_module_id = self.module.id();
        globals.log_delivery(rt.num_events_received(), &self.module, &message);

        tracing::trace!(
            "module '{}' handling message [{}]",
            self.module.path(),
            message.str()
        );

        let (module_id, message_id) = (self.module.id(), message.id());
        let module = &self.module;
        module.activate();
        let unwind = catch_unwind(AssertUnwindSafe(|| {
            module.module_handle_message(message);
        }));
        module.deactivate();

        match unwind {
            Ok(()) => {
                crate::net::eventlog::log_record('D', module_id, message_id);
                buf_process(module, rt);
            }
            Err(payload) => {
                buf_discard();
                module.ctx.active.store(false, std::sync::atomic::Ordering::SeqCst);
                rt.shutdown(TerminationReason::Error(classify_unwind(payload)));
            }
        }
    }
}

#[derive(Debug)]
pub struct ChannelUnbusyNotif {
    pub(crate) channel: ChannelRef,
}

impl ChannelUnbusyNotif {
    fn handle<A>(self, _rt: &mut Runtime<Sim<A>>)
    where
        A: EventLifecycle<Sim<A>>,
    {
        self.channel.unbusy();
    }
}
