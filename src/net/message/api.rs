use crate::net::gate::IntoModuleGate;
use crate::net::message::{Message, MessageId};
use crate::net::module::{with_ctx, ModuleRef};
use crate::net::runtime::{
    buf_cancel, buf_delete_module, buf_end_simulation, buf_schedule_at, buf_send_at,
    buf_send_direct,
};
use crate::net::path::ObjectPath;
use crate::time::{Duration, SimTime};

///
/// Sends a message onto a given gate, to traverse the attached gate chain
/// and its channels. The message leaves the module once the current event
/// finished processing.
///
/// > *This function requires a node-context within the simulation*
///
#[allow(clippy::needless_pass_by_value)]
pub fn send(msg: impl Into<Message>, gate: impl IntoModuleGate) {
    self::send_at(msg, gate, SimTime::now());
}

///
/// Sends a message onto a given gate with a local delay applied before
/// the chain traversal begins.
///
#[allow(clippy::needless_pass_by_value)]
pub fn send_in(msg: impl Into<Message>, gate: impl IntoModuleGate, dur: Duration) {
    let deadline = SimTime::now() + dur;
    self::send_at(msg, gate, deadline);
}

///
/// Sends a message onto a given gate at the specified time.
///
/// # Panics
///
/// Panics if the send time is in the past, or no gate could be resolved
/// from the given value.
///
#[allow(clippy::needless_pass_by_value)]
pub fn send_at(msg: impl Into<Message>, gate: impl IntoModuleGate, send_time: SimTime) {
    assert!(
        send_time >= SimTime::now(),
        "cannot send a message into the past"
    );
    let msg: Message = msg.into();

    let gate = with_ctx(|ctx| gate.as_gate(ctx));
    let Some(gate) = gate else {
        panic!("could not resolve a gate of the current module for a send operation");
    };

    buf_send_at(msg, gate, send_time);
}

///
/// Sends a message directly to a gate of another module, bypassing
/// connectivity. The arrival time is computed from the supplied
/// propagation delay and transmission duration.
///
/// # Panics
///
/// Panics if no gate could be resolved on the target module.
///
#[allow(clippy::needless_pass_by_value)]
pub fn send_direct(
    msg: impl Into<Message>,
    module: &ModuleRef,
    gate: impl IntoModuleGate,
    prop_delay: Duration,
    tx_duration: Duration,
) {
    let msg: Message = msg.into();
    let Some(gate) = gate.as_gate(&module.ctx) else {
        panic!(
            "could not resolve a gate of module '{}' for a direct send",
            module.ctx.path()
        );
    };
    buf_send_direct(msg, module.clone(), gate, prop_delay, tx_duration);
}

///
/// Schedules a self-message: an event that will trigger the modules
/// message handler (or resume its activity) at the given time.
///
/// A message may be scheduled at most once at any time; reusing a
/// still-scheduled message id fails with `AlreadyScheduled`.
///
/// # Panics
///
/// Panics if the specified time is in the past.
///
pub fn schedule_at(msg: impl Into<Message>, arrival_time: SimTime) {
    assert!(
        arrival_time >= SimTime::now(),
        "cannot schedule a self-message in the past"
    );
    buf_schedule_at(msg.into(), arrival_time);
}

///
/// Schedules a self-message in `dur` time units. See [`schedule_at`].
///
pub fn schedule_in(msg: impl Into<Message>, dur: Duration) {
    self::schedule_at(msg, SimTime::now() + dur);
}

///
/// Removes a scheduled self-message from the future event set, if present.
///
/// Returns whether a pending schedule existed. The kernel reclaims the
/// message; cancelling an unscheduled (or already delivered) message is a
/// no-op, so `cancel_event(id)` followed by scheduling a fresh message is
/// always equivalent to just scheduling it.
///
pub fn cancel_event(msg_id: MessageId) -> bool {
    buf_cancel(msg_id)
}

///
/// Cancels a scheduled self-message and deletes it. See [`cancel_event`].
///
pub fn cancel_and_delete(msg_id: MessageId) {
    let _ = buf_cancel(msg_id);
}

///
/// Ends the simulation regularly once the current event finished
/// processing. This is not an error: the finish pass still runs.
///
pub fn end_simulation() {
    buf_end_simulation();
}

///
/// Deletes the module at the given path (and its submodules) once the
/// current event finished processing. Deleting the module that handles
/// the current event fails with `InvalidDeletion`.
///
pub fn delete_module(path: impl Into<ObjectPath>) {
    buf_delete_module(path.into());
}
