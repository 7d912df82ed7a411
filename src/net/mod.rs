//!
//! The module/gate/channel data model on top of the generic event runtime.
//!
//! A simulation is a tree of named modules connected by gates through
//! channels. Modules exchange messages; the kernel routes a sent message
//! along the gate chain, applies channel timing and delivers it to the
//! terminal modules software, either a [`Module`] handler or an
//! [`activity`](crate::net::activity) procedure.
//!

pub mod activity;
pub mod eventlog;
pub mod par;

pub use par::{convert_unit, par, par_for, unit, Par, ParMap, ParValue, Unit};

mod channel;
pub use channel::{Channel, ChannelMetrics, ChannelRef};

mod gate;
pub use gate::{Gate, GateHalf, GateId, GateRef, GateType, IntoModuleGate, MAX_GATE_VECTOR_SIZE};

mod lifecycle;
pub use lifecycle::{Driver, SimState};

mod message;
pub use message::*;

mod module;
pub use module::*;

mod path;
pub use path::ObjectPath;

mod runtime;
pub use runtime::{globals, Globals, NetEvents, Sim, SimLifecycle};

mod signal;
pub use signal::{
    emit, signal, subscribe, unsubscribe, SignalId, SignalValue, SubscriptionHandle,
};
