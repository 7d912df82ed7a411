//! A collection of the most commonly used types and functions.

pub use crate::time::{Duration, SimTime};

pub use crate::runtime::{
    random, sample, Application, EventLifecycle, EventSet, Runtime, RuntimeLimit, RuntimeOptions,
    RuntimeResult, SimError, TerminationReason,
};

pub use crate::net::activity::{Activity, ActivityCtx};
pub use crate::net::{
    cancel_and_delete, cancel_event, convert_unit, current, delete_module, emit, end_simulation,
    globals, message_count, par, par_for, reset_message_count, schedule_at, schedule_in, send,
    send_at, send_direct, send_in, signal, subscribe, try_current, unit, unsubscribe, Channel,
    ChannelMetrics, ChannelRef, Driver, Gate, GateHalf, GateId, GateRef, GateType, Globals,
    HandlerFn, IntoModuleGate, Message, MessageBody, MessageHeader, MessageId, MessageKind, Module,
    ModuleContext, ModuleId, ModuleRef, NetEvents, ObjectPath, Par, ParValue, Sim, SimState,
    SignalId, SignalValue, TagValue,
};

pub use crate::config::{ActiveConfig, CliOptions, Config};
pub use crate::logger::Logger;
