//! Network nodes with custom state.

use crate::net::message::Message;
use std::{
    any::Any,
    fmt,
    sync::atomic::{AtomicU16, Ordering},
};

mod ctx;
pub use self::ctx::ModuleContext;
pub(crate) use self::ctx::*;

mod reference;
pub use reference::*;

mod api;
pub use api::*;

/// A unique identifier for a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ModuleId(pub u16);

static MODULE_ID: AtomicU16 = AtomicU16::new(0xff);

impl ModuleId {
    /// A general purpose ID indicating None.
    pub const NULL: ModuleId = ModuleId(0);

    /// Generates a unique module ID.
    pub fn gen() -> Self {
        Self(MODULE_ID.fetch_add(1, Ordering::SeqCst))
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

///
/// A set of user defined functions customizing the behaviour of a
/// handler-style module.
///
/// Modules receive every event addressed to them through
/// [`handle_message`](Module::handle_message), invoked synchronously by the
/// scheduler. A module runs to the end of its handler atomically; state
/// changes become visible to other modules only through sent messages.
///
/// For the coroutine-style alternative see
/// [`Activity`](crate::net::activity::Activity).
///
pub trait Module: Any {
    ///
    /// A message handler for receiving events.
    ///
    /// # Example
    ///
    /// ```
    /// use simkern::prelude::*;
    ///
    /// struct Counter {
    ///     seen: usize,
    /// }
    ///
    /// impl Module for Counter {
    ///     fn handle_message(&mut self, msg: Message) {
    ///         self.seen += 1;
    ///         tracing::info!("received {}", msg.str());
    ///     }
    /// }
    /// ```
    ///
    fn handle_message(&mut self, _msg: Message) {}

    ///
    /// A function run at the start of each simulation, for each module.
    /// The order in which modules are called within one stage is not
    /// guaranteed, but all stage-i calls (on channels first, then modules)
    /// finish before the first stage-i+1 call.
    ///
    fn at_sim_start(&mut self, _stage: usize) {}

    ///
    /// The number of stages used for module initialization.
    ///
    fn num_sim_start_stages(&self) -> usize {
        1
    }

    ///
    /// A callback invoked when the simulation finished regularly.
    /// Events emitted by this function will NOT be processed.
    ///
    fn at_sim_end(&mut self) {}

    ///
    /// Resets the custom state when a module is restarted.
    ///
    fn reset(&mut self) {}
}

///
/// A module built from a plain message-handler closure, for small
/// simulations and tests.
///
pub struct HandlerFn<F>
where
    F: FnMut(Message) + 'static,
{
    f: F,
}

impl<F> HandlerFn<F>
where
    F: FnMut(Message) + 'static,
{
    /// Creates a module from the given message handler.
    #[must_use]
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> Module for HandlerFn<F>
where
    F: FnMut(Message) + 'static,
{
    fn handle_message(&mut self, msg: Message) {
        (self.f)(msg);
    }
}
