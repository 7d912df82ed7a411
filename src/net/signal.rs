//! A publish/subscribe surface from modules to external listeners.
//!
//! Signals are identified by interned names. A listener subscribed on a
//! module observes emissions of that module *and* of all its descendants:
//! an emission travels up the module tree and triggers every matching
//! subscription along the way. Unknown signals are accepted silently.

use crate::net::module::{with_ctx, ModuleContext, ModuleRef};
use crate::net::path::ObjectPath;
use crate::time::SimTime;
use std::cell::RefCell;
use std::fmt::Display;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

static SIGNALS: spin::Mutex<Vec<&'static str>> = spin::Mutex::new(Vec::new());
static SUBSCRIPTION_TOKEN: AtomicUsize = AtomicUsize::new(0);

///
/// An interned signal identifier.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct SignalId(usize);

impl SignalId {
    /// The interned name of this signal.
    #[must_use]
    pub fn name(&self) -> &'static str {
        SIGNALS.lock()[self.0]
    }
}

impl Display for SignalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.name().fmt(f)
    }
}

///
/// Interns a signal name, returning its stable id. Repeated calls with
/// the same name return the same id.
///
#[must_use]
pub fn signal(name: &str) -> SignalId {
    let mut pool = SIGNALS.lock();
    if let Some(idx) = pool.iter().position(|s| *s == name) {
        return SignalId(idx);
    }
    pool.push(Box::leak(name.to_string().into_boxed_str()));
    SignalId(pool.len() - 1)
}

///
/// A value carried by a signal emission.
///
#[derive(Debug, Clone, PartialEq)]
pub enum SignalValue {
    /// An integer statistic.
    Int(i64),
    /// A floating point statistic.
    Double(f64),
    /// A floating point statistic with an explicit sample time.
    TimedDouble(SimTime, f64),
    /// A point in simulation time.
    Time(SimTime),
    /// A string value.
    Str(String),
}

impl From<i64> for SignalValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}
impl From<f64> for SignalValue {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}
impl From<(SimTime, f64)> for SignalValue {
    fn from((time, value): (SimTime, f64)) -> Self {
        Self::TimedDouble(time, value)
    }
}
impl From<SimTime> for SignalValue {
    fn from(value: SimTime) -> Self {
        Self::Time(value)
    }
}
impl From<&str> for SignalValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}
impl From<String> for SignalValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

pub(crate) type SignalHandler = dyn FnMut(&ObjectPath, SignalId, &SignalValue);

pub(crate) struct ListenerEntry {
    pub(crate) signal: SignalId,
    pub(crate) token: usize,
    pub(crate) cb: Rc<RefCell<SignalHandler>>,
}

///
/// A token identifying one subscription, used for deregistration.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionHandle {
    token: usize,
}

///
/// Registers a listener for a signal on the given module.
///
/// The listener observes emissions from the module itself and from all of
/// its descendants. It is invoked with the emitting modules path, the
/// signal id and the emitted value.
///
pub fn subscribe(
    module: &ModuleRef,
    signal: SignalId,
    f: impl FnMut(&ObjectPath, SignalId, &SignalValue) + 'static,
) -> SubscriptionHandle {
    let token = SUBSCRIPTION_TOKEN.fetch_add(1, Ordering::SeqCst);
    module.ctx.listeners.write().push(ListenerEntry {
        signal,
        token,
        cb: Rc::new(RefCell::new(f)),
    });
    SubscriptionHandle { token }
}

///
/// Removes a previously registered subscription. Unknown handles
/// are ignored.
///
pub fn unsubscribe(module: &ModuleRef, handle: SubscriptionHandle) {
    module
        .ctx
        .listeners
        .write()
        .retain(|entry| entry.token != handle.token);
}

///
/// Emits a signal from the current module.
///
/// > *This function requires a node-context within the simulation*
///
/// # Panics
///
/// Panics if no module is currently in scope.
///
pub fn emit(signal: SignalId, value: impl Into<SignalValue>) {
    let value = value.into();
    with_ctx(|ctx| emit_from(ctx, signal, &value));
}

pub(crate) fn emit_from(source: &Arc<ModuleContext>, signal: SignalId, value: &SignalValue) {
    let path = source.path();

    // snapshot matching listeners, so handlers may (un)subscribe freely
    let mut handlers: Vec<Rc<RefCell<SignalHandler>>> = Vec::new();
    let mut current = Some(Arc::clone(source));
    while let Some(ctx) = current {
        handlers.extend(
            ctx.listeners
                .read()
                .iter()
                .filter(|entry| entry.signal == signal)
                .map(|entry| Rc::clone(&entry.cb)),
        );
        current = ctx.parent().map(|parent| Arc::clone(&parent.ctx));
    }

    for handler in handlers {
        (handler.borrow_mut())(&path, signal, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_interning() {
        let a = signal("pkt-dropped");
        let b = signal("pkt-dropped");
        let c = signal("pkt-sent");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.name(), "pkt-dropped");
    }

    #[test]
    fn signal_values() {
        assert_eq!(SignalValue::from(3i64), SignalValue::Int(3));
        assert_eq!(
            SignalValue::from((SimTime::from(1.0), 0.5)),
            SignalValue::TimedDouble(SimTime::from(1.0), 0.5)
        );
        assert_eq!(SignalValue::from("x"), SignalValue::Str("x".into()));
    }
}
