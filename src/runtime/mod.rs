//!
//! Central primitives for running a discrete event simulation.
//!
//! The [`Runtime`] owns the future event set and the main event loop. It is
//! generic over an [`Application`] that supplies the event set; the network
//! layer in [`crate::net`] is one such application, but custom event-driven
//! simulations can be built directly on top of this module.
//!

use crate::time::{Duration, SimTime};
use rand::{
    distributions::Standard,
    prelude::{Distribution, StdRng},
    rngs::OsRng,
    Rng, SeedableRng,
};
use std::fmt::{Debug, Display};
use std::sync::atomic::{AtomicU64, Ordering};

mod error;
pub use self::error::*;

mod fes;
pub(crate) use self::fes::*;

mod limit;
pub use self::limit::*;

mod options;
pub use self::options::*;

/// A runtime-unique identifier for a scheduled event, assigned in
/// insertion order.
pub type EventId = u64;

static RNG: spin::Mutex<Option<StdRng>> = spin::Mutex::new(None);

/// The seed all derived random streams fold into their own state.
pub(crate) static GLOBAL_SEED: AtomicU64 = AtomicU64::new(0);

pub(crate) fn global_seed() -> u64 {
    GLOBAL_SEED.load(Ordering::Relaxed)
}

///
/// Applies a closure to the runtime RNG.
///
/// # Panics
///
/// Panics if the RNG has not been initialized. This is done once the
/// [`Runtime`] is created.
///
pub fn with_rng<R>(f: impl FnOnce(&mut StdRng) -> R) -> R {
    let mut lock = RNG.lock();
    let rng = lock.as_mut().expect("RNG not yet initialized");
    f(rng)
}

///
/// Generates a random instance of type T with a Standard distribution.
///
#[must_use]
pub fn random<T>() -> T
where
    Standard: Distribution<T>,
{
    with_rng(|rng| rng.gen())
}

///
/// Generates a random instance of type T with a distribution
/// of type D.
///
pub fn sample<T, D>(distr: D) -> T
where
    D: Distribution<T>,
{
    with_rng(|rng| rng.sample(distr))
}

///
/// A type that defines a runtime application: the systems state together
/// with the event set processed by the runtime.
///
pub trait Application: Sized {
    ///
    /// The set of events used in the simulation.
    ///
    type EventSet: EventSet<Self>;

    ///
    /// A type defining the behaviour at sim start / sim end.
    ///
    type Lifecycle: EventLifecycle<Self>;
}

///
/// A type that can be used as a wrapper around all events
/// handled by an application A.
///
pub trait EventSet<A>
where
    A: Application,
{
    ///
    /// Handles an upcoming event, represented as an instance
    /// of the event set.
    ///
    fn handle(self, runtime: &mut Runtime<A>);
}

///
/// A type that defines the lifecycle behaviour of an application A.
///
pub trait EventLifecycle<A = Self> {
    ///
    /// Called once, before the first event is processed.
    ///
    #[allow(unused_variables)]
    fn at_sim_start(runtime: &mut Runtime<A>)
    where
        A: Application,
    {
    }

    ///
    /// Called once the simulation has come to a regular end.
    ///
    #[allow(unused_variables)]
    fn at_sim_end(runtime: &mut Runtime<A>)
    where
        A: Application,
    {
    }
}

impl<A> EventLifecycle<A> for () {}

///
/// The central management point for an instance of a discrete
/// event based simulation.
///
/// Create an application type implementing [`Application`] together with an
/// event set, pass an instance to [`Runtime::new`], and drive the simulation
/// with [`Runtime::run`]. The network layer provides a ready-made application
/// in [`Sim`](crate::net::Sim).
///
pub struct Runtime<A>
where
    A: Application,
{
    /// The contained runtime application, defining globals and the used event set.
    pub app: A,

    limit: RuntimeLimit,
    itr: usize,
    quiet: bool,

    stop: Option<TerminationReason>,
    future_event_set: FutureEventSet<A>,
}

impl<A> Runtime<A>
where
    A: Application,
{
    ///
    /// Creates a new [`Runtime`] instance using an application as core,
    /// with default options.
    ///
    #[must_use]
    pub fn new(app: A) -> Self {
        Self::new_with(app, RuntimeOptions::default())
    }

    ///
    /// Creates a new [`Runtime`] instance using an application as core,
    /// with a custom set of [`RuntimeOptions`].
    ///
    /// This initializes the global RNG and start time, prints the startup
    /// banner and runs the applications `at_sim_start` lifecycle hook.
    ///
    #[must_use]
    pub fn new_with(app: A, mut options: RuntimeOptions) -> Self {
        let start_time = options.min_sim_time.unwrap_or(SimTime::MIN);
        SimTime::set_now(start_time);

        let rng = options
            .rng
            .take()
            .unwrap_or_else(|| StdRng::from_rng(OsRng).expect("failed to derive RNG from OS"));
        *RNG.lock() = Some(rng);
        GLOBAL_SEED.store(
            options.seed.unwrap_or_else(|| with_rng(|rng| rng.gen())),
            Ordering::Relaxed,
        );

        let limit = options.custom_limit.unwrap_or_else(|| {
            match (options.max_itr, options.max_sim_time) {
                (None, None) => RuntimeLimit::None,
                (Some(i), None) => RuntimeLimit::EventCount(i),
                (None, Some(t)) => RuntimeLimit::SimTime(t),
                (Some(i), Some(t)) => RuntimeLimit::CombinedOr(
                    Box::new(RuntimeLimit::EventCount(i)),
                    Box::new(RuntimeLimit::SimTime(t)),
                ),
            }
        });

        let mut this = Self {
            future_event_set: FutureEventSet::new(start_time),
            itr: 0,
            quiet: options.quiet,
            stop: None,
            limit,
            app,
        };

        if !this.quiet {
            println!("\u{23A1} Simulation starting");
            println!("\u{23A3}  Event limit := {}", this.limit);
        }

        <A::Lifecycle as EventLifecycle<A>>::at_sim_start(&mut this);
        this
    }

    ///
    /// The number of events inserted into this [`Runtime`] instance.
    ///
    #[inline]
    #[must_use]
    pub fn num_events_dispatched(&self) -> usize {
        self.future_event_set.counter()
    }

    ///
    /// The number of events that were received & handled by this
    /// [`Runtime`] instance.
    ///
    #[must_use]
    pub fn num_events_received(&self) -> usize {
        self.itr
    }

    ///
    /// The current simulation time.
    ///
    #[allow(clippy::unused_self)]
    #[must_use]
    pub fn sim_time(&self) -> SimTime {
        SimTime::now()
    }

    ///
    /// Adds an event to the future event set, to be handled at the given
    /// time with default scheduling priority.
    ///
    /// # Panics
    ///
    /// Panics if the given time lies in the past.
    ///
    pub fn add_event(&mut self, event: impl Into<A::EventSet>, time: SimTime) -> EventId {
        self.add_event_with_priority(event, time, 0)
    }

    ///
    /// Adds an event to the future event set, to be handled at the given
    /// time. Events at equal times are ordered by ascending priority, then
    /// by insertion order.
    ///
    /// # Panics
    ///
    /// Panics if the given time lies in the past.
    ///
    pub fn add_event_with_priority(
        &mut self,
        event: impl Into<A::EventSet>,
        time: SimTime,
        priority: i16,
    ) -> EventId {
        self.future_event_set.add(time, priority, event.into())
    }

    ///
    /// Adds an event to the future event set, to be handled in `duration`
    /// time units.
    ///
    pub fn add_event_in(
        &mut self,
        event: impl Into<A::EventSet>,
        duration: impl Into<Duration>,
    ) -> EventId {
        self.add_event(event, self.sim_time() + duration.into())
    }

    ///
    /// Removes a pending event from the future event set, returning it.
    /// Safe to call with ids of events that were already delivered.
    ///
    pub fn cancel_event(&mut self, id: EventId) -> Option<A::EventSet> {
        self.future_event_set.remove(id).map(|node| node.event)
    }

    ///
    /// Replaces the runtime limit, e.g. to continue a paused
    /// simulation up to a new bound.
    ///
    pub fn set_limit(&mut self, limit: RuntimeLimit) {
        self.limit = limit;
    }

    ///
    /// Requests the event loop to stop after the current event.
    ///
    /// Delivery code uses this to surface errors, regular completions and
    /// watched-message hits; external callers may request [`TerminationReason::Stopped`].
    ///
    pub fn shutdown(&mut self, reason: TerminationReason) {
        // first reason wins, later requests would mask the cause
        if self.stop.is_none() {
            self.stop = Some(reason);
        }
    }

    ///
    /// Processes the next event in the future event set by calling its
    /// handler. Returns whether the loop should continue.
    ///
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> bool {
        if self.stop.is_some() {
            return false;
        }
        let Some((time, _)) = self.future_event_set.peek() else {
            return false;
        };

        if self.limit.applies(self.itr + 1, time) {
            self.stop = Some(self.limit.reason(self.itr + 1, time));
            return false;
        }

        let node = self.future_event_set.fetch_next();
        self.itr += 1;

        // Let this be the only position where SimTime is changed.
        SimTime::set_now(node.time);

        node.event.handle(self);

        self.stop.is_none() && !self.future_event_set.is_empty()
    }

    ///
    /// Runs the event loop until a termination condition is met, without
    /// running the end-of-simulation lifecycle. Use [`Runtime::finish`]
    /// afterwards, or [`Runtime::run`] for both steps in one call.
    ///
    pub fn run_loop(&mut self) -> TerminationReason {
        while self.next() {}
        self.stop.take().unwrap_or(TerminationReason::NoMoreEvents)
    }

    ///
    /// Runs the application until it terminates or a break condition
    /// is reached, and performs the finish pass.
    ///
    #[must_use]
    pub fn run(mut self) -> RuntimeResult<A> {
        if self.future_event_set.is_empty() {
            tracing::warn!(
                "running simulation without any events, consider adding initial events"
            );
        }
        let reason = self.run_loop();
        self.finish(reason)
    }

    ///
    /// Deconstructs the runtime, running `at_sim_end` where the termination
    /// reason permits it.
    ///
    #[must_use]
    pub fn finish(mut self, reason: TerminationReason) -> RuntimeResult<A> {
        if reason.permits_finish() {
            <A::Lifecycle as EventLifecycle<A>>::at_sim_end(&mut self);
        }

        let time = self.sim_time();
        if !self.quiet {
            println!("\u{23A1} Simulation ended: {reason}");
            println!(
                "\u{23A3}  after event #{} at {} ({} active events left)",
                self.itr,
                time,
                self.future_event_set.len()
            );
        }

        RuntimeResult {
            app: self.app,
            time,
            event_count: self.itr,
            reason,
        }
    }
}

impl<A> Debug for Runtime<A>
where
    A: Application,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Runtime {{ sim_time: {} (itr {} / {}) enqueued: {} }}",
            self.sim_time(),
            self.num_events_received(),
            self.limit,
            self.future_event_set.len()
        )
    }
}

///
/// The result of a full execution of a runtime object.
///
#[derive(Debug)]
#[must_use]
pub struct RuntimeResult<A> {
    /// The application after the simulation was executed.
    pub app: A,
    /// The time of the last event processed within the runtime limits.
    pub time: SimTime,
    /// The number of processed events.
    pub event_count: usize,
    /// Why the event loop stopped.
    pub reason: TerminationReason,
}

impl<A> RuntimeResult<A> {
    /// Whether the simulation ended with an error.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.reason.is_error()
    }

    /// The process exit code associated with this result.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.reason.exit_code()
    }

    ///
    /// Returns the contained app and final time, panicking if the
    /// simulation ended with an error.
    ///
    /// # Panics
    ///
    /// Panics if the termination reason is an error.
    ///
    pub fn unwrap(self) -> (A, SimTime) {
        match self.reason {
            TerminationReason::Error(e) => {
                panic!("called `RuntimeResult::unwrap` on an errored simulation: {e}")
            }
            _ => (self.app, self.time),
        }
    }
}

impl<A> Display for RuntimeResult<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} after {} events at {}",
            self.reason, self.event_count, self.time
        )
    }
}
