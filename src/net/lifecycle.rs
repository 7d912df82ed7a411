//! The top-level lifecycle of a networking simulation.
//!
//! The [`Driver`] wraps the build/initialize/run/finish steps into an
//! explicit state machine with the following transitions:
//!
//! ```text
//! NoNetwork ──setup_network──▶ New
//! New       ──initialize────▶ Ready
//! Ready     ──run──▶ Ready | Terminated | Errored
//! Terminated | Errored ──call_finish──▶ FinishCalled
//! FinishCalled ──end_run──▶ NoNetwork
//! (any state)  ──abort────▶ NoNetwork
//! ```
//!
//! For one-shot simulations, `Runtime::new(sim).run()` covers the same
//! ground without the explicit states.

use crate::net::runtime::Sim;
use crate::runtime::{
    EventLifecycle, Runtime, RuntimeLimit, RuntimeOptions, RuntimeResult, TerminationReason,
};
use crate::time::SimTime;

///
/// The top-level state of a simulation [`Driver`].
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimState {
    /// No network is set up.
    NoNetwork,
    /// A network was built but not yet initialized.
    New,
    /// The network is initialized; the event loop may (re)start.
    Ready,
    /// The run came to a regular end.
    Terminated,
    /// The run ended with an error; only teardown is possible.
    Errored,
    /// The finish pass ran.
    FinishCalled,
}

///
/// An explicit driver for the simulation lifecycle, for hosts that
/// control build, run and teardown as separate steps.
///
pub struct Driver<A>
where
    A: EventLifecycle<Sim<A>>,
{
    state: SimState,
    pending: Option<Sim<A>>,
    rt: Option<Runtime<Sim<A>>>,
    reason: Option<TerminationReason>,
    result: Option<RuntimeResult<Sim<A>>>,
}

impl<A> Driver<A>
where
    A: EventLifecycle<Sim<A>>,
{
    /// Creates a driver without a network.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: SimState::NoNetwork,
            pending: None,
            rt: None,
            reason: None,
            result: None,
        }
    }

    /// The current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SimState {
        self.state
    }

    /// The reason the last run stopped, if any.
    #[must_use]
    pub fn reason(&self) -> Option<&TerminationReason> {
        self.reason.as_ref()
    }

    ///
    /// Installs a freshly built network. Any previous network is torn
    /// down first.
    ///
    pub fn setup_network(&mut self, sim: Sim<A>) {
        self.teardown();
        self.pending = Some(sim);
        self.state = SimState::New;
    }

    ///
    /// Runs the multi-stage initialization of the installed network.
    ///
    /// # Panics
    ///
    /// Panics if no network is set up.
    ///
    pub fn initialize(&mut self, options: RuntimeOptions) {
        let sim = self
            .pending
            .take()
            .expect("cannot initialize: no network was set up");
        self.rt = Some(Runtime::new_with(sim, options));
        self.state = SimState::Ready;
    }

    ///
    /// Runs the event loop until a termination condition applies.
    ///
    /// Limit-based stops leave the driver in [`SimState::Ready`] so the
    /// run can continue with a widened limit; everything else moves to
    /// [`SimState::Terminated`] or [`SimState::Errored`].
    ///
    /// # Panics
    ///
    /// Panics if the driver is not in the ready state.
    ///
    pub fn run(&mut self) -> &TerminationReason {
        assert!(
            self.state == SimState::Ready,
            "cannot run the simulation from state {:?}",
            self.state
        );
        let rt = self.rt.as_mut().expect("ready state implies a runtime");
        let reason = rt.run_loop();

        self.state = match &reason {
            TerminationReason::TimeLimitReached
            | TerminationReason::EventCountReached
            | TerminationReason::Stopped => SimState::Ready,
            TerminationReason::Error(_) => SimState::Errored,
            _ => SimState::Terminated,
        };
        self.reason = Some(reason);
        self.reason.as_ref().expect("reason was just stored")
    }

    ///
    /// Continues a paused run up to the given simulation time.
    ///
    /// # Panics
    ///
    /// Panics if the driver is not in the ready state.
    ///
    pub fn run_until(&mut self, limit: SimTime) -> &TerminationReason {
        if let Some(rt) = self.rt.as_mut() {
            rt.set_limit(RuntimeLimit::SimTime(limit));
        }
        self.run()
    }

    ///
    /// Runs the finish pass of the terminated (or errored) network.
    /// After an error the per-module finish handlers are skipped, but the
    /// network still transitions into [`SimState::FinishCalled`].
    ///
    /// # Panics
    ///
    /// Panics if the last run did not terminate.
    ///
    pub fn call_finish(&mut self) {
        assert!(
            matches!(self.state, SimState::Terminated | SimState::Errored),
            "cannot call finish from state {:?}",
            self.state
        );
        let rt = self.rt.take().expect("terminated state implies a runtime");
        let reason = self
            .reason
            .clone()
            .expect("terminated state implies a reason");
        self.result = Some(rt.finish(reason));
        self.state = SimState::FinishCalled;
    }

    /// The result of the finished run, if the finish pass already ran.
    pub fn take_result(&mut self) -> Option<RuntimeResult<Sim<A>>> {
        self.result.take()
    }

    ///
    /// Ends the run and tears the network down.
    ///
    pub fn end_run(&mut self) {
        self.teardown();
    }

    ///
    /// Aborts from any state, tearing down whatever exists.
    ///
    pub fn abort(&mut self) {
        self.teardown();
        self.reason = Some(TerminationReason::Stopped);
    }

    fn teardown(&mut self) {
        self.pending = None;
        self.rt = None;
        self.result = None;
        self.reason = None;
        self.state = SimState::NoNetwork;
    }
}

impl<A> Default for Driver<A>
where
    A: EventLifecycle<Sim<A>>,
{
    fn default() -> Self {
        Self::new()
    }
}
