use crate::runtime::RuntimeLimit;
use crate::time::SimTime;
use rand::{prelude::StdRng, SeedableRng};

///
/// Options for specifying the behaviour of the core runtime,
/// independent of the app logic.
///
#[derive(Debug)]
pub struct RuntimeOptions {
    ///
    /// Whether the simulation should write status banners to stdout.
    ///
    pub quiet: bool,

    ///
    /// The random number generator used internally. This can be seeded to
    /// ensure reproducibility. Defaults to an OS-seeded generator which does
    /// NOT provide reproducibility.
    ///
    pub rng: Option<StdRng>,

    ///
    /// The seed the RNG was derived from, if any. Derived per-component
    /// random streams (e.g. channel error draws) fold this seed into their
    /// own state so repeat runs are bit-reproducible.
    ///
    pub seed: Option<u64>,

    ///
    /// The maximum number of events processed by the simulation.
    ///
    pub max_itr: Option<usize>,

    ///
    /// The simulation time the simulation starts at.
    ///
    pub min_sim_time: Option<SimTime>,

    ///
    /// The maximum simulation time the simulation may reach.
    ///
    pub max_sim_time: Option<SimTime>,

    ///
    /// A custom limit that determines the end of the simulation,
    /// overwriting `max_itr` and `max_sim_time` if set.
    ///
    pub custom_limit: Option<RuntimeLimit>,
}

impl RuntimeOptions {
    ///
    /// Creates a seeded runtime for reproducible runs.
    ///
    #[must_use]
    pub fn seeded(state: u64) -> Self {
        Self {
            rng: Some(StdRng::seed_from_u64(state)),
            seed: Some(state),
            ..Self::default()
        }
    }

    ///
    /// Suppresses runtime messages from the simulation framework.
    ///
    #[must_use]
    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    ///
    /// Changes the maximum number of processed events (default: unbounded).
    ///
    #[must_use]
    pub fn max_itr(mut self, max_itr: usize) -> Self {
        self.max_itr = Some(max_itr);
        self
    }

    ///
    /// Changes the maximum simulation time of the runtime (default: inf).
    ///
    #[must_use]
    pub fn max_time(mut self, max_time: SimTime) -> Self {
        self.max_sim_time = Some(max_time);
        self
    }

    ///
    /// Changes the start time of the runtime (default: 0).
    ///
    #[must_use]
    pub fn min_time(mut self, min_time: SimTime) -> Self {
        self.min_sim_time = Some(min_time);
        self
    }

    ///
    /// Sets a custom limit for the end of the runtime, overwriting
    /// all `max_itr` and `max_time` options.
    ///
    #[must_use]
    pub fn limit(mut self, limit: RuntimeLimit) -> Self {
        self.custom_limit = Some(limit);
        self
    }
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            quiet: false,
            rng: None,
            seed: None,
            max_itr: None,
            min_sim_time: None,
            max_sim_time: None,
            custom_limit: None,
        }
    }
}
