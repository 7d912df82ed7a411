//!
//! Temporal quantification in a simulation context.
//!
//! A [`Duration`] describes a span of time, a [`SimTime`] a specific point of
//! simulated time. The current simulation time is a property of the running
//! simulation thread, advanced only by the event loop, and is read through
//! [`SimTime::now`].
//!

pub use std::time::Duration;

use std::cell::Cell;
use std::fmt::{Debug, Display};
use std::ops::{Add, AddAssign, Deref, Div, Sub, SubAssign};

thread_local! {
    static SIMTIME: Cell<SimTime> = const { Cell::new(SimTime::ZERO) };
}

///
/// A specific point of time in the simulation.
///
#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SimTime(Duration);

impl SimTime {
    /// The smallest instance of a [`SimTime`].
    pub const ZERO: SimTime = SimTime(Duration::ZERO);
    /// The smallest valid instance of a [`SimTime`].
    pub const MIN: SimTime = SimTime(Duration::ZERO);
    /// The greatest instance of a [`SimTime`].
    pub const MAX: SimTime = SimTime(Duration::MAX);

    /// Returns an instant corresponding to "now" in the simulation context.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use simkern::prelude::SimTime;
    ///
    /// let now = SimTime::now();
    /// ```
    #[must_use]
    pub fn now() -> Self {
        SIMTIME.with(Cell::get)
    }

    /// Sets the simulation time. Only the event loop may do this.
    pub(crate) fn set_now(time: SimTime) {
        SIMTIME.with(|s| s.set(time));
    }

    ///
    /// Constructs an instance of `SimTime` from a given duration
    /// since [`SimTime::ZERO`].
    ///
    #[must_use]
    pub const fn from_duration(duration: Duration) -> Self {
        Self(duration)
    }

    /// Returns the amount of time elapsed from another instant to this one.
    ///
    /// # Panics
    ///
    /// Panics if `earlier` is later than `self`.
    #[must_use]
    pub fn duration_since(&self, earlier: SimTime) -> Duration {
        self.checked_duration_since(earlier)
            .expect("supplied instant is later than self")
    }

    /// Returns the amount of time elapsed from another instant to this one,
    /// or `None` if that instant is later than this one.
    #[must_use]
    pub fn checked_duration_since(&self, earlier: SimTime) -> Option<Duration> {
        self.0.checked_sub(earlier.0)
    }

    /// Returns the amount of time elapsed from another instant to this one,
    /// or a zero duration if that instant is later than this one.
    #[must_use]
    pub fn saturating_duration_since(&self, earlier: SimTime) -> Duration {
        self.checked_duration_since(earlier).unwrap_or_default()
    }

    /// Returns `Some(t)` where `t` is `self + duration`, if representable.
    #[must_use]
    pub fn checked_add(&self, duration: Duration) -> Option<SimTime> {
        self.0.checked_add(duration).map(SimTime)
    }

    /// Returns `Some(t)` where `t` is `self - duration`, if representable.
    #[must_use]
    pub fn checked_sub(&self, duration: Duration) -> Option<SimTime> {
        self.0.checked_sub(duration).map(SimTime)
    }

    /// The time as a floating point count of seconds since [`SimTime::ZERO`].
    #[must_use]
    pub fn as_secs_f64(&self) -> f64 {
        self.0.as_secs_f64()
    }
}

// CMP

impl PartialEq<f64> for SimTime {
    fn eq(&self, other: &f64) -> bool {
        (self.0.as_secs_f64() - *other).abs() < f64::EPSILON
    }
}

// OPS

impl Add<Duration> for SimTime {
    type Output = SimTime;

    fn add(self, rhs: Duration) -> Self::Output {
        self.checked_add(rhs)
            .expect("overflow when adding Duration to SimTime")
    }
}

impl AddAssign<Duration> for SimTime {
    fn add_assign(&mut self, rhs: Duration) {
        *self = *self + rhs;
    }
}

impl Sub<Duration> for SimTime {
    type Output = SimTime;

    fn sub(self, rhs: Duration) -> Self::Output {
        self.checked_sub(rhs)
            .expect("overflow when subtracting Duration from SimTime")
    }
}

impl SubAssign<Duration> for SimTime {
    fn sub_assign(&mut self, rhs: Duration) {
        *self = *self - rhs;
    }
}

impl Sub<SimTime> for SimTime {
    type Output = Duration;

    fn sub(self, rhs: SimTime) -> Self::Output {
        self.duration_since(rhs)
    }
}

impl Div<SimTime> for SimTime {
    type Output = f64;

    fn div(self, rhs: SimTime) -> Self::Output {
        self.0.as_secs_f64() / rhs.0.as_secs_f64()
    }
}

// DEREF

impl Deref for SimTime {
    type Target = Duration;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

// FMT

impl Debug for SimTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

impl Display for SimTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

// FROM

impl From<SimTime> for f64 {
    fn from(this: SimTime) -> Self {
        this.0.as_secs_f64()
    }
}

impl From<f64> for SimTime {
    fn from(value: f64) -> Self {
        SimTime(Duration::from_secs_f64(value))
    }
}

impl From<Duration> for SimTime {
    fn from(value: Duration) -> Self {
        SimTime(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simtime_arithmetic() {
        let t = SimTime::from(1.5);
        assert_eq!(t + Duration::from_millis(500), SimTime::from(2.0));
        assert_eq!(t - Duration::from_millis(500), SimTime::from(1.0));
        assert_eq!(SimTime::from(3.0) - SimTime::from(1.0), Duration::from_secs(2));
        assert_eq!(SimTime::from(4.0) / SimTime::from(2.0), 2.0);
    }

    #[test]
    fn simtime_saturating_since() {
        let early = SimTime::from(1.0);
        let late = SimTime::from(2.0);
        assert_eq!(early.saturating_duration_since(late), Duration::ZERO);
        assert_eq!(late.saturating_duration_since(early), Duration::from_secs(1));
        assert_eq!(early.checked_duration_since(late), None);
    }
}
