use crate::runtime::TerminationReason;
use crate::time::SimTime;
use std::{fmt::Display, mem};

///
/// A composed limit that terminates the event execution of a runtime.
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeLimit {
    /// An unbounded runtime. A runtime with this limit will only finish
    /// once all events are handled and no new events have been created.
    None,

    /// A bound on the number of executed events. A runtime with this limit
    /// terminates prematurely after the given bound is exceeded, but finishes
    /// normally if the bound-th event is the last one.
    EventCount(usize),

    /// A bound on the simulation time. A runtime with this bound terminates
    /// once an event at or beyond the given simulation time would be
    /// processed; events strictly before the bound are still delivered.
    SimTime(SimTime),

    /// Combines two limits with a logical AND: terminates only once both
    /// limits apply.
    CombinedAnd(Box<RuntimeLimit>, Box<RuntimeLimit>),

    /// Combines two limits with a logical OR: terminates once either
    /// limit applies.
    CombinedOr(Box<RuntimeLimit>, Box<RuntimeLimit>),
}

impl RuntimeLimit {
    pub(crate) fn applies(&self, itr_count: usize, time: SimTime) -> bool {
        match self {
            Self::None => false,

            Self::EventCount(e) => itr_count > *e,
            Self::SimTime(t) => time >= *t,

            Self::CombinedAnd(lhs, rhs) => {
                lhs.applies(itr_count, time) && rhs.applies(itr_count, time)
            }
            Self::CombinedOr(lhs, rhs) => {
                lhs.applies(itr_count, time) || rhs.applies(itr_count, time)
            }
        }
    }

    /// Classifies an applying limit as a termination reason. Time limits
    /// dominate combined reasons since they describe the observable state.
    pub(crate) fn reason(&self, itr_count: usize, time: SimTime) -> TerminationReason {
        match self {
            Self::SimTime(_) => TerminationReason::TimeLimitReached,
            Self::EventCount(_) => TerminationReason::EventCountReached,
            Self::CombinedAnd(lhs, rhs) | Self::CombinedOr(lhs, rhs) => {
                if lhs.applies(itr_count, time) {
                    lhs.reason(itr_count, time)
                } else {
                    rhs.reason(itr_count, time)
                }
            }
            Self::None => TerminationReason::NoMoreEvents,
        }
    }

    pub(crate) fn add(&mut self, limit: RuntimeLimit) {
        if matches!(self, Self::None) {
            *self = limit;
        } else {
            let mut other = Self::None;
            mem::swap(&mut other, self);
            *self = Self::CombinedOr(Box::new(other), Box::new(limit));
        }
    }
}

impl Display for RuntimeLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "None"),

            Self::EventCount(e) => write!(f, "MaxEventCount({e})"),
            Self::SimTime(t) => write!(f, "MaxSimTime({t})"),

            Self::CombinedAnd(lhs, rhs) => write!(f, "{lhs} and {rhs}"),
            Self::CombinedOr(lhs, rhs) => write!(f, "{lhs} or {rhs}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_limits() {
        let limit = RuntimeLimit::None;
        assert!(!limit.applies(123, 100.0.into()));
        assert!(!limit.applies(0, 0.0.into()));
        assert!(!limit.applies(usize::MAX, SimTime::MAX));

        let limit = RuntimeLimit::EventCount(100);
        assert!(!limit.applies(23, 100.0.into()));
        assert!(limit.applies(101, 0.0.into()));
        assert!(limit.applies(101, SimTime::MAX));

        let limit = RuntimeLimit::SimTime(100.0.into());
        assert!(!limit.applies(0, 10.0.into()));
        assert!(!limit.applies(0, 99.999999.into()));
        assert!(limit.applies(0, 100.0.into()));
        assert!(limit.applies(0, SimTime::MAX));
    }

    #[test]
    fn combined_limits() {
        use RuntimeLimit::{CombinedAnd, CombinedOr, EventCount, SimTime};

        let limit = CombinedAnd(Box::new(EventCount(100)), Box::new(SimTime(100.0.into())));
        assert!(!limit.applies(200, 10.0.into()));
        assert!(!limit.applies(0, 200.0.into()));
        assert!(limit.applies(101, 100.000001.into()));

        let limit = CombinedOr(Box::new(EventCount(100)), Box::new(SimTime(100.0.into())));
        assert!(!limit.applies(20, 10.0.into()));
        assert!(limit.applies(0, 200.0.into()));
        assert!(limit.applies(101, 10.0.into()));

        let mut other = RuntimeLimit::EventCount(100);
        other.add(SimTime(100.0.into()));
        assert_eq!(limit, other);
    }

    #[test]
    fn limit_reasons() {
        let limit = RuntimeLimit::SimTime(5.0.into());
        assert_eq!(limit.reason(0, 6.0.into()), TerminationReason::TimeLimitReached);

        let limit = RuntimeLimit::CombinedOr(
            Box::new(RuntimeLimit::EventCount(10)),
            Box::new(RuntimeLimit::SimTime(5.0.into())),
        );
        assert_eq!(limit.reason(11, 0.0.into()), TerminationReason::EventCountReached);
        assert_eq!(limit.reason(0, 6.0.into()), TerminationReason::TimeLimitReached);
    }
}
