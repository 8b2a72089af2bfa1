//! Virtual time for the deterministic simulation.
//!
//! One tick is one nanosecond of simulated time. Time advances only when
//! the scheduler dispatches events, never from wall-clock observation.

use serde::{Deserialize, Serialize};

/// A logical timestamp in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VirtualTime(u64);

impl VirtualTime {
    /// The zero-point of simulation time.
    pub const ZERO: VirtualTime = VirtualTime(0);

    /// Create a new `VirtualTime` from a raw nanosecond value.
    #[inline]
    pub fn new(ns: u64) -> Self {
        VirtualTime(ns)
    }

    /// Return the raw nanosecond value.
    #[inline]
    pub fn ticks(self) -> u64 {
        self.0
    }

    /// Advance time by `delta` nanoseconds.
    /// Returns `None` on overflow.
    #[inline]
    pub fn advance(self, delta: u64) -> Option<VirtualTime> {
        self.0.checked_add(delta).map(VirtualTime)
    }

    /// Alias for `advance`; reads better where follow-up events are scheduled.
    #[inline]
    pub fn plus(self, delay: u64) -> Option<VirtualTime> {
        self.advance(delay)
    }

    /// Returns `true` if `self` is strictly before `other`.
    #[inline]
    pub fn is_before(self, other: VirtualTime) -> bool {
        self.0 < other.0
    }

    /// Returns the duration (in ns) between two points in time.
    /// Returns `None` if `other` is after `self`.
    #[inline]
    pub fn duration_since(self, other: VirtualTime) -> Option<u64> {
        self.0.checked_sub(other.0)
    }

    /// The first multiple of `period` strictly after `self`.
    ///
    /// Free-running clocks use this to find their next tick. A zero period
    /// returns `None`.
    pub fn next_multiple_of(self, period: u64) -> Option<VirtualTime> {
        if period == 0 {
            return None;
        }
        let k = self.0 / period + 1;
        k.checked_mul(period).map(VirtualTime)
    }
}

impl std::fmt::Display for VirtualTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "T={}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering() {
        let t1 = VirtualTime::new(10);
        let t2 = VirtualTime::new(20);
        assert!(t1 < t2);
        assert!(t1.is_before(t2));
        assert!(!t2.is_before(t1));
    }

    #[test]
    fn test_advance_overflow() {
        assert_eq!(VirtualTime::new(100).advance(50), Some(VirtualTime::new(150)));
        assert!(VirtualTime::new(u64::MAX).advance(1).is_none());
    }

    #[test]
    fn test_duration_since() {
        let t1 = VirtualTime::new(10);
        let t2 = VirtualTime::new(30);
        assert_eq!(t2.duration_since(t1), Some(20));
        assert_eq!(t1.duration_since(t2), None);
    }

    #[test]
    fn test_next_multiple_of() {
        assert_eq!(VirtualTime::ZERO.next_multiple_of(500), Some(VirtualTime::new(500)));
        assert_eq!(VirtualTime::new(500).next_multiple_of(500), Some(VirtualTime::new(1000)));
        assert_eq!(VirtualTime::new(941).next_multiple_of(470), Some(VirtualTime::new(1410)));
        assert_eq!(VirtualTime::new(3).next_multiple_of(0), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", VirtualTime::new(42)), "T=42");
    }
}
