//! One-directional delay channels.

use serde::{Deserialize, Serialize};

use crate::error::{HeraldError, HeraldResult};

use super::id::{ChannelId, PortId};

/// Signal propagation speed in optical fibre.
pub const FIBRE_SPEED_KM_PER_S: f64 = 200_000.0;

/// A validated, non-negative propagation delay.
///
/// The exact value is kept as `f64` nanoseconds; the scheduler works in
/// whole nanoseconds via [`Delay::ticks`].
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct Delay {
    ns: f64,
}

impl Delay {
    pub const ZERO: Delay = Delay { ns: 0.0 };

    /// A fixed delay. Rejects negative, NaN and infinite values.
    pub fn from_ns(ns: f64) -> HeraldResult<Self> {
        if !ns.is_finite() || ns < 0.0 {
            return Err(HeraldError::InvalidDelay { value_ns: ns });
        }
        Ok(Delay { ns })
    }

    /// Delay over `distance_km` of fibre: `distance_km / 200000 * 1e9` ns.
    pub fn fibre(distance_km: f64) -> HeraldResult<Self> {
        Delay::from_ns(distance_km / FIBRE_SPEED_KM_PER_S * 1e9)
    }

    /// Exact delay in nanoseconds.
    pub fn ns(self) -> f64 {
        self.ns
    }

    /// Delay rounded to the nearest whole nanosecond.
    pub fn ticks(self) -> u64 {
        self.ns.round() as u64
    }
}

impl std::fmt::Display for Delay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ns", self.ns)
    }
}

/// What a channel carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Quantum,
    Classical,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    pub id: ChannelId,
    pub kind: ChannelKind,
    pub from: PortId,
    pub to: PortId,
    pub delay: Delay,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fibre_formula() {
        // 1 km at 200,000 km/s is 5 µs.
        assert_eq!(Delay::fibre(1.0).unwrap().ns(), 1.0 / 200000.0 * 1e9);
        assert_eq!(Delay::fibre(1.0).unwrap().ticks(), 5000);
        assert_eq!(Delay::fibre(2e-3).unwrap().ticks(), 10);
        assert_eq!(Delay::fibre(4e-3).unwrap().ticks(), 20);
        assert_eq!(Delay::fibre(0.0).unwrap(), Delay::ZERO);
    }

    #[test]
    fn test_invalid_delay_rejected() {
        assert_eq!(
            Delay::from_ns(-1.0),
            Err(HeraldError::InvalidDelay { value_ns: -1.0 })
        );
        assert!(Delay::from_ns(f64::NAN).is_err());
        assert!(Delay::from_ns(f64::INFINITY).is_err());
        assert!(Delay::fibre(-0.5).is_err());
    }

    #[test]
    fn test_ticks_rounding() {
        assert_eq!(Delay::from_ns(2.4).unwrap().ticks(), 2);
        assert_eq!(Delay::from_ns(2.5).unwrap().ticks(), 3);
    }
}
