//! Run configuration.
//!
//! A [`SimConfig`] is loaded from JSON and validated before any component
//! is built. Missing fields take the link-layer defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::detector::TimingWindow;
use crate::error::{HeraldError, HeraldResult};
use crate::memory::NoiseSettings;
use crate::source::EntanglingSource;
use crate::substrate::NoiseModel;
use crate::topology::Delay;

/// Attempt periods of the two link endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AttemptPeriods {
    pub a: f64,
    pub b: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// End-to-end distance between the two nodes.
    pub distance_km: f64,
    /// Pair source frequency. Defaults to `4e4 / distance_km`.
    pub source_frequency_hz: Option<f64>,
    /// Memory noise rate applied on every touched position; 0 disables it.
    pub depolar_rate: f64,
    /// Measurement noise rate; 0 disables it.
    pub dephase_rate: f64,
    pub time_window_ns: f64,
    pub dead_time_ns: f64,
    pub attempt_period_ns: AttemptPeriods,
    pub seed: u64,
    /// Storage positions per link node.
    pub pairs: usize,
    /// Attempt periods or source cycles to simulate.
    pub rounds: u64,
    /// Physical-layer reply timeout. Derived from the link when unset;
    /// a link build rejects values that do not exceed its round trip.
    pub reply_timeout_ns: Option<f64>,
    /// Overrides the horizon derived from `rounds`.
    pub horizon_ns: Option<u64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig::link_defaults()
    }
}

impl SimConfig {
    /// Two nodes 2 km apart with a midpoint detector.
    pub fn link_defaults() -> Self {
        SimConfig {
            distance_km: 2.0,
            source_frequency_hz: None,
            depolar_rate: 0.0,
            dephase_rate: 0.0,
            time_window_ns: 20.0,
            dead_time_ns: 0.0,
            attempt_period_ns: AttemptPeriods { a: 500.0, b: 470.0 },
            seed: 42,
            pairs: 3,
            rounds: 1000,
            reply_timeout_ns: None,
            horizon_ns: None,
        }
    }

    /// Two nodes 4 m apart sharing pairs from a midpoint source.
    pub fn teleport_defaults() -> Self {
        SimConfig {
            distance_km: 4e-3,
            depolar_rate: 1e7,
            dephase_rate: 0.2,
            pairs: 1,
            rounds: 100,
            ..SimConfig::link_defaults()
        }
    }

    pub fn from_json_str(json: &str) -> HeraldResult<Self> {
        let config: SimConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> HeraldResult<Self> {
        let content = std::fs::read_to_string(path)?;
        SimConfig::from_json_str(&content)
    }

    pub fn to_json(&self) -> HeraldResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject every value that would make a component constructor fail.
    ///
    /// The source frequency is not checked here: only scenarios with a
    /// pair source read it, through [`SimConfig::source_period`].
    pub fn validate(&self) -> HeraldResult<()> {
        Delay::fibre(self.distance_km)?;
        self.timing_window()?;
        let (a, b) = self.attempt_periods()?;
        if a != b {
            warn!(a, b, "attempt periods differ; heralding will be irregular");
        }
        for (name, rate) in [("depolar_rate", self.depolar_rate), ("dephase_rate", self.dephase_rate)] {
            if !rate.is_finite() || rate < 0.0 {
                return Err(HeraldError::InvalidConfig(format!("{} must be finite and non-negative, got {}", name, rate)));
            }
        }
        if self.pairs == 0 {
            return Err(HeraldError::InvalidConfig("pairs must be at least 1".into()));
        }
        if self.rounds == 0 {
            return Err(HeraldError::InvalidConfig("rounds must be at least 1".into()));
        }
        if let Some(timeout) = self.reply_timeout_ns {
            if !timeout.is_finite() || timeout <= 0.0 {
                return Err(HeraldError::InvalidConfig(format!("reply_timeout_ns must be positive, got {}", timeout)));
            }
        }
        Ok(())
    }

    pub fn timing_window(&self) -> HeraldResult<TimingWindow> {
        TimingWindow::new(self.time_window_ns, self.dead_time_ns)
    }

    /// Attempt periods in whole ns.
    pub fn attempt_periods(&self) -> HeraldResult<(u64, u64)> {
        let check = |p: f64| {
            if !p.is_finite() || p.round() < 1.0 {
                Err(HeraldError::InvalidPeriod { value_ns: p })
            } else {
                Ok(p.round() as u64)
            }
        };
        Ok((check(self.attempt_period_ns.a)?, check(self.attempt_period_ns.b)?))
    }

    pub fn source_frequency(&self) -> f64 {
        self.source_frequency_hz.unwrap_or(4e4 / self.distance_km)
    }

    /// Source emission period in whole ns.
    pub fn source_period(&self) -> HeraldResult<u64> {
        EntanglingSource::period_for(self.source_frequency())
    }

    /// Memory and measurement noise derived from the two rates.
    pub fn noise(&self) -> NoiseSettings {
        NoiseSettings {
            memory: (self.depolar_rate > 0.0).then_some(NoiseModel::Depolarize { rate: self.depolar_rate }),
            measurement: (self.dephase_rate > 0.0).then_some(NoiseModel::Dephase { rate: self.dephase_rate }),
            measured_position: 0,
        }
    }
}
