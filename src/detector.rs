//! Midpoint heralding detector.
//!
//! A detector cycle opens on the first accepted arrival and lasts
//! `system_delay` ns. The window is half-open, `[opened_at, closes_at)`:
//! an arrival at exactly `closes_at` belongs to the next cycle. When the
//! window closes the cycle is classified, one heralding message is
//! produced per contributing port, and the detector stays blind for
//! `dead_time` ns.
//!
//! ```text
//!        opened_at                closes_at          until
//!  ──────────┼────── window ──────────┼──── dead ─────┼──────
//!            A            B           ▲ classify       accepts again
//! ```
//!
//! The detector is a passive state machine. The runtime feeds it
//! arrivals and window-close events; it never schedules anything itself.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{HeraldError, HeraldResult};
use crate::message::{HeraldMessage, Photon};
use crate::substrate::{OutcomeCode, Substrate};
use crate::time::VirtualTime;
use crate::topology::{DetectorId, PortId};

// ── Timing window ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingWindow {
    pub system_delay: u64,
    pub dead_time: u64,
}

impl TimingWindow {
    /// Both values in ns; rejects negative, NaN and infinite inputs.
    pub fn new(system_delay_ns: f64, dead_time_ns: f64) -> HeraldResult<Self> {
        for (field, value) in [("time window", system_delay_ns), ("dead time", dead_time_ns)] {
            if !value.is_finite() || value < 0.0 {
                return Err(HeraldError::InvalidWindow {
                    field,
                    value_ns: value,
                });
            }
        }
        Ok(TimingWindow {
            system_delay: system_delay_ns.round() as u64,
            dead_time: dead_time_ns.round() as u64,
        })
    }
}

// ── Outcomes ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorOutcome {
    NoArrival,
    SingleArrival(PortId),
    BothArrived(OutcomeCode),
}

/// The classified end of one detector cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub cycle: u64,
    pub closed_at: VirtualTime,
    pub outcome: DetectorOutcome,
    /// `(detector input index, message)`; one entry per contributing port.
    pub heralds: Vec<(usize, HeraldMessage)>,
}

/// What happened to an arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrivalEffect {
    /// The arrival opened a new cycle; its window closes at `closes_at`.
    Opened { cycle: u64, closes_at: VirtualTime },
    /// The arrival joined the open cycle.
    Joined { cycle: u64 },
    /// The detector was in dead time.
    DroppedDead,
    /// This input already contributed a qubit to the open cycle.
    DroppedDuplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DetectorStats {
    pub cycles: u64,
    pub both_arrived: u64,
    pub single_arrivals: u64,
    pub dropped: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Collecting {
        cycle: u64,
        opened_at: VirtualTime,
        closes_at: VirtualTime,
    },
    Dead {
        until: VirtualTime,
    },
}

#[derive(Debug, Clone, Copy)]
struct Arrival {
    sender: PortId,
    photon: Photon,
    at: VirtualTime,
}

// ── Detector ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Detector {
    id: DetectorId,
    name: String,
    window: TimingWindow,
    ports: [PortId; 2],
    phase: Phase,
    next_cycle: u64,
    arrivals: [Option<Arrival>; 2],
    stats: DetectorStats,
}

impl Detector {
    pub fn new(id: DetectorId, name: &str, window: TimingWindow, ports: [PortId; 2]) -> Self {
        Detector {
            id,
            name: name.to_string(),
            window,
            ports,
            phase: Phase::Idle,
            next_cycle: 0,
            arrivals: [None, None],
            stats: DetectorStats::default(),
        }
    }

    pub fn id(&self) -> DetectorId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn window(&self) -> TimingWindow {
        self.window
    }

    /// Detector input ports, side A then side B.
    pub fn ports(&self) -> [PortId; 2] {
        self.ports
    }

    pub fn stats(&self) -> DetectorStats {
        self.stats
    }

    /// Start of the open cycle's window, if one is open.
    pub fn open_since(&self) -> Option<VirtualTime> {
        match self.phase {
            Phase::Collecting { opened_at, .. } => Some(opened_at),
            _ => None,
        }
    }

    /// Feed one qubit arriving on input `index` from node port `sender`.
    ///
    /// If the arrival lands at or after the open window's close time, that
    /// cycle is classified first and its report is returned alongside the
    /// effect of the new arrival.
    pub fn on_arrival(
        &mut self,
        now: VirtualTime,
        index: usize,
        sender: PortId,
        photon: Photon,
        substrate: &mut dyn Substrate,
    ) -> (Option<CycleReport>, ArrivalEffect) {
        let mut late_report = None;
        if let Phase::Collecting { cycle, closes_at, .. } = self.phase {
            if now >= closes_at {
                late_report = self.finish(cycle, closes_at, substrate);
            }
        }

        let effect = match self.phase {
            Phase::Dead { until } if now < until => {
                self.stats.dropped += 1;
                debug!(detector = %self.id, %now, %until, "arrival during dead time dropped");
                ArrivalEffect::DroppedDead
            }
            Phase::Idle | Phase::Dead { .. } => {
                let cycle = self.next_cycle;
                self.next_cycle += 1;
                let closes_at = VirtualTime::new(now.ticks().saturating_add(self.window.system_delay));
                self.phase = Phase::Collecting {
                    cycle,
                    opened_at: now,
                    closes_at,
                };
                self.arrivals[index] = Some(Arrival {
                    sender,
                    photon,
                    at: now,
                });
                debug!(detector = %self.id, cycle, %now, %closes_at, side = index, "window opened");
                ArrivalEffect::Opened { cycle, closes_at }
            }
            Phase::Collecting { cycle, .. } => {
                if self.arrivals[index].is_some() {
                    self.stats.dropped += 1;
                    debug!(detector = %self.id, cycle, side = index, "duplicate arrival dropped");
                    ArrivalEffect::DroppedDuplicate
                } else {
                    self.arrivals[index] = Some(Arrival {
                        sender,
                        photon,
                        at: now,
                    });
                    ArrivalEffect::Joined { cycle }
                }
            }
        };

        (late_report, effect)
    }

    /// Close `cycle` at `now`. Stale cycle numbers are ignored.
    pub fn close_window(
        &mut self,
        cycle: u64,
        now: VirtualTime,
        substrate: &mut dyn Substrate,
    ) -> Option<CycleReport> {
        match self.phase {
            Phase::Collecting { cycle: open, .. } if open == cycle => self.finish(cycle, now, substrate),
            _ => None,
        }
    }

    fn finish(
        &mut self,
        cycle: u64,
        now: VirtualTime,
        substrate: &mut dyn Substrate,
    ) -> Option<CycleReport> {
        let arrivals = std::mem::take(&mut self.arrivals);
        self.phase = Phase::Dead {
            until: VirtualTime::new(now.ticks().saturating_add(self.window.dead_time)),
        };
        self.stats.cycles += 1;

        let (outcome, heralds) = match arrivals {
            [Some(a), Some(b)] => {
                let code = substrate.measure_arrivals(self.id, [&a.photon, &b.photon]);
                self.stats.both_arrived += 1;
                (
                    DetectorOutcome::BothArrived(code),
                    vec![
                        (0, HeraldMessage::outcome(a.sender, code)),
                        (1, HeraldMessage::outcome(b.sender, code)),
                    ],
                )
            }
            [Some(a), None] => {
                self.stats.single_arrivals += 1;
                (
                    DetectorOutcome::SingleArrival(a.sender),
                    vec![(0, HeraldMessage::timeout(a.sender))],
                )
            }
            [None, Some(b)] => {
                self.stats.single_arrivals += 1;
                (
                    DetectorOutcome::SingleArrival(b.sender),
                    vec![(1, HeraldMessage::timeout(b.sender))],
                )
            }
            [None, None] => (DetectorOutcome::NoArrival, Vec::new()),
        };

        debug!(
            detector = %self.id,
            cycle,
            %now,
            outcome = ?outcome,
            first = ?arrivals.iter().flatten().map(|a| a.at).min(),
            "cycle classified"
        );

        Some(CycleReport {
            cycle,
            closed_at: now,
            outcome,
            heralds,
        })
    }
}
