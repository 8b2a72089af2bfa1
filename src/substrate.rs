//! The quantum-state substrate capability interface.
//!
//! Herald never simulates quantum states itself. Everything physical goes
//! through a [`Substrate`]: qubit initialisation, gates, measurement,
//! noise, and the joint measurement performed by a heralding detector.
//! Each operation reports a [`Completion`] whose duration the scheduler
//! turns into an `OperationComplete` event.
//!
//! Two implementations ship with the crate:
//!
//! - [`ScriptedSubstrate`] replays fixed outcome sequences and records
//!   every call, for tests that need exact control;
//! - [`RandomSubstrate`] draws uniform outcomes from a seeded SplitMix64
//!   generator, for experiment runs.

use std::any::Any;
use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::message::Photon;
use crate::topology::{DetectorId, NodeId};

// ── Outcome codes ─────────────────────────────────────────────────────

/// A detector outcome code, passed through verbatim from the substrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutcomeCode(u8);

impl OutcomeCode {
    pub const NO_CLICK: OutcomeCode = OutcomeCode(0);
    pub const CLICK_A: OutcomeCode = OutcomeCode(1);
    pub const CLICK_B: OutcomeCode = OutcomeCode(2);
    pub const DOUBLE_CLICK: OutcomeCode = OutcomeCode(3);

    pub fn new(raw: u8) -> Self {
        OutcomeCode(raw)
    }

    pub fn raw(self) -> u8 {
        self.0
    }
}

impl std::fmt::Display for OutcomeCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Operations ────────────────────────────────────────────────────────

/// A memory position on a specific node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotRef {
    pub node: NodeId,
    pub position: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Gate {
    H,
    S,
    X,
    Z,
    Cnot,
    Swap,
}

impl Gate {
    /// Number of positions the gate acts on.
    pub fn arity(self) -> usize {
        match self {
            Gate::H | Gate::S | Gate::X | Gate::Z => 1,
            Gate::Cnot | Gate::Swap => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "lowercase")]
pub enum NoiseModel {
    /// Depolarising memory noise, rate in Hz.
    Depolarize { rate: f64 },
    /// Dephasing, as a probability.
    Dephase { rate: f64 },
}

/// How long a substrate operation takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Completion {
    pub duration: u64,
}

impl Completion {
    pub fn after(duration: u64) -> Self {
        Completion { duration }
    }
}

/// Per-instruction durations in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstructionTimings {
    pub init: u64,
    pub h: u64,
    pub s: u64,
    pub x: u64,
    pub z: u64,
    pub cnot: u64,
    pub swap: u64,
    pub measure: u64,
}

impl Default for InstructionTimings {
    fn default() -> Self {
        InstructionTimings {
            init: 3,
            h: 1,
            s: 1,
            x: 1,
            z: 1,
            cnot: 4,
            swap: 4,
            measure: 7,
        }
    }
}

impl InstructionTimings {
    pub fn gate(&self, gate: Gate) -> u64 {
        match gate {
            Gate::H => self.h,
            Gate::S => self.s,
            Gate::X => self.x,
            Gate::Z => self.z,
            Gate::Cnot => self.cnot,
            Gate::Swap => self.swap,
        }
    }
}

// ── Capability interface ──────────────────────────────────────────────

pub trait Substrate {
    fn init_qubit(&mut self, slot: SlotRef) -> Completion;

    fn apply_gate(&mut self, gate: Gate, slots: &[SlotRef]) -> Completion;

    /// Measure each slot, returning one bit per slot.
    fn measure(&mut self, slots: &[SlotRef]) -> (Completion, Vec<u8>);

    fn apply_noise(&mut self, slot: SlotRef, model: NoiseModel);

    /// Joint measurement of two photons at a detector.
    fn measure_arrivals(&mut self, detector: DetectorId, photons: [&Photon; 2]) -> OutcomeCode;

    fn as_any(&self) -> &dyn Any;
}

// ── Scripted ──────────────────────────────────────────────────────────

/// A recorded substrate call.
#[derive(Debug, Clone, PartialEq)]
pub enum SubstrateCall {
    Init(SlotRef),
    Gate(Gate, Vec<SlotRef>),
    Measure(Vec<SlotRef>),
    Noise(SlotRef, NoiseModel),
    Arrivals(DetectorId),
}

/// Replays scripted outcomes in order.
///
/// When a script runs dry the configured default is returned, so a short
/// script followed by a steady state is easy to express.
#[derive(Debug, Clone)]
pub struct ScriptedSubstrate {
    timings: InstructionTimings,
    outcomes: VecDeque<OutcomeCode>,
    default_outcome: OutcomeCode,
    bits: VecDeque<u8>,
    calls: Vec<SubstrateCall>,
}

impl Default for ScriptedSubstrate {
    fn default() -> Self {
        ScriptedSubstrate::new()
    }
}

impl ScriptedSubstrate {
    pub fn new() -> Self {
        ScriptedSubstrate {
            timings: InstructionTimings::default(),
            outcomes: VecDeque::new(),
            default_outcome: OutcomeCode::NO_CLICK,
            bits: VecDeque::new(),
            calls: Vec::new(),
        }
    }

    pub fn with_timings(mut self, timings: InstructionTimings) -> Self {
        self.timings = timings;
        self
    }

    /// Detector outcome codes, consumed one per `BothArrived` cycle.
    pub fn with_outcomes(mut self, outcomes: impl IntoIterator<Item = OutcomeCode>) -> Self {
        self.outcomes.extend(outcomes);
        self
    }

    pub fn with_default_outcome(mut self, code: OutcomeCode) -> Self {
        self.default_outcome = code;
        self
    }

    /// Measurement bits, consumed one per measured slot. Default 0.
    pub fn with_bits(mut self, bits: impl IntoIterator<Item = u8>) -> Self {
        self.bits.extend(bits);
        self
    }

    pub fn calls(&self) -> &[SubstrateCall] {
        &self.calls
    }

    /// Gates issued against `slot`, in issue order.
    pub fn gates_on(&self, slot: SlotRef) -> Vec<Gate> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                SubstrateCall::Gate(g, slots) if slots.contains(&slot) => Some(*g),
                _ => None,
            })
            .collect()
    }
}

impl Substrate for ScriptedSubstrate {
    fn init_qubit(&mut self, slot: SlotRef) -> Completion {
        self.calls.push(SubstrateCall::Init(slot));
        Completion::after(self.timings.init)
    }

    fn apply_gate(&mut self, gate: Gate, slots: &[SlotRef]) -> Completion {
        self.calls.push(SubstrateCall::Gate(gate, slots.to_vec()));
        Completion::after(self.timings.gate(gate))
    }

    fn measure(&mut self, slots: &[SlotRef]) -> (Completion, Vec<u8>) {
        self.calls.push(SubstrateCall::Measure(slots.to_vec()));
        let bits = slots
            .iter()
            .map(|_| self.bits.pop_front().unwrap_or(0))
            .collect();
        (Completion::after(self.timings.measure * slots.len() as u64), bits)
    }

    fn apply_noise(&mut self, slot: SlotRef, model: NoiseModel) {
        self.calls.push(SubstrateCall::Noise(slot, model));
    }

    fn measure_arrivals(&mut self, detector: DetectorId, _photons: [&Photon; 2]) -> OutcomeCode {
        self.calls.push(SubstrateCall::Arrivals(detector));
        self.outcomes.pop_front().unwrap_or(self.default_outcome)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ── Random ────────────────────────────────────────────────────────────

/// SplitMix64: a small deterministic PRNG with identical sequences for a
/// given seed on every platform.
#[derive(Debug, Clone)]
pub struct DeterministicRng {
    state: u64,
}

impl DeterministicRng {
    pub fn new(seed: u64) -> Self {
        DeterministicRng { state: seed }
    }

    pub fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9e3779b97f4a7c15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
        z ^ (z >> 31)
    }

    /// Uniform f64 in [0.0, 1.0).
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Uniform u64 in [min, max). Returns `min` if min >= max.
    pub fn next_range(&mut self, min: u64, max: u64) -> u64 {
        if min >= max {
            return min;
        }
        min + (self.next_u64() % (max - min))
    }
}

/// Draws uniform outcome codes and measurement bits from a seeded RNG.
///
/// Noise calls only advance a counter; the stub keeps no quantum state.
#[derive(Debug, Clone)]
pub struct RandomSubstrate {
    rng: DeterministicRng,
    timings: InstructionTimings,
    noise_applications: u64,
}

impl RandomSubstrate {
    pub fn new(seed: u64) -> Self {
        RandomSubstrate {
            rng: DeterministicRng::new(seed),
            timings: InstructionTimings::default(),
            noise_applications: 0,
        }
    }

    pub fn with_timings(mut self, timings: InstructionTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn noise_applications(&self) -> u64 {
        self.noise_applications
    }
}

impl Substrate for RandomSubstrate {
    fn init_qubit(&mut self, _slot: SlotRef) -> Completion {
        Completion::after(self.timings.init)
    }

    fn apply_gate(&mut self, gate: Gate, _slots: &[SlotRef]) -> Completion {
        Completion::after(self.timings.gate(gate))
    }

    fn measure(&mut self, slots: &[SlotRef]) -> (Completion, Vec<u8>) {
        let bits = slots.iter().map(|_| self.rng.next_range(0, 2) as u8).collect();
        (Completion::after(self.timings.measure * slots.len() as u64), bits)
    }

    fn apply_noise(&mut self, _slot: SlotRef, _model: NoiseModel) {
        self.noise_applications += 1;
    }

    fn measure_arrivals(&mut self, _detector: DetectorId, _photons: [&Photon; 2]) -> OutcomeCode {
        OutcomeCode::new(self.rng.next_range(0, 4) as u8)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::QubitId;
    use crate::time::VirtualTime;

    fn photon(id: u64) -> Photon {
        Photon {
            qubit: QubitId::new(id),
            emitted_at: VirtualTime::ZERO,
        }
    }

    #[test]
    fn test_rng_deterministic() {
        let mut a = DeterministicRng::new(42);
        let mut b = DeterministicRng::new(42);
        for _ in 0..100 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
        let f = DeterministicRng::new(7).next_f64();
        assert!((0.0..1.0).contains(&f));
    }

    #[test]
    fn test_scripted_outcomes_then_default() {
        let mut s = ScriptedSubstrate::new()
            .with_outcomes([OutcomeCode::DOUBLE_CLICK, OutcomeCode::CLICK_A])
            .with_default_outcome(OutcomeCode::CLICK_B);
        let (p, q) = (photon(0), photon(1));
        let d = DetectorId::new(0);

        assert_eq!(s.measure_arrivals(d, [&p, &q]), OutcomeCode::DOUBLE_CLICK);
        assert_eq!(s.measure_arrivals(d, [&p, &q]), OutcomeCode::CLICK_A);
        assert_eq!(s.measure_arrivals(d, [&p, &q]), OutcomeCode::CLICK_B);
    }

    #[test]
    fn test_scripted_measure_durations_and_bits() {
        let mut s = ScriptedSubstrate::new().with_bits([1, 0, 1]);
        let a = SlotRef {
            node: NodeId::new(0),
            position: 0,
        };
        let b = SlotRef {
            node: NodeId::new(0),
            position: 1,
        };

        let (c, bits) = s.measure(&[a, b]);
        assert_eq!(c.duration, 14);
        assert_eq!(bits, vec![1, 0]);
        let (_, bits) = s.measure(&[a, b]);
        assert_eq!(bits, vec![1, 0]);

        assert_eq!(s.apply_gate(Gate::Cnot, &[a, b]).duration, 4);
        assert_eq!(s.gates_on(b), vec![Gate::Cnot]);
    }

    #[test]
    fn test_random_substrate_seeded() {
        let mut a = RandomSubstrate::new(9);
        let mut b = RandomSubstrate::new(9);
        let (p, q) = (photon(0), photon(1));
        for _ in 0..32 {
            let x = a.measure_arrivals(DetectorId::new(0), [&p, &q]);
            let y = b.measure_arrivals(DetectorId::new(0), [&p, &q]);
            assert_eq!(x, y);
            assert!(x.raw() < 4);
        }
    }
}
