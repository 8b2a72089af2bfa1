//! Per-node quantum memory and instruction programs.
//!
//! A memory is a fixed array of positions. Each position is either empty
//! or holds a qubit, and is *busy* while a program that touches it is in
//! flight. Programs are validated as a whole before anything reaches the
//! substrate: addressing an empty position (other than through `Init`) or
//! a busy one is a precondition violation and nothing is executed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{HeraldError, HeraldResult};
use crate::substrate::{Gate, NoiseModel, SlotRef, Substrate};
use crate::topology::NodeId;

// ── Identifiers ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QubitId(u64);

impl QubitId {
    pub fn new(raw: u64) -> Self {
        QubitId(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for QubitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "q{}", self.0)
    }
}

/// Mints qubit identities for a run.
#[derive(Debug, Clone, Default)]
pub struct QubitAllocator {
    next: u64,
}

impl QubitAllocator {
    pub fn allocate(&mut self) -> QubitId {
        let id = QubitId(self.next);
        self.next += 1;
        id
    }
}

/// An in-flight memory program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(u64);

impl OperationId {
    pub fn new(raw: u64) -> Self {
        OperationId(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "op#{}", self.0)
    }
}

// ── Programs ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// Put a fresh qubit in |0> at the position, replacing any occupant.
    Init(usize),
    Gate(Gate, Vec<usize>),
    /// Measure in the computational basis; the qubit stays in place.
    Measure(usize),
}

impl Instruction {
    fn positions(&self) -> &[usize] {
        match self {
            Instruction::Init(p) | Instruction::Measure(p) => std::slice::from_ref(p),
            Instruction::Gate(_, ps) => ps,
        }
    }
}

/// An ordered instruction list executed as a single operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    name: &'static str,
    instructions: Vec<Instruction>,
}

impl Program {
    pub fn new(name: &'static str) -> Self {
        Program {
            name,
            instructions: Vec::new(),
        }
    }

    pub fn init(mut self, position: usize) -> Self {
        self.instructions.push(Instruction::Init(position));
        self
    }

    pub fn gate(mut self, gate: Gate, positions: &[usize]) -> Self {
        self.instructions.push(Instruction::Gate(gate, positions.to_vec()));
        self
    }

    pub fn measure(mut self, position: usize) -> Self {
        self.instructions.push(Instruction::Measure(position));
        self
    }

    /// Prepare |y0> = S·H|0>.
    pub fn init_state(position: usize) -> Self {
        Program::new("init_state")
            .init(position)
            .gate(Gate::H, &[position])
            .gate(Gate::S, &[position])
    }

    /// Bell-basis measurement of `(a, b)`; bits come back as `[m1, m2]`.
    pub fn bell_measurement(a: usize, b: usize) -> Self {
        Program::new("bell_measurement")
            .gate(Gate::Cnot, &[a, b])
            .gate(Gate::H, &[a])
            .measure(a)
            .measure(b)
    }

    /// A single-qubit correction gate.
    pub fn correction(gate: Gate, position: usize) -> Self {
        Program::new("correction").gate(gate, &[position])
    }

    /// Exchange the contents of two positions.
    pub fn swap(a: usize, b: usize) -> Self {
        Program::new("swap").gate(Gate::Swap, &[a, b])
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }
}

// ── Memory ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseSettings {
    /// Applied to every occupied position an instruction touches.
    pub memory: Option<NoiseModel>,
    /// Applied before measuring `measured_position`.
    pub measurement: Option<NoiseModel>,
    pub measured_position: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Empty,
    Occupied(QubitId),
}

#[derive(Debug, Clone, Copy)]
struct Position {
    state: SlotState,
    busy: Option<OperationId>,
}

/// Result of starting a program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    pub op: OperationId,
    pub duration: u64,
    /// One bit per `Measure` instruction, in program order.
    pub bits: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct QuantumMemory {
    node: NodeId,
    positions: Vec<Position>,
    noise: NoiseSettings,
    in_flight: BTreeMap<OperationId, Vec<usize>>,
}

impl QuantumMemory {
    pub fn new(node: NodeId, size: usize) -> Self {
        QuantumMemory {
            node,
            positions: vec![
                Position {
                    state: SlotState::Empty,
                    busy: None,
                };
                size
            ],
            noise: NoiseSettings::default(),
            in_flight: BTreeMap::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.positions.len()
    }

    pub fn set_noise(&mut self, noise: NoiseSettings) {
        self.noise = noise;
    }

    pub fn noise(&self) -> NoiseSettings {
        self.noise
    }

    pub fn state(&self, position: usize) -> HeraldResult<SlotState> {
        Ok(self.position(position)?.state)
    }

    /// The operation currently holding `position`, if any.
    pub fn busy_with(&self, position: usize) -> HeraldResult<Option<OperationId>> {
        Ok(self.position(position)?.busy)
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight.is_empty()
    }

    /// Validate and start `program`. Positions it touches stay busy until
    /// [`QuantumMemory::complete`] is called for `op`.
    pub fn execute(
        &mut self,
        program: &Program,
        op: OperationId,
        substrate: &mut dyn Substrate,
        qubits: &mut QubitAllocator,
    ) -> HeraldResult<Execution> {
        self.validate(program)?;

        let mut duration = 0u64;
        let mut bits = Vec::new();
        let mut touched: Vec<usize> = Vec::new();

        for instr in program.instructions() {
            for &p in instr.positions() {
                if !touched.contains(&p) {
                    touched.push(p);
                }
                if let (Some(model), SlotState::Occupied(_), false) = (
                    self.noise.memory,
                    self.positions[p].state,
                    matches!(instr, Instruction::Init(_)),
                ) {
                    substrate.apply_noise(self.slot(p), model);
                }
            }

            match instr {
                Instruction::Init(p) => {
                    duration += substrate.init_qubit(self.slot(*p)).duration;
                    self.positions[*p].state = SlotState::Occupied(qubits.allocate());
                }
                Instruction::Gate(gate, ps) => {
                    let slots: Vec<SlotRef> = ps.iter().map(|p| self.slot(*p)).collect();
                    duration += substrate.apply_gate(*gate, &slots).duration;
                    if *gate == Gate::Swap {
                        let (a, b) = (ps[0], ps[1]);
                        let tmp = self.positions[a].state;
                        self.positions[a].state = self.positions[b].state;
                        self.positions[b].state = tmp;
                    }
                }
                Instruction::Measure(p) => {
                    if let Some(model) = self.noise.measurement {
                        if *p == self.noise.measured_position {
                            substrate.apply_noise(self.slot(*p), model);
                        }
                    }
                    let (completion, measured) = substrate.measure(&[self.slot(*p)]);
                    duration += completion.duration;
                    bits.extend(measured);
                }
            }
        }

        for &p in &touched {
            self.positions[p].busy = Some(op);
        }
        self.in_flight.insert(op, touched);
        trace!(node = %self.node, %op, program = program.name(), duration, "program started");

        Ok(Execution { op, duration, bits })
    }

    /// Release the positions held by `op`. Returns `false` if `op` was
    /// not in flight.
    pub fn complete(&mut self, op: OperationId) -> bool {
        let Some(touched) = self.in_flight.remove(&op) else {
            return false;
        };
        for p in touched {
            if self.positions[p].busy == Some(op) {
                self.positions[p].busy = None;
            }
        }
        true
    }

    /// Store an arriving qubit. Returns the qubit it replaced.
    pub fn place(&mut self, position: usize, qubit: QubitId) -> HeraldResult<Option<QubitId>> {
        let pos = self.idle_position(position)?;
        let old = std::mem::replace(&mut pos.state, SlotState::Occupied(qubit));
        Ok(match old {
            SlotState::Occupied(q) => Some(q),
            SlotState::Empty => None,
        })
    }

    /// Remove and return the qubit at `position`.
    pub fn pop(&mut self, position: usize) -> HeraldResult<QubitId> {
        let node = self.node;
        let pos = self.idle_position(position)?;
        match std::mem::replace(&mut pos.state, SlotState::Empty) {
            SlotState::Occupied(q) => Ok(q),
            SlotState::Empty => Err(HeraldError::EmptySlot { node, position }),
        }
    }

    fn validate(&self, program: &Program) -> HeraldResult<()> {
        let mut occupied: Vec<bool> = self
            .positions
            .iter()
            .map(|p| matches!(p.state, SlotState::Occupied(_)))
            .collect();

        for instr in program.instructions() {
            for &p in instr.positions() {
                let pos = self.position(p)?;
                if let Some(op) = pos.busy {
                    return Err(HeraldError::SlotBusy {
                        node: self.node,
                        position: p,
                        op,
                    });
                }
            }
            match instr {
                Instruction::Init(p) => occupied[*p] = true,
                Instruction::Gate(Gate::Swap, ps) => {
                    let (a, b) = self.pair(ps)?;
                    if !occupied[a] && !occupied[b] {
                        return Err(HeraldError::EmptySlot {
                            node: self.node,
                            position: a,
                        });
                    }
                    occupied.swap(a, b);
                }
                Instruction::Gate(gate, ps) => {
                    if ps.len() != gate.arity() {
                        return Err(HeraldError::InvalidConfig(format!(
                            "{:?} acts on {} positions, got {}",
                            gate,
                            gate.arity(),
                            ps.len()
                        )));
                    }
                    if let Some(&p) = ps.iter().find(|p| !occupied[**p]) {
                        return Err(HeraldError::EmptySlot {
                            node: self.node,
                            position: p,
                        });
                    }
                }
                Instruction::Measure(p) => {
                    if !occupied[*p] {
                        return Err(HeraldError::EmptySlot {
                            node: self.node,
                            position: *p,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    fn pair(&self, ps: &[usize]) -> HeraldResult<(usize, usize)> {
        match ps {
            [a, b] if a != b => Ok((*a, *b)),
            _ => Err(HeraldError::InvalidConfig(format!(
                "two-position gate needs two distinct positions, got {:?}",
                ps
            ))),
        }
    }

    fn position(&self, position: usize) -> HeraldResult<&Position> {
        self.positions
            .get(position)
            .ok_or(HeraldError::SlotOutOfRange {
                node: self.node,
                position,
                size: self.positions.len(),
            })
    }

    fn idle_position(&mut self, position: usize) -> HeraldResult<&mut Position> {
        let node = self.node;
        let size = self.positions.len();
        let pos = self
            .positions
            .get_mut(position)
            .ok_or(HeraldError::SlotOutOfRange {
                node,
                position,
                size,
            })?;
        if let Some(op) = pos.busy {
            return Err(HeraldError::SlotBusy { node, position, op });
        }
        Ok(pos)
    }

    fn slot(&self, position: usize) -> SlotRef {
        SlotRef {
            node: self.node,
            position,
        }
    }
}
