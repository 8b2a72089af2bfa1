//! Teleportation: Bell measurement on the sending node, ordered
//! corrections on the receiving node.
//!
//! Both sides rendezvous on two independent conditions before acting.
//! The receiver applies Z (iff `m1 == 1`) and only after it completes
//! applies X (iff `m2 == 1`); both target the same memory position, so the
//! second gate is never issued while the first is in flight.

use std::any::Any;

use tracing::{debug, trace, warn};

use crate::error::{HeraldError, HeraldResult};
use crate::memory::{OperationId, Program};
use crate::message::Message;
use crate::protocol::Protocol;
use crate::runtime::ProtocolContext;
use crate::signal::{SignalLabel, SignalResult};
use crate::substrate::Gate;
use crate::time::VirtualTime;
use crate::topology::PortId;
use crate::wait::{Condition, WaitSet, Wake, WakePayload};

/// Memory position of the state to teleport.
pub const LOCAL_POSITION: usize = 0;
/// Memory position the sender's half of the pair is forwarded to.
pub const SENDER_PAIR_POSITION: usize = 1;
/// Memory position the receiver's half of the pair is forwarded to.
pub const RECEIVER_PAIR_POSITION: usize = 0;

/// Gates to apply for bits `(m1, m2)`, in issue order.
pub fn corrections_for(m1: u8, m2: u8) -> Vec<Gate> {
    let mut gates = Vec::with_capacity(2);
    if m1 == 1 {
        gates.push(Gate::Z);
    }
    if m2 == 1 {
        gates.push(Gate::X);
    }
    gates
}

fn bit(bits: &[u8], index: usize, name: &str) -> HeraldResult<u8> {
    bits.get(index)
        .copied()
        .ok_or_else(|| HeraldError::InvalidConfig(format!("{}: measurement returned {} bits", name, bits.len())))
}

// ── Sender ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SenderPhase {
    Collecting { init: OperationId },
    Measuring { op: OperationId },
}

/// Sending side: prepares a local state, waits for its half of a pair and
/// sends the Bell-measurement bits to the receiver.
#[derive(Debug)]
pub struct BellMeasurement {
    name: String,
    qubit_input: PortId,
    classical_output: PortId,
    phase: Option<SenderPhase>,
    local_ready: bool,
    entangled: bool,
    rounds: u64,
}

impl BellMeasurement {
    pub fn new(name: &str, qubit_input: PortId, classical_output: PortId) -> Self {
        BellMeasurement {
            name: name.to_string(),
            qubit_input,
            classical_output,
            phase: None,
            local_ready: false,
            entangled: false,
            rounds: 0,
        }
    }

    pub fn rounds(&self) -> u64 {
        self.rounds
    }

    fn prepare(&mut self, ctx: &mut ProtocolContext) -> HeraldResult<()> {
        self.local_ready = false;
        let init = ctx.execute(&Program::init_state(LOCAL_POSITION))?;
        self.phase = Some(SenderPhase::Collecting { init });
        self.collect(ctx, init)
    }

    fn collect(&mut self, ctx: &mut ProtocolContext, init: OperationId) -> HeraldResult<()> {
        let mut set = WaitSet::new();
        if !self.local_ready {
            set = set.or(Condition::Operation(init));
        }
        if !self.entangled {
            set = set.or(Condition::PortInput(self.qubit_input));
        }
        ctx.wait_any(set)
    }
}

impl Protocol for BellMeasurement {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self, ctx: &mut ProtocolContext) -> HeraldResult<()> {
        self.entangled = false;
        self.prepare(ctx)
    }

    fn resume(&mut self, ctx: &mut ProtocolContext, wake: Wake) -> HeraldResult<()> {
        match self.phase {
            Some(SenderPhase::Collecting { init }) => {
                for payload in &wake.payloads {
                    match payload {
                        WakePayload::Operation { .. } => self.local_ready = true,
                        WakePayload::Message(Message::Qubit(photon)) => {
                            debug!(protocol = %ctx.id(), qubit = %photon.qubit, "pair half received");
                            self.entangled = true;
                        }
                        other => warn!(protocol = %ctx.id(), ?other, "ignored while collecting"),
                    }
                }
                if !(self.local_ready && self.entangled) {
                    return self.collect(ctx, init);
                }
                // The memory already holds the newest arrival.
                ctx.discard_input(self.qubit_input)?;
                let op = ctx.execute(&Program::bell_measurement(LOCAL_POSITION, SENDER_PAIR_POSITION))?;
                self.phase = Some(SenderPhase::Measuring { op });
                ctx.wait_any(WaitSet::any([Condition::Operation(op)]))
            }
            Some(SenderPhase::Measuring { op }) => {
                let bits = wake.bits().unwrap_or_default();
                let (m1, m2) = (bit(bits, 0, &self.name)?, bit(bits, 1, &self.name)?);
                ctx.send(self.classical_output, Message::Corrections { m1, m2 })?;
                self.rounds += 1;
                debug!(protocol = %ctx.id(), %op, m1, m2, round = self.rounds, "bell measurement sent");
                ctx.emit_signal(SignalLabel::Success, SignalResult::BellMeasured { m1, m2 })?;
                self.entangled = false;
                self.prepare(ctx)
            }
            None => Ok(()),
        }
    }

    fn reset(&mut self) {
        self.phase = None;
        self.local_ready = false;
        self.entangled = false;
        self.rounds = 0;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ── Receiver ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum ReceiverPhase {
    Collecting,
    /// Gates still to issue, in order; `op` is the one in flight.
    Correcting { op: OperationId, remaining: Vec<Gate> },
}

/// Receiving side: waits for the correction bits and its half of the
/// pair, then applies the corrections in order.
#[derive(Debug)]
pub struct Correction {
    name: String,
    classical_input: PortId,
    qubit_input: PortId,
    phase: Option<ReceiverPhase>,
    bits: Option<(u8, u8)>,
    entangled: bool,
    issued: Vec<(Gate, VirtualTime)>,
    rounds: u64,
}

impl Correction {
    pub fn new(name: &str, classical_input: PortId, qubit_input: PortId) -> Self {
        Correction {
            name: name.to_string(),
            classical_input,
            qubit_input,
            phase: None,
            bits: None,
            entangled: false,
            issued: Vec::new(),
            rounds: 0,
        }
    }

    /// Every correction gate issued since the last reset, with issue time.
    pub fn issued(&self) -> &[(Gate, VirtualTime)] {
        &self.issued
    }

    pub fn rounds(&self) -> u64 {
        self.rounds
    }

    fn collect(&mut self, ctx: &mut ProtocolContext) -> HeraldResult<()> {
        self.phase = Some(ReceiverPhase::Collecting);
        let mut set = WaitSet::new();
        if self.bits.is_none() {
            set = set.or(Condition::PortInput(self.classical_input));
        }
        if !self.entangled {
            set = set.or(Condition::PortInput(self.qubit_input));
        }
        ctx.wait_any(set)
    }

    /// Issue the next gate in `remaining`, or finish the round.
    fn advance(&mut self, ctx: &mut ProtocolContext, mut remaining: Vec<Gate>) -> HeraldResult<()> {
        if remaining.is_empty() {
            self.rounds += 1;
            debug!(protocol = %ctx.id(), round = self.rounds, "corrections complete");
            ctx.emit_signal(
                SignalLabel::Success,
                SignalResult::Corrected {
                    slot: RECEIVER_PAIR_POSITION,
                },
            )?;
            self.bits = None;
            self.entangled = false;
            return self.collect(ctx);
        }
        let gate = remaining.remove(0);
        let op = ctx.execute(&Program::correction(gate, RECEIVER_PAIR_POSITION))?;
        self.issued.push((gate, ctx.now()));
        debug!(protocol = %ctx.id(), ?gate, %op, "correction issued");
        self.phase = Some(ReceiverPhase::Correcting { op, remaining });
        ctx.wait_any(WaitSet::any([Condition::Operation(op)]))
    }
}

impl Protocol for Correction {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self, ctx: &mut ProtocolContext) -> HeraldResult<()> {
        self.bits = None;
        self.entangled = false;
        self.collect(ctx)
    }

    fn resume(&mut self, ctx: &mut ProtocolContext, wake: Wake) -> HeraldResult<()> {
        match self.phase.take() {
            Some(ReceiverPhase::Collecting) => {
                match wake.message() {
                    Some(Message::Corrections { m1, m2 }) => self.bits = Some((*m1, *m2)),
                    Some(Message::Qubit(_)) => self.entangled = true,
                    other => warn!(protocol = %ctx.id(), message = ?other, "ignored while collecting"),
                }
                match self.bits {
                    Some((m1, m2)) if self.entangled => {
                        ctx.discard_input(self.qubit_input)?;
                        self.advance(ctx, corrections_for(m1, m2))
                    }
                    _ => self.collect(ctx),
                }
            }
            Some(ReceiverPhase::Correcting { op, remaining }) => {
                trace!(protocol = %ctx.id(), %op, "correction complete");
                self.advance(ctx, remaining)
            }
            None => Ok(()),
        }
    }

    fn reset(&mut self) {
        self.phase = None;
        self.bits = None;
        self.entangled = false;
        self.issued.clear();
        self.rounds = 0;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
