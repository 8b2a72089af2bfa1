//! Entanglement generation: turns heralded physical attempts into stored
//! entangled qubits, one storage slot at a time.
//!
//! ```text
//!   IDLE ──start──▶ ATTEMPTING ──accepted herald──▶ DONE ──swap done──▶ IDLE
//!                    ▲       │
//!                    └─fail──┘   (timeout, no reply, rejected outcome)
//! ```
//!
//! Failures are retried indefinitely without backoff: every failure
//! simply issues another `REQUEST` and the physical layer attempts again
//! on its next tick.

use std::any::Any;
use std::collections::BTreeSet;

use tracing::{debug, info};

use crate::error::{HeraldError, HeraldResult};
use crate::memory::{OperationId, Program};
use crate::message::HeraldOutcome;
use crate::protocol::{Protocol, ProtocolId};
use crate::runtime::ProtocolContext;
use crate::signal::{SignalLabel, SignalResult};
use crate::substrate::OutcomeCode;
use crate::time::VirtualTime;
use crate::wait::{Condition, WaitSet, Wake};

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConfig {
    /// The physical layer this protocol drives.
    pub physical: ProtocolId,
    /// Memory positions that receive entangled qubits, used round-robin.
    pub storage: Vec<usize>,
    /// Position the physical layer emits from.
    pub emit_position: usize,
    /// Outcome codes counted as a successful herald.
    pub accepted: BTreeSet<OutcomeCode>,
    /// Stop after this many pairs. `None` runs forever.
    pub max_pairs: Option<usize>,
}

impl GenerationConfig {
    /// Accept double clicks only, storing into `storage`.
    pub fn new(physical: ProtocolId, emit_position: usize, storage: Vec<usize>) -> Self {
        GenerationConfig {
            physical,
            storage,
            emit_position,
            accepted: BTreeSet::from([OutcomeCode::DOUBLE_CLICK]),
            max_pairs: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationState {
    Idle,
    Attempting { slot: usize },
    /// Moving the heralded qubit into `slot`.
    Done { slot: usize, op: OperationId },
}

#[derive(Debug)]
pub struct EntanglementGeneration {
    name: String,
    config: GenerationConfig,
    state: GenerationState,
    next_slot: usize,
    failures: u64,
    successes: Vec<(usize, VirtualTime)>,
}

impl EntanglementGeneration {
    pub fn new(name: &str, config: GenerationConfig) -> HeraldResult<Self> {
        if config.storage.is_empty() {
            return Err(HeraldError::InvalidConfig(format!("{}: no storage positions", name)));
        }
        if config.storage.contains(&config.emit_position) {
            return Err(HeraldError::InvalidConfig(format!(
                "{}: emit position {} doubles as storage",
                name, config.emit_position
            )));
        }
        Ok(EntanglementGeneration {
            name: name.to_string(),
            config,
            state: GenerationState::Idle,
            next_slot: 0,
            failures: 0,
            successes: Vec::new(),
        })
    }

    pub fn state(&self) -> GenerationState {
        self.state
    }

    /// `(slot, time)` of every pair produced since the last reset.
    pub fn successes(&self) -> &[(usize, VirtualTime)] {
        &self.successes
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    fn finished(&self) -> bool {
        self.config.max_pairs.is_some_and(|max| self.successes.len() >= max)
    }

    fn begin_attempt(&mut self, ctx: &mut ProtocolContext) -> HeraldResult<()> {
        let slot = self.config.storage[self.next_slot % self.config.storage.len()];
        self.state = GenerationState::Attempting { slot };
        ctx.emit_signal(SignalLabel::Request, SignalResult::AttemptRequest { slot })?;
        let physical = self.config.physical;
        ctx.wait_any(WaitSet::any([
            Condition::Signal {
                owner: physical,
                label: SignalLabel::Success,
            },
            Condition::Signal {
                owner: physical,
                label: SignalLabel::Fail,
            },
        ]))
    }

    fn accepts(&self, result: &SignalResult) -> Option<OutcomeCode> {
        match result {
            SignalResult::Herald {
                outcome: HeraldOutcome::Code(code),
                ..
            } if self.config.accepted.contains(code) => Some(*code),
            _ => None,
        }
    }
}

impl Protocol for EntanglementGeneration {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self, ctx: &mut ProtocolContext) -> HeraldResult<()> {
        ctx.start(self.config.physical)?;
        if self.finished() {
            return Ok(());
        }
        self.begin_attempt(ctx)
    }

    fn resume(&mut self, ctx: &mut ProtocolContext, wake: Wake) -> HeraldResult<()> {
        match self.state {
            GenerationState::Idle => Ok(()),
            GenerationState::Attempting { slot } => {
                let emission = wake
                    .signal()
                    .ok_or_else(|| HeraldError::InvalidConfig(format!("{}: woken without a signal", self.name)))?;
                let code = match emission.label {
                    SignalLabel::Success => self.accepts(&emission.result),
                    _ => None,
                };
                match code {
                    Some(code) => {
                        debug!(protocol = %ctx.id(), slot, outcome = code.raw(), "herald accepted");
                        let op = ctx.execute(&Program::swap(self.config.emit_position, slot))?;
                        self.state = GenerationState::Done { slot, op };
                        ctx.wait_any(WaitSet::any([Condition::Operation(op)]))
                    }
                    None => {
                        self.failures += 1;
                        debug!(protocol = %ctx.id(), slot, failures = self.failures, "attempt failed, retrying");
                        self.begin_attempt(ctx)
                    }
                }
            }
            GenerationState::Done { slot, .. } => {
                let at = ctx.now();
                self.successes.push((slot, at));
                self.next_slot += 1;
                info!(protocol = %ctx.id(), slot, %at, pairs = self.successes.len(), "entangled pair stored");
                ctx.emit_signal(SignalLabel::Success, SignalResult::Entangled { slot, at })?;
                self.state = GenerationState::Idle;
                if self.finished() {
                    ctx.stop(self.config.physical);
                    return Ok(());
                }
                self.begin_attempt(ctx)
            }
        }
    }

    fn reset(&mut self) {
        self.state = GenerationState::Idle;
        self.next_slot = 0;
        self.failures = 0;
        self.successes.clear();
    }

    fn children(&self) -> Vec<ProtocolId> {
        vec![self.config.physical]
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        let phys = ProtocolId::new(0);
        assert!(EntanglementGeneration::new("egp", GenerationConfig::new(phys, 0, vec![])).is_err());
        assert!(EntanglementGeneration::new("egp", GenerationConfig::new(phys, 1, vec![1, 2])).is_err());
        let egp = EntanglementGeneration::new("egp", GenerationConfig::new(phys, 0, vec![1, 2])).unwrap();
        assert_eq!(egp.state(), GenerationState::Idle);
        assert_eq!(egp.children(), vec![phys]);
    }

    #[test]
    fn test_only_accepted_codes_count() {
        let egp = EntanglementGeneration::new("egp", GenerationConfig::new(ProtocolId::new(0), 0, vec![1])).unwrap();
        let herald = |outcome| SignalResult::Herald {
            outcome,
            at: VirtualTime::new(1),
        };
        assert_eq!(
            egp.accepts(&herald(HeraldOutcome::Code(OutcomeCode::DOUBLE_CLICK))),
            Some(OutcomeCode::DOUBLE_CLICK)
        );
        assert_eq!(egp.accepts(&herald(HeraldOutcome::Code(OutcomeCode::CLICK_A))), None);
        assert_eq!(egp.accepts(&herald(HeraldOutcome::Timeout)), None);
        assert_eq!(egp.accepts(&SignalResult::NoReply { at: VirtualTime::new(1) }), None);
    }
}
