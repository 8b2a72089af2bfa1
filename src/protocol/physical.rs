//! Physical layer of the link: one photon emission per attempt, then wait
//! for the midpoint's heralding reply.
//!
//! Attempts are aligned to the protocol's own period grid (multiples of
//! `period_ns` in absolute time). Two endpoints with different periods are
//! not synchronised; their photons only meet inside the detector window
//! when the grids happen to line up.

use std::any::Any;

use tracing::{debug, trace, warn};

use crate::error::{HeraldError, HeraldResult};
use crate::memory::{OperationId, Program};
use crate::message::Message;
use crate::protocol::{Protocol, ProtocolId};
use crate::runtime::ProtocolContext;
use crate::signal::{SignalLabel, SignalResult};
use crate::time::VirtualTime;
use crate::topology::PortId;
use crate::wait::{Condition, TimerId, WaitSet, Wake};

#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalConfig {
    /// Port wired into the heralded link.
    pub port: PortId,
    /// Memory position holding the qubit entangled with each photon.
    pub emit_position: usize,
    pub period_ns: u64,
    /// How long to wait for a reply after emitting.
    pub reply_timeout_ns: u64,
    /// Protocol whose `REQUEST` signals trigger attempts. `None` means
    /// attempt on every tick.
    pub upstream: Option<ProtocolId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    /// Waiting for the tick timer.
    Armed { tick: VirtualTime },
    Emitting { op: OperationId },
    AwaitingReply { deadline: VirtualTime },
}

/// Midpoint heralding attempt loop.
#[derive(Debug)]
pub struct MidpointHeralding {
    name: String,
    config: PhysicalConfig,
    phase: Phase,
    attempts: u64,
}

impl MidpointHeralding {
    pub fn new(name: &str, config: PhysicalConfig) -> HeraldResult<Self> {
        if config.period_ns == 0 {
            return Err(HeraldError::InvalidPeriod { value_ns: 0.0 });
        }
        Ok(MidpointHeralding {
            name: name.to_string(),
            config,
            phase: Phase::Idle,
            attempts: 0,
        })
    }

    pub fn config(&self) -> &PhysicalConfig {
        &self.config
    }

    /// Attempt only when `upstream` asks for one.
    pub fn set_upstream(&mut self, upstream: Option<ProtocolId>) {
        self.config.upstream = upstream;
    }

    /// Photons emitted since the last reset.
    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    fn idle(&mut self, ctx: &mut ProtocolContext) -> HeraldResult<()> {
        match self.config.upstream {
            Some(upstream) => {
                self.phase = Phase::Idle;
                ctx.await_signal(upstream, SignalLabel::Request)
            }
            None => self.arm(ctx),
        }
    }

    fn arm(&mut self, ctx: &mut ProtocolContext) -> HeraldResult<()> {
        let period = self.config.period_ns;
        let tick = ctx
            .now()
            .next_multiple_of(period)
            .ok_or(HeraldError::InvalidPeriod { value_ns: period as f64 })?;
        let timer = ctx.timer_at(tick)?;
        self.phase = Phase::Armed { tick };
        ctx.wait_any(WaitSet::any([Condition::Timer(timer)]))
    }

    fn await_reply(&mut self, ctx: &mut ProtocolContext, deadline: VirtualTime) -> HeraldResult<()> {
        let timer: TimerId = ctx.timer_at(deadline)?;
        self.phase = Phase::AwaitingReply { deadline };
        ctx.wait_any(WaitSet::any([Condition::PortInput(self.config.port), Condition::Timer(timer)]))
    }

    fn report(&mut self, ctx: &mut ProtocolContext, label: SignalLabel, result: SignalResult) -> HeraldResult<()> {
        ctx.emit_signal(label, result)?;
        self.idle(ctx)
    }
}

impl Protocol for MidpointHeralding {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self, ctx: &mut ProtocolContext) -> HeraldResult<()> {
        debug!(protocol = %ctx.id(), period = self.config.period_ns, "physical layer started");
        self.idle(ctx)
    }

    fn resume(&mut self, ctx: &mut ProtocolContext, wake: Wake) -> HeraldResult<()> {
        match self.phase {
            Phase::Idle => self.arm(ctx),
            Phase::Armed { tick } => {
                trace!(protocol = %ctx.id(), %tick, "attempt tick");
                let op = ctx.execute(&Program::new("emit").init(self.config.emit_position))?;
                self.phase = Phase::Emitting { op };
                ctx.wait_any(WaitSet::any([Condition::Operation(op)]))
            }
            Phase::Emitting { op } => {
                match ctx.discard_input(self.config.port)? {
                    Some(Message::Herald(h)) => warn!(
                        protocol = %ctx.id(),
                        outcome = %h.outcome_code,
                        "herald arrived after its reply deadline and was dropped"
                    ),
                    Some(other) => warn!(protocol = %ctx.id(), message = %other, "stale input dropped"),
                    None => {}
                }
                let qubit = ctx.emit_photon(self.config.port, self.config.emit_position)?;
                self.attempts += 1;
                debug!(protocol = %ctx.id(), %op, %qubit, attempt = self.attempts, now = %ctx.now(), "photon emitted");
                let deadline = ctx
                    .now()
                    .plus(self.config.reply_timeout_ns)
                    .ok_or(HeraldError::InvalidConfig("reply deadline overflows".into()))?;
                self.await_reply(ctx, deadline)
            }
            Phase::AwaitingReply { deadline } => {
                if wake.is_timer() {
                    debug!(protocol = %ctx.id(), now = %ctx.now(), "no reply before deadline");
                    return self.report(ctx, SignalLabel::Fail, SignalResult::NoReply { at: wake.at });
                }
                let herald = match wake.message() {
                    Some(Message::Herald(h)) if h.sender_port_id == self.config.port => *h,
                    other => {
                        warn!(protocol = %ctx.id(), message = ?other, "unexpected input while awaiting reply");
                        return self.await_reply(ctx, deadline);
                    }
                };
                let result = SignalResult::Herald {
                    outcome: herald.outcome_code,
                    at: wake.at,
                };
                match herald.code() {
                    Some(code) => {
                        debug!(protocol = %ctx.id(), outcome = code.raw(), "herald received");
                        self.report(ctx, SignalLabel::Success, result)
                    }
                    None => {
                        debug!(protocol = %ctx.id(), "herald timeout");
                        self.report(ctx, SignalLabel::Fail, result)
                    }
                }
            }
        }
    }

    fn reset(&mut self) {
        self.phase = Phase::Idle;
        self.attempts = 0;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
