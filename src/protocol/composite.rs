//! Groups protocols under one handle.

use std::any::Any;

use tracing::info;

use crate::error::HeraldResult;
use crate::protocol::{Protocol, ProtocolId};
use crate::runtime::ProtocolContext;
use crate::signal::{SignalLabel, SignalResult};
use crate::wait::{Condition, WaitSet, Wake};

/// Starts its children together and emits `SUCCESS` each time every
/// child has succeeded at least once since the previous composite success.
/// Stopping the composite stops the children.
#[derive(Debug)]
pub struct CompositeProtocol {
    name: String,
    children: Vec<ProtocolId>,
    pending: Vec<ProtocolId>,
    round: u64,
}

impl CompositeProtocol {
    pub fn new(name: &str, children: Vec<ProtocolId>) -> Self {
        CompositeProtocol {
            name: name.to_string(),
            pending: children.clone(),
            children,
            round: 0,
        }
    }

    /// Completed rounds since the last reset.
    pub fn round(&self) -> u64 {
        self.round
    }

    fn wait_children(&mut self, ctx: &mut ProtocolContext) -> HeraldResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        ctx.wait_any(WaitSet::any(self.pending.iter().map(|&owner| Condition::Signal {
            owner,
            label: SignalLabel::Success,
        })))
    }
}

impl Protocol for CompositeProtocol {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self, ctx: &mut ProtocolContext) -> HeraldResult<()> {
        for &child in &self.children {
            ctx.start(child)?;
        }
        self.pending = self.children.clone();
        self.wait_children(ctx)
    }

    fn resume(&mut self, ctx: &mut ProtocolContext, wake: Wake) -> HeraldResult<()> {
        if let Some(emission) = wake.signal() {
            self.pending.retain(|&c| c != emission.owner);
        }
        if self.pending.is_empty() {
            self.round += 1;
            info!(protocol = %ctx.id(), name = %self.name, round = self.round, "all children succeeded");
            ctx.emit_signal(SignalLabel::Success, SignalResult::Composite { round: self.round })?;
            self.pending = self.children.clone();
        }
        self.wait_children(ctx)
    }

    fn reset(&mut self) {
        self.pending = self.children.clone();
        self.round = 0;
    }

    fn children(&self) -> Vec<ProtocolId> {
        self.children.clone()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
