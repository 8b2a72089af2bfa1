//! Protocols: cooperative state machines driven by the runtime.
//!
//! A protocol never blocks. `start` and `resume` run to completion and
//! end by registering the next wait through
//! [`ProtocolContext::wait_any`](crate::runtime::ProtocolContext::wait_any).
//! The runtime calls `resume` with the resolved [`Wake`] once one branch
//! of that wait holds.
//!
//! | Protocol                     | Layer       | Runs on     |
//! |------------------------------|-------------|-------------|
//! | [`MidpointHeralding`]        | physical    | link node   |
//! | [`EntanglementGeneration`]   | link        | link node   |
//! | [`BellMeasurement`]          | application | sender      |
//! | [`Correction`]               | application | receiver    |
//! | [`CompositeProtocol`]        | composer    | (none)      |

pub mod composite;
pub mod generation;
pub mod physical;
pub mod teleport;

#[cfg(test)]
mod tests;

pub use composite::CompositeProtocol;
pub use generation::{EntanglementGeneration, GenerationConfig, GenerationState};
pub use physical::{MidpointHeralding, PhysicalConfig};
pub use teleport::{BellMeasurement, Correction};

use std::any::Any;

use serde::Serialize;

use crate::error::HeraldResult;
use crate::runtime::ProtocolContext;
use crate::wait::Wake;

/// Handle to a registered protocol instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ProtocolId(u64);

impl ProtocolId {
    pub const fn new(raw: u64) -> Self {
        ProtocolId(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "proto#{}", self.0)
    }
}

pub trait Protocol: Any {
    fn name(&self) -> &str;

    /// Called once per start. Must end with a wait or leave the
    /// protocol idle.
    fn start(&mut self, ctx: &mut ProtocolContext) -> HeraldResult<()>;

    /// Called when the registered wait resolves.
    fn resume(&mut self, ctx: &mut ProtocolContext, wake: Wake) -> HeraldResult<()>;

    /// Return to the initial state. Called when the protocol is stopped.
    fn reset(&mut self);

    /// Protocols stopped along with this one.
    fn children(&self) -> Vec<ProtocolId> {
        Vec::new()
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}
