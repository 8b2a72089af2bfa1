//! Structured error types for Herald.
//!
//! All fallible public APIs return `Result<T, HeraldError>`. Variants are
//! grouped by how a run should react to them:
//!
//! - **configuration** errors are raised at construction time, before the
//!   first event is dispatched;
//! - **topology** errors come out of `TopologyBuilder::build`;
//! - **precondition** violations mean a protocol implementation issued an
//!   instruction it was not allowed to issue. They abort the run.
//!
//! An unpaired photon at the midpoint is *not* an error: it is reported as
//! a `TIMEOUT` herald and absorbed by the link-layer retry loop.

use thiserror::Error;

use crate::memory::OperationId;
use crate::protocol::ProtocolId;
use crate::topology::{Direction, NodeId, PortId};

/// The top-level error type for the Herald simulation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HeraldError {
    // ── Configuration errors ──────────────────────────────

    /// A channel delay was negative, NaN or infinite.
    #[error("invalid delay {value_ns} ns: delays must be finite and non-negative")]
    InvalidDelay { value_ns: f64 },

    /// A detector timing parameter was negative, NaN or infinite.
    #[error("invalid {field} of {value_ns} ns: must be finite and non-negative")]
    InvalidWindow { field: &'static str, value_ns: f64 },

    /// An attempt period was zero, negative, NaN or infinite.
    #[error("invalid attempt period {value_ns} ns: must be finite and positive")]
    InvalidPeriod { value_ns: f64 },

    /// A source frequency was zero, negative, NaN or infinite.
    #[error("invalid source frequency {value_hz} Hz: must be finite and positive")]
    InvalidFrequency { value_hz: f64 },

    /// Any other rejected configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Attempted to schedule an event in the past.
    #[error("cannot schedule event at T={requested} when current time is T={current}")]
    NonCausalEvent { requested: u64, current: u64 },

    // ── Topology errors ───────────────────────────────────

    /// A port ID was referenced but does not exist.
    #[error("port {0} does not exist")]
    UnknownPort(PortId),

    /// A node ID was referenced but does not exist.
    #[error("node {0} does not exist")]
    UnknownNode(NodeId),

    /// A port already has a channel bound in this direction.
    #[error("port {port} already has an {direction} channel")]
    PortAlreadyBound { port: PortId, direction: Direction },

    /// A declared port was never bound to a channel.
    #[error("port {port} ({name}) is not bound to any channel")]
    DanglingPort { port: PortId, name: String },

    /// Two ports with the same name on one component.
    #[error("component already has a port named {name:?}")]
    DuplicatePortName { name: String },

    // ── Precondition violations ───────────────────────────

    /// An instruction addressed a memory position holding no qubit.
    #[error("memory position {position} on {node} is empty")]
    EmptySlot { node: NodeId, position: usize },

    /// An instruction addressed a memory position with an operation in flight.
    #[error("memory position {position} on {node} is busy with {op}")]
    SlotBusy {
        node: NodeId,
        position: usize,
        op: OperationId,
    },

    /// A memory position index exceeded the memory size.
    #[error("memory position {position} out of range for {node} ({size} positions)")]
    SlotOutOfRange {
        node: NodeId,
        position: usize,
        size: usize,
    },

    /// A protocol tried to suspend while it already had a pending wait.
    #[error("protocol {0} is already suspended on a wait")]
    AlreadyWaiting(ProtocolId),

    /// A wait was registered with no conditions.
    #[error("protocol {0} registered an empty wait set")]
    EmptyWaitSet(ProtocolId),

    /// A protocol ID was referenced but is not registered.
    #[error("protocol {0} is not registered")]
    UnknownProtocol(ProtocolId),

    /// A protocol downcast to a concrete type failed.
    #[error("protocol {id} is not a {expected}")]
    ProtocolTypeMismatch {
        id: ProtocolId,
        expected: &'static str,
    },

    /// A protocol without a node binding tried to touch quantum memory.
    #[error("protocol {0} is not bound to a node")]
    NoNodeBinding(ProtocolId),

    // ── I/O errors ────────────────────────────────────────

    /// A configuration file could not be read.
    #[error("I/O error: {0}")]
    Io(String),

    /// A configuration file could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),
}

impl From<std::io::Error> for HeraldError {
    fn from(err: std::io::Error) -> Self {
        HeraldError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for HeraldError {
    fn from(err: serde_json::Error) -> Self {
        HeraldError::Parse(err.to_string())
    }
}

/// Convenience alias for `Result<T, HeraldError>`.
pub type HeraldResult<T> = Result<T, HeraldError>;
