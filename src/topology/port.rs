//! Ports: named directed endpoints with a single-slot input buffer.

use crate::message::Message;

use super::id::{ChannelId, DetectorId, NodeId, PortId, SourceId};

/// Channel direction relative to a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Direction {
    Outgoing,
    Incoming,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Outgoing => write!(f, "outgoing"),
            Direction::Incoming => write!(f, "incoming"),
        }
    }
}

/// The component a port belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortOwner {
    Node(NodeId),
    /// Detector input `index` (0 = side A, 1 = side B).
    Detector { detector: DetectorId, index: usize },
    /// Source output `index`.
    Source { source: SourceId, index: usize },
}

#[derive(Debug, Clone)]
pub struct Port {
    pub id: PortId,
    pub name: String,
    pub owner: PortOwner,
    pub(crate) outgoing: Option<ChannelId>,
    pub(crate) incoming: Option<ChannelId>,
    /// Memory position that qubits arriving here are placed into.
    pub(crate) forward_to: Option<usize>,
    buffer: Option<Message>,
}

impl Port {
    pub(crate) fn new(id: PortId, name: impl Into<String>, owner: PortOwner) -> Self {
        Port {
            id,
            name: name.into(),
            owner,
            outgoing: None,
            incoming: None,
            forward_to: None,
            buffer: None,
        }
    }

    pub fn outgoing(&self) -> Option<ChannelId> {
        self.outgoing
    }

    pub fn incoming(&self) -> Option<ChannelId> {
        self.incoming
    }

    pub fn forward_to(&self) -> Option<usize> {
        self.forward_to
    }

    /// The buffered input message, if any.
    pub fn peek(&self) -> Option<&Message> {
        self.buffer.as_ref()
    }

    pub fn has_input(&self) -> bool {
        self.buffer.is_some()
    }

    /// Buffer a delivered message. Returns the message it replaced.
    pub(crate) fn put(&mut self, message: Message) -> Option<Message> {
        self.buffer.replace(message)
    }

    pub(crate) fn take(&mut self) -> Option<Message> {
        self.buffer.take()
    }
}
