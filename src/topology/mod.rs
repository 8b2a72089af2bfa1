//! Network topology: nodes, ports, channels, detectors and sources.
//!
//! The graph is assembled once with [`TopologyBuilder`] and validated by
//! [`TopologyBuilder::build`]: every port must be bound to a channel, no
//! port may have two channels in the same direction, and memory
//! forwarding targets must exist. After that the wiring is fixed for the
//! run; only port buffers, memories and detector phases change.

pub mod channel;
pub mod id;
pub mod port;

pub use channel::{Channel, ChannelKind, Delay, FIBRE_SPEED_KM_PER_S};
pub use id::{ChannelId, DetectorId, NodeId, PortId, SourceId};
pub use port::{Direction, Port, PortOwner};

use crate::detector::{Detector, TimingWindow};
use crate::error::{HeraldError, HeraldResult};
use crate::memory::{NoiseSettings, QuantumMemory};
use crate::source::EntanglingSource;

// ── Node ──────────────────────────────────────────────────────────────

/// A network endpoint.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub ports: Vec<PortId>,
    pub memory: QuantumMemory,
}

// ── Topology ──────────────────────────────────────────────────────────

/// A validated network graph.
#[derive(Debug, Clone)]
pub struct Topology {
    nodes: Vec<Node>,
    ports: Vec<Port>,
    channels: Vec<Channel>,
    detectors: Vec<Detector>,
    sources: Vec<EntanglingSource>,
}

impl Topology {
    pub fn node(&self, id: NodeId) -> HeraldResult<&Node> {
        self.nodes.get(id.index()).ok_or(HeraldError::UnknownNode(id))
    }

    pub fn node_mut(&mut self, id: NodeId) -> HeraldResult<&mut Node> {
        self.nodes.get_mut(id.index()).ok_or(HeraldError::UnknownNode(id))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn node_by_name(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn port(&self, id: PortId) -> HeraldResult<&Port> {
        self.ports.get(id.index()).ok_or(HeraldError::UnknownPort(id))
    }

    pub fn port_mut(&mut self, id: PortId) -> HeraldResult<&mut Port> {
        self.ports.get_mut(id.index()).ok_or(HeraldError::UnknownPort(id))
    }

    /// Look up a node port by name.
    pub fn find_port(&self, node: NodeId, name: &str) -> HeraldResult<PortId> {
        self.node(node)?
            .ports
            .iter()
            .copied()
            .find(|p| self.ports[p.index()].name == name)
            .ok_or_else(|| HeraldError::InvalidConfig(format!("{} has no port named {:?}", node, name)))
    }

    pub fn channel(&self, id: ChannelId) -> Option<&Channel> {
        self.channels.get(id.index())
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn detector(&self, id: DetectorId) -> Option<&Detector> {
        self.detectors.get(id.index())
    }

    pub(crate) fn detector_mut(&mut self, id: DetectorId) -> Option<&mut Detector> {
        self.detectors.get_mut(id.index())
    }

    pub fn detectors(&self) -> &[Detector] {
        &self.detectors
    }

    pub fn source(&self, id: SourceId) -> Option<&EntanglingSource> {
        self.sources.get(id.index())
    }

    pub(crate) fn source_mut(&mut self, id: SourceId) -> Option<&mut EntanglingSource> {
        self.sources.get_mut(id.index())
    }

    pub fn sources(&self) -> &[EntanglingSource] {
        &self.sources
    }

    /// The channel leaving `port`, or `DanglingPort` if none is bound.
    pub fn outgoing_channel(&self, port: PortId) -> HeraldResult<&Channel> {
        let p = self.port(port)?;
        p.outgoing
            .and_then(|c| self.channels.get(c.index()))
            .ok_or_else(|| HeraldError::DanglingPort {
                port,
                name: p.name.clone(),
            })
    }
}

// ── Builder ───────────────────────────────────────────────────────────

/// Assembles a [`Topology`].
#[derive(Debug, Default)]
pub struct TopologyBuilder {
    nodes: Vec<Node>,
    ports: Vec<Port>,
    channels: Vec<Channel>,
    detectors: Vec<Detector>,
    sources: Vec<EntanglingSource>,
}

impl TopologyBuilder {
    pub fn new() -> Self {
        TopologyBuilder::default()
    }

    /// Add a node with a quantum memory of `positions` positions.
    pub fn add_node(&mut self, name: impl Into<String>, positions: usize) -> NodeId {
        let id = NodeId::new(self.nodes.len() as u64);
        self.nodes.push(Node {
            id,
            name: name.into(),
            ports: Vec::new(),
            memory: QuantumMemory::new(id, positions),
        });
        id
    }

    /// Attach memory and measurement noise to a node.
    pub fn set_noise(&mut self, node: NodeId, noise: NoiseSettings) -> HeraldResult<()> {
        self.nodes
            .get_mut(node.index())
            .ok_or(HeraldError::UnknownNode(node))?
            .memory
            .set_noise(noise);
        Ok(())
    }

    /// Declare a named port on a node. Names are unique per node.
    pub fn add_port(&mut self, node: NodeId, name: &str) -> HeraldResult<PortId> {
        let n = self
            .nodes
            .get(node.index())
            .ok_or(HeraldError::UnknownNode(node))?;
        if n.ports.iter().any(|p| self.ports[p.index()].name == name) {
            return Err(HeraldError::DuplicatePortName {
                name: name.to_string(),
            });
        }
        let id = self.new_port(name, PortOwner::Node(node));
        self.nodes[node.index()].ports.push(id);
        Ok(id)
    }

    /// Place qubits arriving on `port` into memory `position` of its node.
    pub fn forward_to_memory(&mut self, port: PortId, position: usize) -> HeraldResult<()> {
        let p = self.ports.get(port.index()).ok_or(HeraldError::UnknownPort(port))?;
        let PortOwner::Node(node) = p.owner else {
            return Err(HeraldError::InvalidConfig(format!(
                "port {} is not a node port and cannot forward to memory",
                port
            )));
        };
        let size = self.nodes[node.index()].memory.size();
        if position >= size {
            return Err(HeraldError::SlotOutOfRange {
                node,
                position,
                size,
            });
        }
        self.ports[port.index()].forward_to = Some(position);
        Ok(())
    }

    /// Bind a one-directional channel from `from` to `to`.
    pub fn connect(
        &mut self,
        from: PortId,
        to: PortId,
        kind: ChannelKind,
        delay: Delay,
    ) -> HeraldResult<ChannelId> {
        let src = self.ports.get(from.index()).ok_or(HeraldError::UnknownPort(from))?;
        if src.outgoing.is_some() {
            return Err(HeraldError::PortAlreadyBound {
                port: from,
                direction: Direction::Outgoing,
            });
        }
        let dst = self.ports.get(to.index()).ok_or(HeraldError::UnknownPort(to))?;
        if dst.incoming.is_some() {
            return Err(HeraldError::PortAlreadyBound {
                port: to,
                direction: Direction::Incoming,
            });
        }

        let id = ChannelId::new(self.channels.len() as u64);
        self.channels.push(Channel {
            id,
            kind,
            from,
            to,
            delay,
        });
        self.ports[from.index()].outgoing = Some(id);
        self.ports[to.index()].incoming = Some(id);
        Ok(id)
    }

    /// Add a heralding detector with two input ports (side A, side B).
    pub fn add_detector(&mut self, name: &str, window: TimingWindow) -> (DetectorId, [PortId; 2]) {
        let id = DetectorId::new(self.detectors.len() as u64);
        let ports = [0, 1].map(|index| {
            self.new_port(
                &format!("{}.{}", name, if index == 0 { "qin_a" } else { "qin_b" }),
                PortOwner::Detector { detector: id, index },
            )
        });
        self.detectors.push(Detector::new(id, name, window, ports));
        (id, ports)
    }

    /// Add a pair source emitting every `period_ns` through two output ports.
    pub fn add_source(&mut self, name: &str, period_ns: u64) -> HeraldResult<(SourceId, [PortId; 2])> {
        let id = SourceId::new(self.sources.len() as u64);
        let ports = [0, 1].map(|index| {
            self.new_port(
                &format!("{}.qout{}", name, index),
                PortOwner::Source { source: id, index },
            )
        });
        self.sources.push(EntanglingSource::new(id, name, period_ns, ports)?);
        Ok((id, ports))
    }

    /// Validate and freeze the graph.
    pub fn build(self) -> HeraldResult<Topology> {
        for port in &self.ports {
            let dangling = match port.owner {
                PortOwner::Node(_) => port.outgoing.is_none() && port.incoming.is_none(),
                PortOwner::Detector { .. } => port.outgoing.is_none() || port.incoming.is_none(),
                PortOwner::Source { .. } => port.outgoing.is_none(),
            };
            if dangling {
                return Err(HeraldError::DanglingPort {
                    port: port.id,
                    name: port.name.clone(),
                });
            }
        }
        Ok(Topology {
            nodes: self.nodes,
            ports: self.ports,
            channels: self.channels,
            detectors: self.detectors,
            sources: self.sources,
        })
    }

    fn new_port(&mut self, name: &str, owner: PortOwner) -> PortId {
        let id = PortId::new(self.ports.len() as u64);
        self.ports.push(Port::new(id, name, owner));
        id
    }
}
