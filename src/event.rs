//! Event records for the simulation kernel.
//!
//! Every effect in Herald is an `Event`: a channel delivery, a protocol
//! timer, a memory operation finishing, a detector window closing. Events
//! are immutable once scheduled and are dispatched by the scheduler in
//! `(scheduled_at, id)` order.

use std::cmp::Ordering;

use crate::memory::OperationId;
use crate::message::Message;
use crate::protocol::ProtocolId;
use crate::signal::SignalLabel;
use crate::time::VirtualTime;
use crate::topology::{ChannelId, DetectorId, NodeId, PortId, SourceId};
use crate::wait::TimerId;

// ── Event ID ──────────────────────────────────────────────────────────

/// A strictly-increasing event identifier.
///
/// Two events scheduled at the same `VirtualTime` are dispatched in
/// ascending `EventId` order, i.e. in registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(u64);

impl EventId {
    #[inline]
    pub fn new(raw: u64) -> Self {
        EventId(raw)
    }

    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "E#{}", self.0)
    }
}

/// Monotonic event-ID generator. Each `Scheduler` owns exactly one.
#[derive(Debug, Clone, Default)]
pub struct EventIdGen {
    next: u64,
}

impl EventIdGen {
    pub fn new() -> Self {
        EventIdGen { next: 0 }
    }

    /// Mint the next event ID.
    pub fn next_id(&mut self) -> EventId {
        let id = EventId(self.next);
        self.next += 1;
        id
    }

    /// Peek at the next ID without consuming it.
    pub fn peek(&self) -> EventId {
        EventId(self.next)
    }
}

// ── Event Type ────────────────────────────────────────────────────────

/// The payload of an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventType {
    /// Kernel test fixture; dispatched but has no effect.
    #[cfg(test)]
    Noop,

    /// Kernel test fixture carrying a marker string.
    #[cfg(test)]
    Log(String),

    /// A message finished propagating through `channel` and lands on `port`.
    Delivery {
        channel: ChannelId,
        port: PortId,
        message: Message,
    },

    /// Run `Protocol::start` for a registered protocol.
    ProtocolStart { protocol: ProtocolId },

    /// A protocol timer expired.
    TimerFired { protocol: ProtocolId, timer: TimerId },

    /// A quantum memory program finished on `node`.
    OperationComplete { node: NodeId, op: OperationId },

    /// A protocol emitted a signal; listeners are woken on dispatch.
    SignalRaised {
        owner: ProtocolId,
        label: SignalLabel,
        seq: u64,
    },

    /// Re-evaluate a protocol's wait against current state; scheduled
    /// when a wait is registered while one of its conditions already holds.
    Recheck { protocol: ProtocolId },

    /// The measurement window of a detector cycle has elapsed.
    DetectorWindowClosed { detector: DetectorId, cycle: u64 },

    /// An entangling source emits its next pair.
    SourceTick { source: SourceId },
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(test)]
            EventType::Noop => write!(f, "Noop"),
            #[cfg(test)]
            EventType::Log(msg) => write!(f, "Log({})", msg),
            EventType::Delivery {
                channel,
                port,
                message,
            } => write!(f, "Deliver({} → {}, {})", channel, port, message),
            EventType::ProtocolStart { protocol } => write!(f, "Start({})", protocol),
            EventType::TimerFired { protocol, timer } => {
                write!(f, "Timer({}, {})", protocol, timer)
            }
            EventType::OperationComplete { node, op } => write!(f, "Done({}, {})", node, op),
            EventType::SignalRaised { owner, label, seq } => {
                write!(f, "Signal({}, {}, #{})", owner, label, seq)
            }
            EventType::Recheck { protocol } => write!(f, "Recheck({})", protocol),
            EventType::DetectorWindowClosed { detector, cycle } => {
                write!(f, "WindowClosed({}, cycle {})", detector, cycle)
            }
            EventType::SourceTick { source } => write!(f, "Emit({})", source),
        }
    }
}

// ── Event ─────────────────────────────────────────────────────────────

/// A single scheduled event.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Event {
    pub id: EventId,
    pub scheduled_at: VirtualTime,
    pub payload: EventType,
}

impl Event {
    pub fn new(id: EventId, scheduled_at: VirtualTime, payload: EventType) -> Self {
        Event {
            id,
            scheduled_at,
            payload,
        }
    }
}

/// Ordering: smallest `(scheduled_at, id)` first.
///
/// `BinaryHeap` is a max-heap, so the natural ordering is reversed.
impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .scheduled_at
            .cmp(&self.scheduled_at)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
