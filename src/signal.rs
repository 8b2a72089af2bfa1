//! Typed protocol signals.
//!
//! Every signal is an immutable [`Emission`] appended to the run-wide
//! [`SignalBus`] log. Protocols consume signals through waits, each
//! listener keeping its own cursor per `(owner, label)`, so a signal
//! emitted just before the listener suspends is not lost. External
//! harnesses read them through subscriptions.
//!
//! The log is compacted as it grows. An emission survives while a
//! listener cursor or a subscription has yet to pass it, or while it is
//! among the newest [`RECENT_EMISSIONS`]. Counts and latest values are
//! kept per `(owner, label)` and are never compacted.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::message::HeraldOutcome;
use crate::protocol::ProtocolId;
use crate::time::VirtualTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalLabel {
    Success,
    Fail,
    /// Ask a lower layer to start an attempt.
    Request,
}

impl std::fmt::Display for SignalLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalLabel::Success => write!(f, "SUCCESS"),
            SignalLabel::Fail => write!(f, "FAIL"),
            SignalLabel::Request => write!(f, "REQUEST"),
        }
    }
}

/// Payload carried by a signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignalResult {
    /// A heralding reply reached the physical layer.
    Herald { outcome: HeraldOutcome, at: VirtualTime },
    /// No reply arrived before the reply deadline.
    NoReply { at: VirtualTime },
    /// The generation layer wants an attempt for `slot`.
    AttemptRequest { slot: usize },
    /// An entangled qubit now sits in `slot`.
    Entangled { slot: usize, at: VirtualTime },
    BellMeasured { m1: u8, m2: u8 },
    /// Corrections were applied to `slot`.
    Corrected { slot: usize },
    /// Every child of a composite succeeded; `round` counts from 1.
    Composite { round: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Emission {
    pub owner: ProtocolId,
    pub label: SignalLabel,
    pub result: SignalResult,
    pub at: VirtualTime,
    /// Run-wide emission order, never reused.
    pub seq: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(usize);

#[derive(Debug, Clone)]
struct Subscription {
    owner: ProtocolId,
    label: SignalLabel,
    /// Next seq this subscription has not streamed.
    cursor: u64,
}

/// Per-`(owner, label)` totals that survive compaction.
#[derive(Debug, Clone)]
struct Tally {
    count: usize,
    latest: Emission,
}

/// Emissions always kept by [`SignalBus::compact`], newest first.
pub const RECENT_EMISSIONS: usize = 256;

#[derive(Debug, Clone)]
pub struct SignalBus {
    /// Retained emissions, ascending by seq.
    log: Vec<Emission>,
    next_seq: u64,
    tallies: BTreeMap<(ProtocolId, SignalLabel), Tally>,
    subscriptions: Vec<Subscription>,
    compact_at: usize,
}

impl Default for SignalBus {
    fn default() -> Self {
        SignalBus {
            log: Vec::new(),
            next_seq: 0,
            tallies: BTreeMap::new(),
            subscriptions: Vec::new(),
            compact_at: 2 * RECENT_EMISSIONS,
        }
    }
}

impl SignalBus {
    pub fn new() -> Self {
        SignalBus::default()
    }

    /// Append an emission and return its sequence number.
    pub fn emit(
        &mut self,
        owner: ProtocolId,
        label: SignalLabel,
        result: SignalResult,
        at: VirtualTime,
    ) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        let emission = Emission {
            owner,
            label,
            result,
            at,
            seq,
        };
        match self.tallies.get_mut(&(owner, label)) {
            Some(tally) => {
                tally.count += 1;
                tally.latest = emission.clone();
            }
            None => {
                self.tallies.insert(
                    (owner, label),
                    Tally {
                        count: 1,
                        latest: emission.clone(),
                    },
                );
            }
        }
        self.log.push(emission);
        seq
    }

    /// Sequence number the next emission will get.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// A retained emission by sequence number.
    pub fn get(&self, seq: u64) -> Option<&Emission> {
        self.log
            .binary_search_by_key(&seq, |e| e.seq)
            .ok()
            .map(|i| &self.log[i])
    }

    pub fn latest(&self, owner: ProtocolId, label: SignalLabel) -> Option<&Emission> {
        self.tallies.get(&(owner, label)).map(|t| &t.latest)
    }

    /// First retained matching emission with `seq >= from`.
    pub fn next_from(&self, owner: ProtocolId, label: SignalLabel, from: u64) -> Option<&Emission> {
        let start = self.log.partition_point(|e| e.seq < from);
        self.log[start..]
            .iter()
            .find(|e| e.owner == owner && e.label == label)
    }

    /// Emissions ever made for `(owner, label)`, compacted or not.
    pub fn count(&self, owner: ProtocolId, label: SignalLabel) -> usize {
        self.tallies.get(&(owner, label)).map_or(0, |t| t.count)
    }

    /// Emissions still retained.
    pub fn emissions(&self) -> &[Emission] {
        &self.log
    }

    /// Subscribe to future `(owner, label)` emissions.
    pub fn subscribe(&mut self, owner: ProtocolId, label: SignalLabel) -> SubscriptionId {
        self.subscriptions.push(Subscription {
            owner,
            label,
            cursor: self.next_seq,
        });
        SubscriptionId(self.subscriptions.len() - 1)
    }

    /// Emissions for `sub` since the previous call.
    pub fn stream(&mut self, sub: SubscriptionId) -> Vec<Emission> {
        let Some(s) = self.subscriptions.get_mut(sub.0) else {
            return Vec::new();
        };
        let start = self.log.partition_point(|e| e.seq < s.cursor);
        let fresh: Vec<Emission> = self.log[start..]
            .iter()
            .filter(|e| e.owner == s.owner && e.label == s.label)
            .cloned()
            .collect();
        s.cursor = self.next_seq;
        fresh
    }

    /// Whether the log has grown enough since the last compaction.
    pub fn wants_compaction(&self) -> bool {
        self.log.len() >= self.compact_at
    }

    /// Drop emissions that no subscription still has to stream, that
    /// `needed` does not claim, and that are older than the newest
    /// [`RECENT_EMISSIONS`]. Returns how many were dropped.
    pub fn compact(&mut self, needed: impl Fn(&Emission) -> bool) -> usize {
        let before = self.log.len();
        let recent_from = before.saturating_sub(RECENT_EMISSIONS);
        let subscriptions = &self.subscriptions;
        let mut index = 0;
        self.log.retain(|e| {
            let keep = index >= recent_from
                || needed(e)
                || subscriptions
                    .iter()
                    .any(|s| s.owner == e.owner && s.label == e.label && s.cursor <= e.seq);
            index += 1;
            keep
        });
        self.compact_at = (self.log.len() * 2).max(2 * RECENT_EMISSIONS);
        before - self.log.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: ProtocolId = ProtocolId::new(0);
    const B: ProtocolId = ProtocolId::new(1);

    #[test]
    fn test_emit_and_lookup() {
        let mut bus = SignalBus::new();
        let s0 = bus.emit(A, SignalLabel::Fail, SignalResult::NoReply { at: VirtualTime::new(5) }, VirtualTime::new(5));
        let s1 = bus.emit(A, SignalLabel::Success, SignalResult::Corrected { slot: 0 }, VirtualTime::new(9));
        let s2 = bus.emit(B, SignalLabel::Success, SignalResult::Corrected { slot: 1 }, VirtualTime::new(9));

        assert_eq!((s0, s1, s2), (0, 1, 2));
        assert_eq!(bus.latest(A, SignalLabel::Success).unwrap().seq, 1);
        assert_eq!(bus.next_from(A, SignalLabel::Success, 2), None);
        assert_eq!(bus.next_from(B, SignalLabel::Success, 0).unwrap().seq, 2);
        assert_eq!(bus.count(A, SignalLabel::Fail), 1);
        assert!(bus.next_from(A, SignalLabel::Fail, 10).is_none());
    }

    #[test]
    fn test_subscription_stream_only_new() {
        let mut bus = SignalBus::new();
        bus.emit(A, SignalLabel::Success, SignalResult::Composite { round: 1 }, VirtualTime::new(1));
        let sub = bus.subscribe(A, SignalLabel::Success);
        assert!(bus.stream(sub).is_empty());

        bus.emit(A, SignalLabel::Success, SignalResult::Composite { round: 2 }, VirtualTime::new(2));
        bus.emit(A, SignalLabel::Fail, SignalResult::NoReply { at: VirtualTime::new(3) }, VirtualTime::new(3));
        let got = bus.stream(sub);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].result, SignalResult::Composite { round: 2 });
        assert!(bus.stream(sub).is_empty());
    }

    #[test]
    fn test_compaction_keeps_what_is_still_owed() {
        let mut bus = SignalBus::new();
        let sub = bus.subscribe(B, SignalLabel::Success);
        let total = 3 * RECENT_EMISSIONS as u64;
        for i in 0..total {
            bus.emit(A, SignalLabel::Fail, SignalResult::NoReply { at: VirtualTime::new(i) }, VirtualTime::new(i));
        }
        bus.emit(B, SignalLabel::Success, SignalResult::Corrected { slot: 0 }, VirtualTime::new(total));
        for i in 0..total {
            bus.emit(A, SignalLabel::Request, SignalResult::AttemptRequest { slot: 1 }, VirtualTime::new(i));
        }
        assert!(bus.wants_compaction());

        // A listener still owes the Fail at seq 7.
        let dropped = bus.compact(|e| e.label == SignalLabel::Fail && e.seq >= 7);
        assert!(dropped > 0);
        assert!(!bus.wants_compaction());
        assert_eq!(bus.next_from(A, SignalLabel::Fail, 0).unwrap().seq, 7);
        assert!(bus.get(3).is_none());
        assert_eq!(bus.emissions().len(), (total - 7) as usize + 1 + RECENT_EMISSIONS);

        // Totals and latest survive; the unstreamed subscription does too.
        assert_eq!(bus.count(A, SignalLabel::Request), total as usize);
        assert_eq!(bus.latest(A, SignalLabel::Request).unwrap().seq, bus.next_seq() - 1);
        let got = bus.stream(sub);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].seq, total);
    }

    #[test]
    fn test_label_display() {
        assert_eq!(SignalLabel::Success.to_string(), "SUCCESS");
        assert_eq!(SignalLabel::Request.to_string(), "REQUEST");
    }
}
