//! Composite wait conditions.
//!
//! A [`WaitSet`] is an OR of branches, each branch an AND of atomic
//! [`Condition`]s. A protocol registers one wait set at a time; the
//! runtime resolves it to the first branch whose conditions all hold,
//! consumes exactly the resources of that branch and discards the rest.
//! Timers named anywhere else in the set are cancelled on resolution.

use std::collections::BTreeMap;

use crate::error::{HeraldError, HeraldResult};
use crate::memory::OperationId;
use crate::message::Message;
use crate::protocol::ProtocolId;
use crate::signal::{Emission, SignalLabel};
use crate::time::VirtualTime;
use crate::topology::PortId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(u64);

impl TimerId {
    pub fn new(raw: u64) -> Self {
        TimerId(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TimerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Condition {
    /// A message is buffered on the port.
    PortInput(PortId),
    /// A memory program has completed.
    Operation(OperationId),
    /// `owner` emitted a signal with `label` that this listener has not
    /// consumed yet.
    Signal { owner: ProtocolId, label: SignalLabel },
    /// A timer owned by the waiting protocol has fired.
    Timer(TimerId),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WaitSet {
    branches: Vec<Vec<Condition>>,
}

impl WaitSet {
    pub fn new() -> Self {
        WaitSet::default()
    }

    /// One branch per condition.
    pub fn any(conditions: impl IntoIterator<Item = Condition>) -> Self {
        WaitSet {
            branches: conditions.into_iter().map(|c| vec![c]).collect(),
        }
    }

    /// Add a single-condition branch.
    pub fn or(mut self, condition: Condition) -> Self {
        self.branches.push(vec![condition]);
        self
    }

    /// Add a branch that holds only when every condition holds.
    pub fn or_all(mut self, conditions: impl IntoIterator<Item = Condition>) -> Self {
        self.branches.push(conditions.into_iter().collect());
        self
    }

    pub fn branches(&self) -> &[Vec<Condition>] {
        &self.branches
    }

    pub fn is_empty(&self) -> bool {
        self.branches.iter().all(|b| b.is_empty())
    }

    pub fn mentions(&self, condition: &Condition) -> bool {
        self.conditions().any(|c| c == condition)
    }

    pub fn conditions(&self) -> impl Iterator<Item = &Condition> {
        self.branches.iter().flatten()
    }
}

/// What a resolved condition delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WakePayload {
    Message(Message),
    Operation { op: OperationId, bits: Vec<u8> },
    Signal(Emission),
    Timer(TimerId),
}

/// The resolution of a wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wake {
    /// Index of the winning branch.
    pub index: usize,
    /// One payload per condition of the winning branch, in branch order.
    pub payloads: Vec<WakePayload>,
    pub at: VirtualTime,
}

impl Wake {
    pub fn message(&self) -> Option<&Message> {
        self.payloads.iter().find_map(|p| match p {
            WakePayload::Message(m) => Some(m),
            _ => None,
        })
    }

    pub fn bits(&self) -> Option<&[u8]> {
        self.payloads.iter().find_map(|p| match p {
            WakePayload::Operation { bits, .. } => Some(bits.as_slice()),
            _ => None,
        })
    }

    pub fn signal(&self) -> Option<&Emission> {
        self.payloads.iter().find_map(|p| match p {
            WakePayload::Signal(e) => Some(e),
            _ => None,
        })
    }

    pub fn is_timer(&self) -> bool {
        self.payloads.iter().any(|p| matches!(p, WakePayload::Timer(_)))
    }
}

#[derive(Debug, Clone)]
pub(crate) struct PendingWait {
    pub(crate) order: u64,
    pub(crate) set: WaitSet,
}

/// Registered waits, one per suspended protocol.
#[derive(Debug, Clone, Default)]
pub(crate) struct WaitTable {
    pending: BTreeMap<ProtocolId, PendingWait>,
    next_order: u64,
}

impl WaitTable {
    pub(crate) fn register(&mut self, protocol: ProtocolId, set: WaitSet) -> HeraldResult<()> {
        if set.is_empty() {
            return Err(HeraldError::EmptyWaitSet(protocol));
        }
        if self.pending.contains_key(&protocol) {
            return Err(HeraldError::AlreadyWaiting(protocol));
        }
        let order = self.next_order;
        self.next_order += 1;
        self.pending.insert(protocol, PendingWait { order, set });
        Ok(())
    }

    pub(crate) fn get(&self, protocol: ProtocolId) -> Option<&WaitSet> {
        self.pending.get(&protocol).map(|w| &w.set)
    }

    pub(crate) fn take(&mut self, protocol: ProtocolId) -> Option<WaitSet> {
        self.pending.remove(&protocol).map(|w| w.set)
    }

    pub(crate) fn is_waiting(&self, protocol: ProtocolId) -> bool {
        self.pending.contains_key(&protocol)
    }

    /// Protocols whose wait mentions `condition`, in registration order.
    pub(crate) fn waiters_for(&self, condition: &Condition) -> Vec<ProtocolId> {
        let mut found: Vec<(u64, ProtocolId)> = self
            .pending
            .iter()
            .filter(|(_, w)| w.set.mentions(condition))
            .map(|(id, w)| (w.order, *id))
            .collect();
        found.sort();
        found.into_iter().map(|(_, id)| id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const P: ProtocolId = ProtocolId::new(0);
    const Q: ProtocolId = ProtocolId::new(1);

    #[test]
    fn test_any_builds_single_branches() {
        let set = WaitSet::any([
            Condition::PortInput(PortId::new(1)),
            Condition::Timer(TimerId::new(2)),
        ]);
        assert_eq!(set.branches().len(), 2);
        assert!(set.mentions(&Condition::Timer(TimerId::new(2))));
        assert!(!set.mentions(&Condition::Timer(TimerId::new(3))));
    }

    #[test]
    fn test_or_all_conjunction() {
        let set = WaitSet::new()
            .or_all([
                Condition::Operation(OperationId::new(1)),
                Condition::PortInput(PortId::new(0)),
            ])
            .or(Condition::Timer(TimerId::new(0)));
        assert_eq!(set.branches()[0].len(), 2);
        assert_eq!(set.conditions().count(), 3);
    }

    #[test]
    fn test_register_rejects_double_and_empty() {
        let mut table = WaitTable::default();
        assert_eq!(table.register(P, WaitSet::new()), Err(HeraldError::EmptyWaitSet(P)));

        let set = WaitSet::any([Condition::PortInput(PortId::new(0))]);
        table.register(P, set.clone()).unwrap();
        assert_eq!(table.register(P, set), Err(HeraldError::AlreadyWaiting(P)));
        assert!(table.is_waiting(P));
        assert!(table.take(P).is_some());
        assert!(!table.is_waiting(P));
    }

    #[test]
    fn test_waiters_in_registration_order() {
        let mut table = WaitTable::default();
        let port = Condition::PortInput(PortId::new(4));
        // Q registers first even though its id sorts after P.
        table.register(Q, WaitSet::any([port])).unwrap();
        table.register(P, WaitSet::any([port])).unwrap();
        assert_eq!(table.waiters_for(&port), vec![Q, P]);
        assert!(table.waiters_for(&Condition::Timer(TimerId::new(0))).is_empty());
    }
}
