//! Dispatch trace and run digests.
//!
//! When tracing is enabled the simulation appends one `TraceEntry` per
//! dispatched event. The digest folds `(id, time, description)` of every
//! entry into a single `u64`; two runs with identical inputs produce
//! identical digests. The simulation folds the same digest on every
//! dispatch, so a run can be fingerprinted without keeping its entries.

use serde::Serialize;

use crate::event::Event;
use crate::time::VirtualTime;

// ── Hash utility ──────────────────────────────────────────────────────

/// Combine two u64 hashes deterministically.
pub fn hash_combine(a: u64, b: u64) -> u64 {
    let mut h = a;
    h = h.wrapping_mul(0x517cc1b727220a95);
    h = h.wrapping_add(b);
    h ^= h >> 32;
    h
}

/// Hash a byte slice deterministically (FNV-1a).
pub fn hash_bytes(data: &[u8]) -> u64 {
    let mut h: u64 = 0xcbf29ce484222325;
    for &b in data {
        h ^= b as u64;
        h = h.wrapping_mul(0x100000001b3);
    }
    h
}

/// Fold one entry into a running digest.
pub fn fold_entry(h: u64, entry: &TraceEntry) -> u64 {
    let h = hash_combine(h, entry.event_id);
    let h = hash_combine(h, entry.time.ticks());
    hash_combine(h, hash_bytes(entry.description.as_bytes()))
}

// ── Trace ─────────────────────────────────────────────────────────────

/// One dispatched event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceEntry {
    pub time: VirtualTime,
    pub event_id: u64,
    pub description: String,
}

impl TraceEntry {
    pub fn from_event(event: &Event) -> Self {
        TraceEntry {
            time: event.scheduled_at,
            event_id: event.id.raw(),
            description: event.payload.to_string(),
        }
    }
}

impl std::fmt::Display for TraceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{} E#{}] {}", self.time, self.event_id, self.description)
    }
}

/// Append-only record of dispatched events.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Trace {
    entries: Vec<TraceEntry>,
}

impl Trace {
    pub fn new() -> Self {
        Trace::default()
    }

    pub fn record(&mut self, event: &Event) {
        self.push(TraceEntry::from_event(event));
    }

    pub fn push(&mut self, entry: TraceEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Order-sensitive hash of the whole trace.
    pub fn digest(&self) -> u64 {
        self.entries.iter().fold(0u64, fold_entry)
    }

    /// Serialize the trace as JSON lines, one entry per line.
    pub fn to_json_lines(&self) -> serde_json::Result<String> {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&serde_json::to_string(entry)?);
            out.push('\n');
        }
        Ok(out)
    }
}
