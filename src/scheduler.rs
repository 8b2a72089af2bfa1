//! Deterministic event scheduler.
//!
//! Uses a `BinaryHeap` with reversed `Ord` on `Event` to act as a
//! min-heap keyed by `(scheduled_at, event_id)`. Event IDs are strictly
//! increasing, so two runs that schedule the same events in the same
//! order dispatch them in the same order.
//!
//! Cancellation is lazy: a cancelled event stays in the heap and is
//! skipped when it reaches the top.

use std::collections::{BTreeSet, BinaryHeap};

use crate::event::{Event, EventId, EventIdGen, EventType};
use crate::time::VirtualTime;

/// The core deterministic scheduler.
#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    /// Min-heap (via reversed Ord on Event).
    queue: BinaryHeap<Event>,

    /// IDs of events that are scheduled and not yet dispatched or cancelled.
    live: BTreeSet<EventId>,

    /// Monotonic event-ID generator.
    id_gen: EventIdGen,
}

impl Scheduler {
    /// Create a new, empty scheduler.
    pub fn new() -> Self {
        Scheduler {
            queue: BinaryHeap::new(),
            live: BTreeSet::new(),
            id_gen: EventIdGen::new(),
        }
    }

    /// Schedule a new event at the given virtual time.
    ///
    /// Returns the `EventId` assigned to this event.
    pub fn schedule(&mut self, at: VirtualTime, payload: EventType) -> EventId {
        let id = self.id_gen.next_id();
        self.queue.push(Event::new(id, at, payload));
        self.live.insert(id);
        id
    }

    /// Cancel a pending event. Returns `false` if the event was already
    /// dispatched or cancelled.
    pub fn cancel(&mut self, id: EventId) -> bool {
        self.live.remove(&id)
    }

    /// Returns `true` if `id` is still waiting to be dispatched.
    pub fn is_pending(&self, id: EventId) -> bool {
        self.live.contains(&id)
    }

    /// Pop the next live event (earliest time, lowest ID).
    ///
    /// Returns `None` when no live events remain.
    pub fn pop_next(&mut self) -> Option<Event> {
        while let Some(event) = self.queue.pop() {
            if self.live.remove(&event.id) {
                return Some(event);
            }
        }
        None
    }

    /// Peek at the next live event without removing it.
    pub fn peek_next(&mut self) -> Option<&Event> {
        self.discard_cancelled();
        self.queue.peek()
    }

    /// Time of the next live event, if any.
    pub fn next_time(&mut self) -> Option<VirtualTime> {
        self.peek_next().map(|e| e.scheduled_at)
    }

    /// Returns `true` if no live events remain.
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Returns the number of live events.
    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// Returns the next event ID that will be assigned.
    pub fn next_event_id(&self) -> EventId {
        self.id_gen.peek()
    }

    /// Drain all live events in dispatch order into a `Vec`.
    pub fn drain_ordered(&mut self) -> Vec<Event> {
        let mut events = Vec::with_capacity(self.live.len());
        while let Some(e) = self.pop_next() {
            events.push(e);
        }
        events
    }

    fn discard_cancelled(&mut self) {
        while let Some(top) = self.queue.peek() {
            if self.live.contains(&top.id) {
                break;
            }
            self.queue.pop();
        }
    }
}
