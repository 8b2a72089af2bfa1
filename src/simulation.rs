//! Simulation execution loop.
//!
//! Drives the scheduler: pops events, advances virtual time, dispatches
//! to a handler. The loop is synchronous and single-threaded, and each
//! dispatch runs to completion before the next event is popped.

use tracing::trace;

use crate::error::{HeraldError, HeraldResult};
use crate::event::{Event, EventId, EventType};
use crate::scheduler::Scheduler;
use crate::time::VirtualTime;
use crate::trace::{fold_entry, Trace, TraceEntry};

// ── Handler trait ─────────────────────────────────────────────────────

/// Reacts to dispatched events.
///
/// The handler receives a `SimulationContext` so it can schedule and
/// cancel follow-up events. An error aborts the run and is returned
/// from `step`/`run`.
pub trait EventHandler {
    fn handle(&mut self, ctx: &mut SimulationContext, event: &Event) -> HeraldResult<()>;
}

/// A handler backed by a closure; handy in tests.
impl<F> EventHandler for F
where
    F: FnMut(&mut SimulationContext, &Event) -> HeraldResult<()>,
{
    fn handle(&mut self, ctx: &mut SimulationContext, event: &Event) -> HeraldResult<()> {
        (self)(ctx, event)
    }
}

// ── Simulation Context ───────────────────────────────────────────────

/// Mutable context passed to the handler on every event dispatch.
///
/// The context borrows the scheduler mutably, so a handler cannot
/// interfere with dispatch ordering outside of the schedule API.
pub struct SimulationContext<'a> {
    pub(crate) scheduler: &'a mut Scheduler,
    pub(crate) now: VirtualTime,
}

impl<'a> SimulationContext<'a> {
    /// Current virtual time.
    #[inline]
    pub fn now(&self) -> VirtualTime {
        self.now
    }

    /// Schedule an event at an absolute virtual time.
    ///
    /// Scheduling before `now` is rejected with `NonCausalEvent`.
    pub fn schedule_at(&mut self, at: VirtualTime, payload: EventType) -> HeraldResult<EventId> {
        if at.is_before(self.now) {
            return Err(HeraldError::NonCausalEvent {
                requested: at.ticks(),
                current: self.now.ticks(),
            });
        }
        Ok(self.scheduler.schedule(at, payload))
    }

    /// Schedule an event `delay` ns after now.
    pub fn schedule_after(&mut self, delay: u64, payload: EventType) -> HeraldResult<EventId> {
        let at = self.now.plus(delay).ok_or(HeraldError::NonCausalEvent {
            requested: u64::MAX,
            current: self.now.ticks(),
        })?;
        Ok(self.scheduler.schedule(at, payload))
    }

    /// Cancel a pending event. Returns `false` if it already ran.
    pub fn cancel(&mut self, id: EventId) -> bool {
        self.scheduler.cancel(id)
    }

    /// Number of pending events in the scheduler.
    pub fn pending_count(&self) -> usize {
        self.scheduler.len()
    }
}

// ── Simulation ────────────────────────────────────────────────────────

/// Top-level simulation driver.
///
/// Owns the scheduler and tracks the current virtual time.
#[derive(Debug, Clone, Default)]
pub struct Simulation {
    scheduler: Scheduler,
    current_time: VirtualTime,
    events_processed: u64,
    digest: u64,
    trace: Option<Trace>,
}

impl Simulation {
    /// Create a new simulation starting at time zero.
    pub fn new() -> Self {
        Simulation::default()
    }

    /// Record every dispatched event from now on.
    pub fn enable_trace(&mut self) {
        if self.trace.is_none() {
            self.trace = Some(Trace::new());
        }
    }

    /// The dispatch trace, if tracing is enabled.
    pub fn trace(&self) -> Option<&Trace> {
        self.trace.as_ref()
    }

    /// Digest of every event dispatched so far, traced or not.
    pub fn digest(&self) -> u64 {
        self.digest
    }

    pub fn scheduler_mut(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    /// Current virtual time.
    pub fn current_time(&self) -> VirtualTime {
        self.current_time
    }

    /// Total events processed so far.
    pub fn events_processed(&self) -> u64 {
        self.events_processed
    }

    /// Schedule an event from outside a dispatch.
    pub fn schedule(&mut self, at: VirtualTime, payload: EventType) -> HeraldResult<EventId> {
        let mut ctx = self.context();
        ctx.schedule_at(at, payload)
    }

    /// A scheduling context at the current time, for use between steps.
    pub fn context(&mut self) -> SimulationContext<'_> {
        SimulationContext {
            scheduler: &mut self.scheduler,
            now: self.current_time,
        }
    }

    /// Execute a single step: pop one event, advance time, dispatch.
    ///
    /// Returns `Ok(None)` when the queue is empty.
    pub fn step(&mut self, handler: &mut dyn EventHandler) -> HeraldResult<Option<Event>> {
        let Some(event) = self.scheduler.pop_next() else {
            return Ok(None);
        };

        debug_assert!(
            event.scheduled_at >= self.current_time,
            "time went backward: current={}, event={}",
            self.current_time,
            event.scheduled_at
        );
        self.current_time = event.scheduled_at;
        self.events_processed += 1;
        trace!(time = %self.current_time, id = %event.id, event = %event.payload, "dispatch");

        let entry = TraceEntry::from_event(&event);
        self.digest = fold_entry(self.digest, &entry);
        if let Some(t) = self.trace.as_mut() {
            t.push(entry);
        }

        let mut ctx = SimulationContext {
            scheduler: &mut self.scheduler,
            now: self.current_time,
        };
        handler.handle(&mut ctx, &event)?;

        Ok(Some(event))
    }

    /// Run until the event queue is empty.
    ///
    /// Returns the number of events processed during this call.
    pub fn run(&mut self, handler: &mut dyn EventHandler) -> HeraldResult<u64> {
        let start = self.events_processed;
        while self.step(handler)?.is_some() {}
        Ok(self.events_processed - start)
    }

    /// Run until the queue is empty or `max_steps` events have been
    /// dispatched, whichever comes first.
    pub fn run_for(&mut self, max_steps: u64, handler: &mut dyn EventHandler) -> HeraldResult<u64> {
        let start = self.events_processed;
        let mut steps = 0u64;
        while steps < max_steps {
            if self.step(handler)?.is_none() {
                break;
            }
            steps += 1;
        }
        Ok(self.events_processed - start)
    }

    /// Dispatch every event scheduled at or before `horizon`, then move
    /// the clock to `horizon`. Later events stay queued.
    pub fn run_until(
        &mut self,
        horizon: VirtualTime,
        handler: &mut dyn EventHandler,
    ) -> HeraldResult<u64> {
        let start = self.events_processed;
        while let Some(next) = self.scheduler.next_time() {
            if next > horizon {
                break;
            }
            self.step(handler)?;
        }
        if self.current_time < horizon {
            self.current_time = horizon;
        }
        Ok(self.events_processed - start)
    }

    /// Returns `true` if there are no more events to process.
    pub fn is_finished(&self) -> bool {
        self.scheduler.is_empty()
    }
}
