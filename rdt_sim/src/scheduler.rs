//! Discrete-event scheduler driving virtual time.
//!
//! Events are plain data (`A`), not closures: the owner of the scheduler pops
//! them and dispatches to whichever component they address. This keeps all
//! state single-owner and lets a handler schedule further events through the
//! `&mut EventScheduler` it is handed.
//!
//! # Ordering
//!
//! Events execute in nondecreasing fire time. Events due at the same instant
//! run in insertion order, so a run is fully reproducible.

use rdt_env::{delay_from_secs, EventHandle, RdtError, VirtualTime};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::trace;

/// Counters kept by the scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    /// Events ever scheduled
    pub scheduled: u64,

    /// Events whose action was executed
    pub fired: u64,

    /// Events removed by `cancel` before firing
    pub cancelled: u64,
}

/// Virtual-time event queue.
#[derive(Debug)]
pub struct EventScheduler<A> {
    /// Pending events, keyed by (fire time, insertion id)
    queue: BTreeMap<EventHandle, A>,

    /// Current virtual time
    now: VirtualTime,

    /// Next insertion id (FIFO tie-break)
    next_id: u64,

    stats: SchedulerStats,
}

impl<A> Default for EventScheduler<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> EventScheduler<A> {
    /// Creates an empty scheduler at virtual time zero.
    pub fn new() -> Self {
        Self {
            queue: BTreeMap::new(),
            now: VirtualTime::ZERO,
            next_id: 0,
            stats: SchedulerStats::default(),
        }
    }

    /// Current virtual time.
    pub fn now(&self) -> VirtualTime {
        self.now
    }

    /// Schedules `action` to fire `delay_secs` seconds from now.
    ///
    /// Fails with `InvalidArgument` for negative or non-finite delays.
    pub fn schedule(&mut self, delay_secs: f64, action: A) -> Result<EventHandle, RdtError> {
        let delay = delay_from_secs(delay_secs)?;
        Ok(self.schedule_after(delay, action))
    }

    /// Schedules `action` to fire `delay` from now.
    pub fn schedule_after(&mut self, delay: VirtualTime, action: A) -> EventHandle {
        self.insert(self.now.saturating_add(delay), action)
    }

    /// Schedules `action` at an absolute virtual time.
    ///
    /// Times in the past are rejected with `InvalidArgument`.
    pub fn schedule_at(&mut self, time: VirtualTime, action: A) -> Result<EventHandle, RdtError> {
        if time < self.now {
            return Err(RdtError::invalid_argument(format!(
                "cannot schedule at {:?}, clock is already at {:?}",
                time, self.now
            )));
        }
        Ok(self.insert(time, action))
    }

    fn insert(&mut self, time: VirtualTime, action: A) -> EventHandle {
        let handle = EventHandle::new(time, self.next_id);
        self.next_id += 1;
        self.stats.scheduled += 1;
        self.queue.insert(handle, action);

        trace!(fire_time = ?time, id = handle.id(), "Event scheduled");
        handle
    }

    /// Cancels a pending event.
    ///
    /// Idempotent: cancelling a fired or already-cancelled handle does nothing.
    /// Returns whether an event was actually removed.
    pub fn cancel(&mut self, handle: EventHandle) -> bool {
        let removed = self.queue.remove(&handle).is_some();
        if removed {
            self.stats.cancelled += 1;
            trace!(fire_time = ?handle.fire_time(), id = handle.id(), "Event cancelled");
        }
        removed
    }

    /// True if the event has neither fired nor been cancelled.
    pub fn is_pending(&self, handle: EventHandle) -> bool {
        self.queue.contains_key(&handle)
    }

    /// Number of pending events.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Fire time of the earliest pending event.
    pub fn next_fire_time(&self) -> Option<VirtualTime> {
        self.queue.keys().next().map(EventHandle::fire_time)
    }

    /// Removes the earliest event due at or before `deadline` and advances the
    /// clock to its fire time.
    pub fn pop_due(&mut self, deadline: VirtualTime) -> Option<(EventHandle, A)> {
        let (&handle, _) = self.queue.first_key_value()?;
        if handle.fire_time() > deadline {
            return None;
        }

        let (handle, action) = self.queue.pop_first()?;
        self.now = handle.fire_time();
        self.stats.fired += 1;
        Some((handle, action))
    }

    /// Moves the clock forward to `time` without firing anything.
    ///
    /// Never moves the clock backwards.
    pub fn advance_to(&mut self, time: VirtualTime) {
        if time > self.now {
            self.now = time;
        }
    }

    /// Fires every event due at or before `deadline`, then leaves the clock at
    /// `deadline`. Returns the number of events fired.
    ///
    /// `handler` may schedule and cancel further events; those due before the
    /// deadline fire in the same call.
    pub fn run_until<F>(&mut self, deadline: VirtualTime, mut handler: F) -> u64
    where
        F: FnMut(&mut Self, A),
    {
        let mut fired = 0;
        while let Some((_, action)) = self.pop_due(deadline) {
            handler(self, action);
            fired += 1;
        }
        self.advance_to(deadline);
        fired
    }

    /// Fires events until none remain. Returns the number of events fired.
    pub fn run_until_empty<F>(&mut self, mut handler: F) -> u64
    where
        F: FnMut(&mut Self, A),
    {
        let mut fired = 0;
        while let Some((_, action)) = self.pop_due(VirtualTime::MAX) {
            handler(self, action);
            fired += 1;
        }
        fired
    }

    /// Scheduler counters.
    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }
}
