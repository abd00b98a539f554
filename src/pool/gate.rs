//! Admission control for worker processes.
//!
//! A [`PoolGate`] bounds how many worker processes one component instance may
//! have alive at once. Callers block in [`PoolGate::acquire`] until a slot is
//! free; the returned [`PoolSlot`] gives the slot back when dropped.

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

/// Upper bound on a single wait before re-checking the count.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Default)]
struct Counts {
    held: usize,
    peak: usize,
}

/// Counting gate with wake-on-release.
#[derive(Debug)]
pub struct PoolGate {
    max: usize,
    counts: Mutex<Counts>,
    released: Condvar,
}

impl PoolGate {
    /// Create a gate admitting up to `max` slots. `max == 0` means workers
    /// are never used and the gate must not be acquired.
    pub fn new(max: usize) -> Self {
        Self {
            max,
            counts: Mutex::new(Counts::default()),
            released: Condvar::new(),
        }
    }

    pub fn max(&self) -> usize {
        self.max
    }

    /// Block until a slot is free, then take it.
    ///
    /// No ordering is guaranteed among blocked callers.
    pub fn acquire(&self) -> PoolSlot<'_> {
        assert!(self.max > 0, "acquire on a pool gate with no slots");

        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        while counts.held >= self.max {
            let (guard, _) = self
                .released
                .wait_timeout(counts, POLL_INTERVAL)
                .unwrap_or_else(PoisonError::into_inner);
            counts = guard;
        }
        counts.held += 1;
        counts.peak = counts.peak.max(counts.held);
        tracing::trace!(held = counts.held, max = self.max, "Pool slot acquired");
        PoolSlot { gate: self }
    }

    /// Take a slot only if one is free right now.
    pub fn try_acquire(&self) -> Option<PoolSlot<'_>> {
        if self.max == 0 {
            return None;
        }
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        if counts.held >= self.max {
            return None;
        }
        counts.held += 1;
        counts.peak = counts.peak.max(counts.held);
        Some(PoolSlot { gate: self })
    }

    fn release(&self) {
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        counts.held = counts.held.saturating_sub(1);
        tracing::trace!(held = counts.held, max = self.max, "Pool slot released");
        drop(counts);
        self.released.notify_one();
    }

    /// Slots currently held.
    pub fn held(&self) -> usize {
        self.counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .held
    }

    /// Highest number of slots ever held at once.
    pub fn peak(&self) -> usize {
        self.counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .peak
    }
}

/// One admitted worker. Dropping it releases the slot.
#[derive(Debug)]
pub struct PoolSlot<'a> {
    gate: &'a PoolGate,
}

impl Drop for PoolSlot<'_> {
    fn drop(&mut self) {
        self.gate.release();
    }
}
