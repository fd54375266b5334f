//! Rate estimator - picks a slot index from the observed request cadence.
//!
//! `now / estimated_period` is a generation number that advances at roughly the
//! observed request rate, so taking it modulo the slot count spreads callers
//! across slots without a shared queue or per-call lock.
//!
//! Counters are relaxed atomics. Concurrent callers may race on a
//! recalibration and leave a slightly stale estimate; that only skews which
//! slot is picked. The estimate is never allowed to reach zero.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Estimate used before the first recalibration.
///
/// Large enough that every request in a cold pool maps to slot 0.
pub const DEFAULT_ESTIMATED_PERIOD: Duration = Duration::from_secs(3600);

/// Nanoseconds elapsed since `epoch`, saturating.
pub(crate) fn nanos_since(epoch: Instant) -> u64 {
    u64::try_from(epoch.elapsed().as_nanos()).unwrap_or(u64::MAX)
}

#[derive(Debug)]
pub struct RateEstimator {
    /// Start of the estimation window. Timestamps below are nanoseconds since it.
    window_start: Instant,
    stride: u64,
    observations: AtomicU64,
    last_observation: AtomicU64,
    estimated_period: AtomicU64,
}

impl RateEstimator {
    pub fn new(stride: u64) -> Self {
        Self::starting_at(Instant::now(), stride)
    }

    pub(crate) fn starting_at(window_start: Instant, stride: u64) -> Self {
        Self {
            window_start,
            stride: stride.max(1),
            observations: AtomicU64::new(0),
            last_observation: AtomicU64::new(0),
            estimated_period: AtomicU64::new(
                u64::try_from(DEFAULT_ESTIMATED_PERIOD.as_nanos()).unwrap_or(u64::MAX),
            ),
        }
    }

    /// Record one request and return the slot index it should use.
    pub fn next_index(&self, slots: usize) -> usize {
        self.observe_at(nanos_since(self.window_start), slots)
    }

    /// Record a request at `now` (nanoseconds into the window).
    ///
    /// Every `stride` observations the period is re-estimated as the mean
    /// spacing since the window start.
    pub(crate) fn observe_at(&self, now: u64, slots: usize) -> usize {
        debug_assert!(slots > 0, "index requested for an empty pool");

        let count = self.observations.fetch_add(1, Ordering::Relaxed) + 1;
        let last = self
            .last_observation
            .fetch_max(now, Ordering::Relaxed)
            .max(now);

        if count % self.stride == 0 {
            let candidate = last / count;
            if candidate != 0 {
                self.estimated_period.store(candidate, Ordering::Relaxed);
            }
        }

        let period = self.estimated_period.load(Ordering::Relaxed).max(1);
        let slots = u64::try_from(slots.max(1)).unwrap_or(u64::MAX);
        // Result is below `slots`, which came from a usize.
        ((now / period) % slots) as usize
    }

    pub fn estimated_period(&self) -> Duration {
        Duration::from_nanos(self.estimated_period.load(Ordering::Relaxed))
    }

    pub fn observations(&self) -> u64 {
        self.observations.load(Ordering::Relaxed)
    }
}
