//! Slot - one lazily opened resource handle behind a shared/exclusive lock.
//!
//! Callers hold the lock in shared mode while using the slot (`SlotGuard`).
//! Eviction needs exclusive mode, so it can never tear down a handle that a
//! caller is using. `try_open` only exists on the guard, so a slot cannot be
//! opened without holding shared access.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock, RwLockReadGuard};

use crate::config::{OpenFailurePolicy, PoolConfig};
use crate::error::PoolError;
use crate::rate::nanos_since;
use crate::resource::Resource;

/// One-time open trigger for the current generation.
enum SlotState<H> {
    /// Backed by the template; no open attempted this generation.
    Vacant,
    /// Open attempted and failed. Replayed to callers until eviction
    /// (unless the policy retries).
    Failed(PoolError),
    /// Open succeeded.
    Open(Arc<H>),
}

pub struct Slot<R: Resource> {
    index: usize,
    resource: Arc<R>,
    policy: OpenFailurePolicy,
    verbose: bool,
    epoch: Instant,
    access: RwLock<()>,
    state: Mutex<SlotState<R::Handle>>,
    active: AtomicBool,
    failed: AtomicBool,
    holders: AtomicUsize,
    /// Nanoseconds since `epoch`.
    last_touched: AtomicU64,
}

impl<R: Resource> Slot<R> {
    pub(crate) fn new(
        index: usize,
        resource: Arc<R>,
        config: &PoolConfig,
        epoch: Instant,
    ) -> Self {
        Self {
            index,
            resource,
            policy: config.open_failure_policy,
            verbose: config.verbose,
            epoch,
            access: RwLock::new(()),
            state: Mutex::new(SlotState::Vacant),
            active: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            holders: AtomicUsize::new(0),
            last_touched: AtomicU64::new(nanos_since(epoch)),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// True once an open succeeded and the slot has not been evicted since.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// True while the current generation holds a cached open failure.
    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// True while at least one caller holds shared access.
    pub fn is_locked(&self) -> bool {
        self.holders.load(Ordering::Acquire) > 0
    }

    /// Time since the last lock, unlock or eviction.
    pub fn idle_for(&self) -> Duration {
        let now = nanos_since(self.epoch);
        let touched = self.last_touched.load(Ordering::Acquire);
        Duration::from_nanos(now.saturating_sub(touched))
    }

    /// Acquire shared access.
    ///
    /// Waits only while an eviction holds the slot exclusively. Access is
    /// released when the guard drops.
    pub async fn lock(&self) -> SlotGuard<'_, R> {
        let access = self.access.read().await;
        self.holders.fetch_add(1, Ordering::AcqRel);
        self.touch();
        SlotGuard {
            slot: self,
            _access: access,
        }
    }

    fn touch(&self) {
        self.last_touched.store(nanos_since(self.epoch), Ordering::Release);
    }

    async fn open(&self) -> Result<Arc<R::Handle>, PoolError> {
        // Held across acquire() so racing callers wait for the first one's result.
        let mut state = self.state.lock().await;
        match &*state {
            SlotState::Open(handle) => return Ok(Arc::clone(handle)),
            SlotState::Failed(err) if self.policy == OpenFailurePolicy::CacheUntilEvicted => {
                return Err(err.clone());
            }
            SlotState::Failed(_) | SlotState::Vacant => {}
        }

        let started = Instant::now();
        match self.resource.acquire().await {
            Ok(handle) => {
                let handle = Arc::new(handle);
                *state = SlotState::Open(Arc::clone(&handle));
                self.failed.store(false, Ordering::Release);
                self.active.store(true, Ordering::Release);
                if self.verbose {
                    tracing::debug!(slot = self.index, elapsed = ?started.elapsed(), "Slot opened");
                }
                Ok(handle)
            }
            Err(e) => {
                let err = PoolError::acquire(self.index, &e);
                tracing::warn!(slot = self.index, error = %err, "Failed to open slot");
                *state = SlotState::Failed(err.clone());
                self.failed.store(true, Ordering::Release);
                Err(err)
            }
        }
    }

    /// Evict the current generation if it is eligible.
    ///
    /// Eligible means open (or holding a cached failure), unlocked, and either
    /// `forced` or idle for longer than `idle_threshold`. A slot held by any
    /// caller is skipped, not waited on. Returns whether an eviction happened.
    pub(crate) async fn evict(&self, forced: bool, idle_threshold: Duration) -> bool {
        if !self.is_active() && !self.is_failed() {
            return false;
        }
        if !forced && self.idle_for() <= idle_threshold {
            return false;
        }

        let Ok(_exclusive) = self.access.try_write() else {
            if self.verbose {
                tracing::debug!(slot = self.index, "Slot in use - skipping eviction");
            }
            return false;
        };

        // A caller may have unlocked between the checks above and taking the lock.
        if !forced && self.idle_for() <= idle_threshold {
            return false;
        }

        let previous = {
            // Uncontended: opening requires shared access.
            let mut state = self.state.lock().await;
            std::mem::replace(&mut *state, SlotState::Vacant)
        };
        self.active.store(false, Ordering::Release);
        self.failed.store(false, Ordering::Release);
        self.touch();

        match previous {
            SlotState::Open(handle) => {
                self.resource.release(handle).await;
                if self.verbose {
                    tracing::debug!(slot = self.index, forced, "Slot evicted");
                }
            }
            SlotState::Failed(_) => {
                if self.verbose {
                    tracing::debug!(slot = self.index, forced, "Cleared failed open");
                }
            }
            SlotState::Vacant => return false,
        }
        true
    }
}

/// Shared access to a slot. Dropping it unlocks.
#[must_use = "dropping the guard unlocks the slot immediately"]
pub struct SlotGuard<'a, R: Resource> {
    slot: &'a Slot<R>,
    _access: RwLockReadGuard<'a, ()>,
}

impl<R: Resource> SlotGuard<'_, R> {
    pub fn slot(&self) -> &Slot<R> {
        self.slot
    }

    /// Open the slot if this generation has not been opened yet.
    ///
    /// At most one `acquire()` runs per generation; concurrent callers wait
    /// for it and see the same handle or the same error. With
    /// [`OpenFailurePolicy::CacheUntilEvicted`] a failure is replayed
    /// without calling `acquire()` again until the slot is evicted.
    pub async fn try_open(&self) -> Result<Arc<R::Handle>, PoolError> {
        self.slot.open().await
    }

    /// The live handle, if this generation is open. Never opens.
    pub async fn handle(&self) -> Option<Arc<R::Handle>> {
        match &*self.slot.state.lock().await {
            SlotState::Open(handle) => Some(Arc::clone(handle)),
            _ => None,
        }
    }

    /// Release shared access. Same as dropping the guard.
    pub fn unlock(self) {}
}

impl<R: Resource> Drop for SlotGuard<'_, R> {
    fn drop(&mut self) {
        self.slot.holders.fetch_sub(1, Ordering::AcqRel);
        self.slot.touch();
    }
}
