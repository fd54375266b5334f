//! SlotPool - fixed slot table, rate-based index selection and idle eviction.
//!
//! `get()` never blocks, queues, or allocates: it asks the rate estimator for
//! an index and hands out that slot, even if the slot is mid-open or in use by
//! other callers. A background sweep evicts slots that have been idle past the
//! threshold and are not held by anyone.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::slot::Slot;
use super::sweep::spawn_sweeper;
use crate::config::{OpenFailurePolicy, PoolConfig};
use crate::error::{ConfigError, PoolError};
use crate::rate::RateEstimator;
use crate::resource::Resource;

pub(crate) struct PoolInner<R: Resource> {
    pub(crate) slots: Vec<Slot<R>>,
    pub(crate) rate: RateEstimator,
    pub(crate) config: PoolConfig,
    template: Option<Arc<R>>,
}

impl<R: Resource> PoolInner<R> {
    /// Evict every eligible slot. Returns the number evicted.
    pub(crate) async fn clean(&self, forced: bool) -> usize {
        let mut evicted = 0;
        for slot in &self.slots {
            if slot.evict(forced, self.config.idle_threshold).await {
                evicted += 1;
            }
        }
        evicted
    }
}

/// Point-in-time view of the pool for health reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub size: usize,
    /// Slots holding an open handle.
    pub active: usize,
    /// Slots with at least one caller holding shared access.
    pub locked: usize,
    /// Slots whose current generation cached an open failure.
    pub failed: usize,
    pub observations: u64,
    pub estimated_period_ns: u64,
}

/// Fixed-size pool of lazily opened resource slots.
///
/// Built with [`SlotPool::builder`]. Dropping the pool stops the sweep;
/// [`SlotPool::shutdown`] also closes every open handle.
pub struct SlotPool<R: Resource> {
    inner: Arc<PoolInner<R>>,
    cancel: CancellationToken,
    sweeper: StdMutex<Option<JoinHandle<()>>>,
}

impl<R: Resource> SlotPool<R> {
    pub fn builder() -> SlotPoolBuilder<R> {
        SlotPoolBuilder::default()
    }

    /// A pool with no slots and no sweep. `get()` fails with `NotInitialized`.
    ///
    /// Placeholder for owners that start before the resource is configured.
    pub fn unconfigured() -> Self {
        let config = PoolConfig::default();
        Self {
            inner: Arc::new(PoolInner {
                slots: Vec::new(),
                rate: RateEstimator::new(config.recalibration_stride),
                config,
                template: None,
            }),
            cancel: CancellationToken::new(),
            sweeper: StdMutex::new(None),
        }
    }

    /// Hand out the slot for this request.
    pub fn get(&self) -> Result<&Slot<R>, PoolError> {
        let slots = &self.inner.slots;
        if slots.is_empty() {
            return Err(PoolError::NotInitialized);
        }

        let index = self.inner.rate.next_index(slots.len());
        if self.inner.config.verbose {
            tracing::trace!(slot = index, "Handing out slot");
        }
        slots.get(index).ok_or(PoolError::NotInitialized)
    }

    /// Evict active slots that are unlocked and idle past the threshold,
    /// or every unlocked active slot when `forced`.
    ///
    /// Slots holding a cached open failure are reset under the same rules, so
    /// a forced clean lets the next `try_open` make a fresh attempt.
    pub async fn clean(&self, forced: bool) -> usize {
        let evicted = self.inner.clean(forced).await;
        if self.inner.config.verbose {
            tracing::debug!(evicted, forced, "Clean complete");
        }
        evicted
    }

    /// Stop the sweep and close every unlocked slot.
    ///
    /// The pool can still hand out and open slots afterwards; they are just
    /// no longer swept. Returns the number of slots evicted.
    pub async fn shutdown(&self) -> usize {
        self.cancel.cancel();

        let sweeper = match self.sweeper.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = sweeper
            && let Err(e) = handle.await
        {
            tracing::error!(error = %e, "Sweeper task failed");
        }

        let evicted = self.inner.clean(true).await;
        tracing::info!(evicted, "Slot pool shut down");
        evicted
    }

    pub fn size(&self) -> usize {
        self.inner.slots.len()
    }

    pub fn slot(&self, index: usize) -> Option<&Slot<R>> {
        self.inner.slots.get(index)
    }

    pub fn slots(&self) -> impl Iterator<Item = &Slot<R>> {
        self.inner.slots.iter()
    }

    /// The resource every slot opens through. `None` for an unconfigured pool.
    pub fn template(&self) -> Option<&R> {
        self.inner.template.as_deref()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn rate(&self) -> &RateEstimator {
        &self.inner.rate
    }

    pub fn status(&self) -> PoolStatus {
        let slots = &self.inner.slots;
        PoolStatus {
            size: slots.len(),
            active: slots.iter().filter(|s| s.is_active()).count(),
            locked: slots.iter().filter(|s| s.is_locked()).count(),
            failed: slots.iter().filter(|s| s.is_failed()).count(),
            observations: self.inner.rate.observations(),
            estimated_period_ns: u64::try_from(self.inner.rate.estimated_period().as_nanos())
                .unwrap_or(u64::MAX),
        }
    }
}

impl<R: Resource> Default for SlotPool<R> {
    fn default() -> Self {
        Self::unconfigured()
    }
}

impl<R: Resource> Drop for SlotPool<R> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Builder for [`SlotPool`]. Must be built inside a tokio runtime.
pub struct SlotPoolBuilder<R: Resource> {
    resource: Option<R>,
    config: PoolConfig,
}

impl<R: Resource> Default for SlotPoolBuilder<R> {
    fn default() -> Self {
        Self {
            resource: None,
            config: PoolConfig::default(),
        }
    }
}

impl<R: Resource> SlotPoolBuilder<R> {
    /// Resource template every slot opens through. Required.
    pub fn resource(mut self, resource: R) -> Self {
        self.resource = Some(resource);
        self
    }

    /// Replace all options at once.
    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    pub fn size(mut self, size: usize) -> Self {
        self.config.size = size;
        self
    }

    pub fn recalibration_stride(mut self, stride: u64) -> Self {
        self.config.recalibration_stride = stride;
        self
    }

    pub fn sweep_period(mut self, period: Duration) -> Self {
        self.config.sweep_period = period;
        self
    }

    pub fn idle_threshold(mut self, threshold: Duration) -> Self {
        self.config.idle_threshold = threshold;
        self
    }

    pub fn open_failure_policy(mut self, policy: OpenFailurePolicy) -> Self {
        self.config.open_failure_policy = policy;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.config.verbose = verbose;
        self
    }

    /// Validate, allocate the slots and start the sweep.
    pub fn build(self) -> Result<SlotPool<R>, ConfigError> {
        let resource = self.resource.ok_or(ConfigError::MissingResource)?;
        let config = self.config;
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| ConfigError::NoRuntime)?;

        let resource = Arc::new(resource);
        let epoch = Instant::now();
        let slots = (0..config.size)
            .map(|index| Slot::new(index, Arc::clone(&resource), &config, epoch))
            .collect();

        tracing::info!(
            size = config.size,
            stride = config.recalibration_stride,
            sweep_period = ?config.sweep_period,
            idle_threshold = ?config.idle_threshold,
            "Slot pool started"
        );

        let inner = Arc::new(PoolInner {
            slots,
            rate: RateEstimator::starting_at(epoch, config.recalibration_stride),
            config,
            template: Some(resource),
        });

        let cancel = CancellationToken::new();
        let sweeper = spawn_sweeper(&runtime, Arc::clone(&inner), cancel.clone());

        Ok(SlotPool {
            inner,
            cancel,
            sweeper: StdMutex::new(Some(sweeper)),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::Ordering;

    use async_trait::async_trait;
    use rand::Rng;

    use super::*;
    use crate::test_support::{CountingResource, TestConnection};

    fn builder(resource: CountingResource) -> SlotPoolBuilder<CountingResource> {
        SlotPool::builder()
            .resource(resource)
            .size(4)
            .recalibration_stride(5)
            .sweep_period(Duration::from_millis(30))
            .idle_threshold(Duration::from_millis(20))
    }

    fn counters(pool: &SlotPool<CountingResource>) -> &CountingResource {
        pool.template().unwrap()
    }

    #[test]
    fn build_rejects_invalid_parameters() {
        let missing = SlotPool::<CountingResource>::builder().size(4).build();
        assert!(matches!(missing, Err(ConfigError::MissingResource)));

        let zero_size = builder(CountingResource::new()).size(0).build();
        assert!(matches!(zero_size, Err(ConfigError::ZeroSize)));

        let zero_stride = builder(CountingResource::new())
            .recalibration_stride(0)
            .build();
        assert!(matches!(zero_stride, Err(ConfigError::ZeroStride)));

        let zero_sweep = builder(CountingResource::new())
            .sweep_period(Duration::ZERO)
            .build();
        assert!(matches!(zero_sweep, Err(ConfigError::ZeroSweepPeriod)));
    }

    #[test]
    fn build_outside_runtime_fails() {
        let pool = builder(CountingResource::new()).build();
        assert!(matches!(pool, Err(ConfigError::NoRuntime)));
    }

    #[tokio::test]
    async fn build_allocates_requested_slots() {
        let pool = builder(CountingResource::new()).size(7).build().unwrap();

        assert_eq!(pool.size(), 7);
        let indices: Vec<_> = pool.slots().map(|s| s.index()).collect();
        assert_eq!(indices, (0..7).collect::<Vec<_>>());
        assert!(pool.slots().all(|s| !s.is_active()));
        assert_eq!(counters(&pool).acquires(), 0, "slots open lazily");
    }

    #[tokio::test]
    async fn unconfigured_pool_is_not_initialized() {
        let pool = SlotPool::<CountingResource>::default();

        assert!(matches!(pool.get(), Err(PoolError::NotInitialized)));
        assert_eq!(pool.size(), 0);
        assert!(pool.template().is_none());
        assert_eq!(pool.clean(true).await, 0);
        assert_eq!(pool.shutdown().await, 0);
    }

    #[tokio::test]
    async fn cold_pool_hands_out_slot_zero() {
        let pool = builder(CountingResource::new()).build().unwrap();

        for _ in 0..4 {
            assert_eq!(pool.get().unwrap().index(), 0);
        }
        assert_eq!(pool.rate().observations(), 4);
    }

    #[tokio::test]
    async fn steady_traffic_visits_every_slot() {
        let pool = builder(CountingResource::new()).build().unwrap();
        assert_eq!(pool.config().recalibration_stride, 5);

        let mut seen = HashSet::new();
        for _ in 0..200 {
            tokio::time::sleep(Duration::from_millis(1)).await;
            let slot = pool.get().unwrap();
            let guard = slot.lock().await;
            seen.insert(guard.slot().index());
        }

        assert_eq!(seen.len(), 4, "indices should visit every slot: {seen:?}");
        assert_eq!(pool.rate().observations(), 200);
        assert!(pool.rate().estimated_period() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn status_snapshot_of_fresh_pool() {
        let pool = builder(CountingResource::new()).size(2).build().unwrap();

        insta::assert_json_snapshot!(pool.status(), @r#"
        {
          "size": 2,
          "active": 0,
          "locked": 0,
          "failed": 0,
          "observations": 0,
          "estimated_period_ns": 3600000000000
        }
        "#);
    }

    #[tokio::test]
    async fn sweep_evicts_idle_slot() {
        let pool = builder(CountingResource::new()).build().unwrap();

        let slot = pool.get().unwrap();
        let handle = slot.lock().await.try_open().await.unwrap();
        assert!(slot.is_active());

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(!slot.is_active());
        assert!(handle.closed.load(Ordering::SeqCst));
        assert_eq!(counters(&pool).releases(), 1);
    }

    #[tokio::test]
    async fn sweep_waits_for_last_unlock() {
        let pool = builder(CountingResource::new()).build().unwrap();

        let slot = pool.get().unwrap();
        let guard = slot.lock().await;
        let handle = guard.try_open().await.unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(slot.is_active(), "held slot must survive the sweep");
        assert!(!handle.closed.load(Ordering::SeqCst));
        assert_eq!(counters(&pool).releases(), 0);

        drop(guard);
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!slot.is_active());
        assert_eq!(counters(&pool).releases(), 1);
    }

    #[tokio::test]
    async fn unforced_clean_keeps_recent_slots() {
        let pool = builder(CountingResource::new())
            .idle_threshold(Duration::from_secs(60))
            .build()
            .unwrap();

        pool.slot(2).unwrap().lock().await.try_open().await.unwrap();

        assert_eq!(pool.clean(false).await, 0);
        assert!(pool.slot(2).unwrap().is_active());
    }

    #[tokio::test]
    async fn forced_clean_evicts_unlocked_slots_regardless_of_age() {
        let pool = builder(CountingResource::new())
            .idle_threshold(Duration::from_secs(60))
            .build()
            .unwrap();

        let first = pool.slot(0).unwrap();
        let second = pool.slot(1).unwrap();
        first.lock().await.try_open().await.unwrap();
        let held = second.lock().await;
        held.try_open().await.unwrap();

        assert_eq!(pool.clean(true).await, 1);
        assert!(!first.is_active());
        assert!(second.is_active());
        assert_eq!(counters(&pool).releases(), 1);

        held.unlock();
        assert_eq!(pool.clean(true).await, 1);
        assert_eq!(counters(&pool).releases(), 2);
    }

    #[tokio::test]
    async fn forced_clean_allows_fresh_open_after_failure() {
        let pool = builder(CountingResource::failing())
            .idle_threshold(Duration::from_secs(60))
            .build()
            .unwrap();

        let slot = pool.get().unwrap();
        {
            let guard = slot.lock().await;
            let err = guard.try_open().await.unwrap_err();
            assert_eq!(
                err,
                PoolError::Acquire {
                    slot: 0,
                    message: "connection refused".to_string()
                }
            );
        }
        assert_eq!(pool.status().failed, 1);

        counters(&pool).fail.store(false, Ordering::SeqCst);
        assert!(slot.lock().await.try_open().await.is_err(), "failure is cached");

        assert_eq!(pool.clean(true).await, 1);
        assert!(slot.lock().await.try_open().await.is_ok());
        assert_eq!(counters(&pool).acquires(), 2);
        assert_eq!(counters(&pool).releases(), 0);
    }

    #[tokio::test]
    async fn shutdown_closes_every_handle() {
        let pool = builder(CountingResource::new())
            .sweep_period(Duration::from_secs(60))
            .idle_threshold(Duration::from_secs(60))
            .build()
            .unwrap();

        for index in 0..3 {
            pool.slot(index).unwrap().lock().await.try_open().await.unwrap();
        }
        assert_eq!(pool.status().active, 3);

        assert_eq!(pool.shutdown().await, 3);
        assert_eq!(pool.status().active, 0);
        assert_eq!(counters(&pool).releases(), 3);
        assert_eq!(pool.shutdown().await, 0);
    }

    #[tokio::test]
    async fn status_counts_slot_states() {
        let pool = builder(CountingResource::new())
            .idle_threshold(Duration::from_secs(60))
            .build()
            .unwrap();

        pool.slot(0).unwrap().lock().await.try_open().await.unwrap();
        let held = pool.slot(3).unwrap().lock().await;
        pool.get().unwrap();

        let status = pool.status();
        assert_eq!(status.active, 1);
        assert_eq!(status.locked, 1);
        assert_eq!(status.failed, 0);
        assert_eq!(status.observations, 1);
        drop(held);
    }

    /// Opens slowly and hands out random positive ids.
    struct RandomConnector;

    #[async_trait]
    impl Resource for RandomConnector {
        type Handle = TestConnection;

        async fn acquire(&self) -> anyhow::Result<TestConnection> {
            let (delay, id) = {
                let mut rng = rand::rng();
                (rng.random_range(10..=15), rng.random_range(1..=100))
            };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok(TestConnection {
                id,
                closed: Default::default(),
            })
        }

        async fn release(&self, handle: Arc<TestConnection>) {
            handle.closed.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_only_see_live_handles() {
        let pool = Arc::new(
            SlotPool::builder()
                .resource(RandomConnector)
                .size(4)
                .recalibration_stride(5)
                .sweep_period(Duration::from_millis(30))
                .idle_threshold(Duration::from_millis(20))
                .build()
                .unwrap(),
        );

        let tasks: Vec<_> = (0..100u64)
            .map(|i| {
                let pool = Arc::clone(&pool);
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(i * 2)).await;
                    let slot = pool.get().unwrap();
                    let guard = slot.lock().await;
                    let handle = guard.try_open().await.unwrap();

                    assert!(handle.id > 0);
                    assert!(slot.is_active());
                    assert!(!handle.closed.load(Ordering::SeqCst));

                    let work = rand::rng().random_range(5..=30);
                    tokio::time::sleep(Duration::from_millis(work)).await;
                    assert!(
                        !handle.closed.load(Ordering::SeqCst),
                        "handle closed while locked"
                    );
                    slot.index()
                })
            })
            .collect();

        let mut used = HashSet::new();
        for task in futures::future::join_all(tasks).await {
            used.insert(task.unwrap());
        }

        assert!(!used.is_empty());
        assert!(pool.rate().estimated_period() < crate::DEFAULT_ESTIMATED_PERIOD);
        pool.shutdown().await;
        assert_eq!(pool.status().active, 0);
    }
}
