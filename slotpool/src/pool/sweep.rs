//! Background idle sweep.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::slot_pool::PoolInner;
use crate::resource::Resource;

/// Run a non-forced clean every `sweep_period` until `cancel` fires.
pub(crate) fn spawn_sweeper<R: Resource>(
    runtime: &Handle,
    inner: Arc<PoolInner<R>>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    runtime.spawn(async move {
        let period = inner.config.sweep_period;
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let evicted = inner.clean(false).await;
                    if inner.config.verbose {
                        tracing::debug!(evicted, size = inner.slots.len(), "Sweep complete");
                    }
                }
            }
        }

        tracing::debug!(period = ?period, "Sweeper stopped");
    })
}
