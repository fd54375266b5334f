//! Resource contract - the expensive thing a pool shares between callers.

use std::sync::Arc;

use async_trait::async_trait;

/// A resource that a [`SlotPool`](crate::SlotPool) opens lazily and shares.
///
/// The value handed to the pool builder acts as the template for every slot:
/// slots open through it, and a slot whose handle was evicted is backed by
/// the template again until its next open.
#[async_trait]
pub trait Resource: Send + Sync + 'static {
    /// Live handle produced by a successful open.
    type Handle: Send + Sync + 'static;

    /// Perform the real setup. May be slow.
    ///
    /// Called at most once per slot generation.
    async fn acquire(&self) -> anyhow::Result<Self::Handle>;

    /// Tear a handle down. Best effort, there is no error channel.
    ///
    /// Called exactly once per opened generation, while no caller holds the slot.
    async fn release(&self, handle: Arc<Self::Handle>);
}
