use thiserror::Error;

/// Invalid construction parameters. No pool is produced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("no resource template provided")]
    MissingResource,

    #[error("pool size must be at least 1")]
    ZeroSize,

    #[error("recalibration stride must be at least 1")]
    ZeroStride,

    #[error("sweep period must be non-zero")]
    ZeroSweepPeriod,

    #[error("idle threshold must be non-zero")]
    ZeroIdleThreshold,

    #[error("slot pool must be built inside a tokio runtime")]
    NoRuntime,
}

/// Errors surfaced to pool callers.
///
/// `Clone` so one failed open can be replayed to every caller of the same
/// slot generation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("slot pool is not initialized")]
    NotInitialized,

    #[error("failed to open slot {slot}: {message}")]
    Acquire { slot: usize, message: String },
}

impl PoolError {
    pub fn acquire(slot: usize, error: &anyhow::Error) -> Self {
        Self::Acquire {
            slot,
            message: format!("{error:#}"),
        }
    }
}
