//! Pool configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// What a slot does with a failed open on the next `try_open` of the same generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenFailurePolicy {
    /// Replay the cached error until an eviction starts a new generation.
    #[default]
    CacheUntilEvicted,
    /// Run `acquire()` again on the next `try_open`.
    RetryOnNextOpen,
}

/// Construction-time pool options.
///
/// Durations serialize as whole milliseconds (`sweep_period_ms`, `idle_threshold_ms`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of slots. Fixed for the life of the pool.
    pub size: usize,
    /// Observations between rate re-estimations.
    pub recalibration_stride: u64,
    /// How often the idle sweep runs.
    #[serde(rename = "sweep_period_ms", with = "millis")]
    pub sweep_period: Duration,
    /// Age past which an unlocked slot is eligible for eviction.
    #[serde(rename = "idle_threshold_ms", with = "millis")]
    pub idle_threshold: Duration,
    pub open_failure_policy: OpenFailurePolicy,
    /// Emit per-operation debug events. Has no effect on behavior.
    pub verbose: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 1,
            recalibration_stride: 16,
            sweep_period: Duration::from_secs(30),
            idle_threshold: Duration::from_secs(60),
            open_failure_policy: OpenFailurePolicy::default(),
            verbose: false,
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.size == 0 {
            return Err(ConfigError::ZeroSize);
        }
        if self.recalibration_stride == 0 {
            return Err(ConfigError::ZeroStride);
        }
        if self.sweep_period.is_zero() {
            return Err(ConfigError::ZeroSweepPeriod);
        }
        if self.idle_threshold.is_zero() {
            return Err(ConfigError::ZeroIdleThreshold);
        }
        Ok(())
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
