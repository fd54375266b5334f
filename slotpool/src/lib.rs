//! slotpool: share a small, fixed set of expensive resources between many
//! concurrent callers.
//!
//! Slots open lazily on first use, exactly once per generation, and are
//! closed again by a background sweep once they sit idle and unheld.

mod config;
mod error;
pub mod logging;
mod pool;
mod rate;
mod resource;
#[cfg(test)]
mod test_support;

pub use config::{OpenFailurePolicy, PoolConfig};
pub use error::{ConfigError, PoolError};
pub use pool::{PoolStatus, Slot, SlotGuard, SlotPool, SlotPoolBuilder};
pub use rate::{DEFAULT_ESTIMATED_PERIOD, RateEstimator};
pub use resource::Resource;
