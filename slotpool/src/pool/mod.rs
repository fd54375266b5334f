//! Slot pool: fixed slot table, lazy per-slot open, idle eviction.
//!
//! Slot lifecycle (per generation):
//! - `Vacant` → `Open` via a successful `try_open` (one `acquire()` per generation)
//! - `Vacant` → `Failed` via a failed `try_open` (error replayed until eviction)
//! - `Open` / `Failed` → `Vacant` via eviction (exclusive access, `release()` for `Open`)

mod slot;
mod slot_pool;
mod sweep;

pub use slot::{Slot, SlotGuard};
pub use slot_pool::{PoolStatus, SlotPool, SlotPoolBuilder};
