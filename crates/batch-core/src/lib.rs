//! batch-core: shared types and pure scheduling math for batchgrid.
//!
//! - **`types`**: stage kinds, per-stage containers, target lifecycle records
//! - **`slots`**: the time-slot coordinator that phases wake-ups into a cycle
//! - **`timing`**: the batch timing engine (per-stage launch delays)
//! - **`config`**: `batchgrid.toml` parsing

pub mod config;
pub mod error;
pub mod slots;
pub mod timing;
pub mod types;

pub use config::BatchConfig;
pub use error::{CoreError, CoreResult};
pub use slots::SlotClock;
pub use timing::{StageTiming, batch_length, compute_batch_timing, slot_aligned_delays};
pub use types::*;
