//! Scheduler error types.

use thiserror::Error;

use batchgrid_state::ChannelError;

/// Errors that abort a scheduling cycle.
///
/// Per-target problems (capacity shortfalls, rejected launches) never
/// surface here; they become notes in the cycle report.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("inventory unavailable: {0}")]
    InventoryRead(String),

    #[error("inventory malformed: {0}")]
    InventoryParse(String),

    #[error("state port error: {0}")]
    Channel(#[from] ChannelError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
