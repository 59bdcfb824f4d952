//! Error types for batch-core.

use thiserror::Error;

use crate::types::{Millis, StageKind};

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by the pure scheduling math.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("stage {stage} has a negative duration: {duration} ms")]
    NegativeDuration { stage: StageKind, duration: Millis },

    #[error("batch infeasible: {stage} would finish at {finish} ms, before the batch anchor")]
    InfeasibleBatch { stage: StageKind, finish: Millis },

    #[error("unknown stage: {0}")]
    UnknownStage(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}
