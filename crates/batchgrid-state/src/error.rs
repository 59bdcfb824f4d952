//! Error types for the batchgrid state crate.

use thiserror::Error;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur while loading or saving target state.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),
}

/// Errors decoding a message read from the port.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("empty message")]
    Empty,

    #[error("unknown message shape: {0}")]
    UnknownShape(String),

    #[error("missing target name in: {0}")]
    MissingTarget(String),

    #[error("invalid stage: {0}")]
    InvalidStage(String),

    #[error("invalid job report: {0}")]
    InvalidReport(String),
}

/// Errors writing to the port.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("port is full, message dropped")]
    Full,

    #[error("port is closed")]
    Closed,
}
