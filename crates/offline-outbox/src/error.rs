//! Offline queue error types.

use thiserror::Error;

/// Offline queue error type.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum QueueError {
    /// An upload must carry at least one reading
    #[error("Cannot queue an upload without readings")]
    EmptyUpload,

    /// Upload is not in flight
    #[error("Upload not in flight: {0}")]
    UnknownUpload(String),
}

/// Result type alias using QueueError.
pub type QueueResult<T> = Result<T, QueueError>;
