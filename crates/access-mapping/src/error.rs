//! Error types for the access mapping service.

use thiserror::Error;

/// Access mapping errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    /// Empty or malformed identifier.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// No viewer matches the given email.
    #[error("Viewer not found: {0}")]
    ViewerNotFound(String),

    /// The assignment collection could not be read or written.
    #[error("Assignment backend error: {0}")]
    Backend(String),
}

/// Result type for access mapping operations.
pub type AccessResult<T> = Result<T, AccessError>;
