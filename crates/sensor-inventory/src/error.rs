//! Error types for the sensor inventory.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InventoryError {
    /// Empty sensor id or display name.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The remote sensor collection could not be read or written.
    #[error("Sensor directory error: {0}")]
    Backend(String),

    /// The local name table could not be read or written.
    #[error("Local sensor names error: {0}")]
    Local(String),
}

pub type InventoryResult<T> = Result<T, InventoryError>;
