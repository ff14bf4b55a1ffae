//! Sync error taxonomy.

use access_mapping::AccessError;
use offline_outbox::QueueError;
use reading_store::StoreError;
use sensor_inventory::InventoryError;
use session_resolver::SessionError;
use thiserror::Error;

/// Sync engine error type.
#[derive(Error, Debug)]
pub enum SyncError {
    /// No identity context. Never retried.
    #[error("Not authenticated")]
    NotAuthenticated,

    /// Session snapshot not loaded yet; defer.
    #[error("Session not loaded")]
    SessionNotLoaded,

    /// Offline. Queue or defer.
    #[error("No connectivity")]
    NoConnectivity,

    #[error("Remote write failed: {0}")]
    RemoteWriteFailed(String),

    #[error("Remote read failed: {0}")]
    RemoteReadFailed(String),

    /// Local store failure. The whole batch should be retried by the caller.
    #[error("Local write failed: {0}")]
    LocalWriteFailed(String),

    /// Local store could not be read. Not retried either.
    #[error("Local read failed: {0}")]
    LocalReadFailed(String),

    /// The session resolved to no usable role.
    #[error("No active role")]
    NoActiveRole,

    #[error("Role not held: {0}")]
    RoleNotHeld(String),

    #[error("Session error: {0}")]
    Session(SessionError),

    #[error("Access mapping error: {0}")]
    Access(#[from] AccessError),

    #[error("Offline queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Sensor inventory error: {0}")]
    Inventory(#[from] InventoryError),

    /// Invalid state transition in the pipeline FSM
    #[error("Invalid pipeline state transition: {0}")]
    InvalidStateTransition(String),
}

impl SyncError {
    /// Returns true if the operation may be retried later.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::SessionNotLoaded
            | SyncError::NoConnectivity
            | SyncError::RemoteWriteFailed(_)
            | SyncError::RemoteReadFailed(_) => true,
            SyncError::Session(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl From<SessionError> for SyncError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotAuthenticated => SyncError::NotAuthenticated,
            SessionError::NotLoaded => SyncError::SessionNotLoaded,
            SessionError::RoleNotHeld(role) => SyncError::RoleNotHeld(role),
            SessionError::Access(e) => SyncError::Access(e),
            other => SyncError::Session(other),
        }
    }
}

impl SyncError {
    /// Map a failed local query. Plain `?` on a store error means a write.
    pub fn local_read(err: StoreError) -> Self {
        SyncError::LocalReadFailed(err.to_string())
    }
}

/// Store errors reached through `?` come from inserts and deletes.
impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        SyncError::LocalWriteFailed(err.to_string())
    }
}

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;
