//! Session error types.

use thiserror::Error;

/// Session resolution error type.
#[derive(Error, Debug)]
pub enum SessionError {
    /// No identity is signed in.
    #[error("Not authenticated")]
    NotAuthenticated,

    /// The identity has no profile document.
    #[error("Profile missing for identity")]
    ProfileMissing,

    /// The session has not been loaded yet.
    #[error("Session not loaded")]
    NotLoaded,

    /// Profile or assignment fetch failed; retry later.
    #[error("Transient session error: {0}")]
    Transient(String),

    /// Role selection outside the identity's role set.
    #[error("Role not held by identity: {0}")]
    RoleNotHeld(String),

    /// Invalid state transition in the session FSM
    #[error("Invalid session state transition: {0}")]
    InvalidStateTransition(String),

    /// Assignment lookup error
    #[error("Access mapping error: {0}")]
    Access(#[from] access_mapping::AccessError),

    /// Role preference storage error
    #[error("Role preference error: {0}")]
    Preference(String),
}

impl SessionError {
    /// Returns true if the load can be retried later.
    pub fn is_transient(&self) -> bool {
        match self {
            SessionError::Transient(_) | SessionError::NotLoaded => true,
            SessionError::Access(access_mapping::AccessError::Backend(_)) => true,
            _ => false,
        }
    }
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;
