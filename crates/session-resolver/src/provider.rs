//! Identity and profile seams.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock as AsyncRwLock;

use crate::{SessionError, SessionResult};

/// Source of the signed-in identity.
pub trait IdentityProvider: Send + Sync {
    /// Current identity id, `None` when signed out.
    fn current_identity(&self) -> Option<String>;
}

/// Identity held in memory, set by sign-in and cleared by sign-out.
#[derive(Default)]
pub struct StaticIdentity {
    identity: RwLock<Option<String>>,
}

impl StaticIdentity {
    pub fn new(identity: Option<String>) -> Self {
        Self {
            identity: RwLock::new(identity),
        }
    }

    pub fn signed_in(identity: impl Into<String>) -> Self {
        Self::new(Some(identity.into()))
    }

    pub fn sign_in(&self, identity: impl Into<String>) {
        *self.identity.write().expect("lock poisoned") = Some(identity.into());
    }

    pub fn sign_out(&self) {
        *self.identity.write().expect("lock poisoned") = None;
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_identity(&self) -> Option<String> {
        self.identity.read().expect("lock poisoned").clone()
    }
}

/// Key-value profile documents, one per identity.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Fetch the raw profile. `Ok(None)` when the identity has no profile.
    async fn fetch_profile(&self, identity: &str) -> SessionResult<Option<Value>>;
}

/// Profiles held in memory.
#[derive(Default)]
pub struct MemoryProfileStore {
    profiles: AsyncRwLock<HashMap<String, Value>>,
    unavailable: AtomicBool,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, identity: impl Into<String>, profile: Value) {
        self.profiles.write().await.insert(identity.into(), profile);
    }

    pub async fn remove(&self, identity: &str) {
        self.profiles.write().await.remove(identity);
    }

    /// Make fetches fail with a transient error until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn fetch_profile(&self, identity: &str) -> SessionResult<Option<Value>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SessionError::Transient("profile store unavailable".to_string()));
        }
        Ok(self.profiles.read().await.get(identity).cloned())
    }
}
