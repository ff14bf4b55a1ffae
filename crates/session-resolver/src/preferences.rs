//! "Last selected role" preference, keyed by identity.

use std::collections::HashMap;

use async_trait::async_trait;
use reading_store::SqliteReadingStore;
use tokio::sync::RwLock;

use crate::{Role, SessionError, SessionResult};

#[async_trait]
pub trait RolePreferenceStore: Send + Sync {
    async fn load(&self, identity: &str) -> SessionResult<Option<Role>>;
    async fn save(&self, identity: &str, role: Role) -> SessionResult<()>;
    async fn clear(&self, identity: &str) -> SessionResult<()>;
}

/// Preference rows live next to the readings in the local SQLite file.
#[async_trait]
impl RolePreferenceStore for SqliteReadingStore {
    async fn load(&self, identity: &str) -> SessionResult<Option<Role>> {
        let stored = self
            .role_preference(identity)
            .await
            .map_err(|e| SessionError::Preference(e.to_string()))?;
        // A row naming a role this build no longer knows reads as no preference.
        Ok(stored.as_deref().and_then(Role::parse))
    }

    async fn save(&self, identity: &str, role: Role) -> SessionResult<()> {
        self.set_role_preference(identity, role.as_str())
            .await
            .map_err(|e| SessionError::Preference(e.to_string()))
    }

    async fn clear(&self, identity: &str) -> SessionResult<()> {
        self.clear_role_preference(identity)
            .await
            .map_err(|e| SessionError::Preference(e.to_string()))
    }
}

/// Preferences held in memory.
#[derive(Default)]
pub struct MemoryPreferences {
    roles: RwLock<HashMap<String, Role>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RolePreferenceStore for MemoryPreferences {
    async fn load(&self, identity: &str) -> SessionResult<Option<Role>> {
        Ok(self.roles.read().await.get(identity).copied())
    }

    async fn save(&self, identity: &str, role: Role) -> SessionResult<()> {
        self.roles.write().await.insert(identity.to_string(), role);
        Ok(())
    }

    async fn clear(&self, identity: &str) -> SessionResult<()> {
        self.roles.write().await.remove(identity);
        Ok(())
    }
}
