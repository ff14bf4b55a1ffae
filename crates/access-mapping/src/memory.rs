//! In-memory backends, used by tests and the simulator.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{AccessError, AccessResult, Assignment, AssignmentStore, ViewerDirectory, ViewerProfile};

/// Assignment collection held in a sorted map keyed by `{viewer}_{remote}`.
#[derive(Default)]
pub struct MemoryAssignmentStore {
    docs: RwLock<BTreeMap<String, Assignment>>,
    unavailable: AtomicBool,
}

impl MemoryAssignmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with [`AccessError::Backend`] until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.docs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.docs.read().await.is_empty()
    }

    fn check(&self) -> AccessResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AccessError::Backend("assignment store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl AssignmentStore for MemoryAssignmentStore {
    async fn get(&self, viewer_id: &str, remote_id: &str) -> AccessResult<Option<Assignment>> {
        self.check()?;
        let key = Assignment::key_for(viewer_id, remote_id);
        Ok(self.docs.read().await.get(&key).cloned())
    }

    async fn put(&self, assignment: Assignment) -> AccessResult<()> {
        self.check()?;
        self.docs.write().await.insert(assignment.key(), assignment);
        Ok(())
    }

    async fn delete(&self, viewer_id: &str, remote_id: &str) -> AccessResult<bool> {
        self.check()?;
        let key = Assignment::key_for(viewer_id, remote_id);
        Ok(self.docs.write().await.remove(&key).is_some())
    }

    async fn delete_many(&self, keys: &[(String, String)]) -> AccessResult<usize> {
        self.check()?;
        // Single write guard: readers see either all or none of the removals.
        let mut docs = self.docs.write().await;
        let removed = keys
            .iter()
            .filter(|(viewer, remote)| docs.remove(&Assignment::key_for(viewer, remote)).is_some())
            .count();
        Ok(removed)
    }

    async fn query_by_viewer(&self, viewer_id: &str) -> AccessResult<Vec<Assignment>> {
        self.check()?;
        Ok(self
            .docs
            .read()
            .await
            .values()
            .filter(|a| a.viewer_id == viewer_id)
            .cloned()
            .collect())
    }

    async fn query_by_remote(&self, remote_id: &str) -> AccessResult<Vec<Assignment>> {
        self.check()?;
        Ok(self
            .docs
            .read()
            .await
            .values()
            .filter(|a| a.remote_id == remote_id)
            .cloned()
            .collect())
    }
}

/// Fixed list of viewer profiles.
#[derive(Default)]
pub struct MemoryViewerDirectory {
    viewers: RwLock<Vec<ViewerProfile>>,
}

impl MemoryViewerDirectory {
    pub fn new(viewers: Vec<ViewerProfile>) -> Self {
        Self {
            viewers: RwLock::new(viewers),
        }
    }

    pub async fn add(&self, profile: ViewerProfile) {
        self.viewers.write().await.push(profile);
    }
}

#[async_trait]
impl ViewerDirectory for MemoryViewerDirectory {
    async fn list_viewers(&self) -> AccessResult<Vec<ViewerProfile>> {
        Ok(self.viewers.read().await.clone())
    }
}
