//! Backend seams of the access mapping service.

use async_trait::async_trait;

use crate::{AccessResult, Assignment, ViewerProfile};

/// Flat assignment collection keyed by `(viewer_id, remote_id)`.
#[async_trait]
pub trait AssignmentStore: Send + Sync {
    async fn get(&self, viewer_id: &str, remote_id: &str) -> AccessResult<Option<Assignment>>;

    /// Create or overwrite the assignment for its pair.
    async fn put(&self, assignment: Assignment) -> AccessResult<()>;

    /// Returns false when the pair did not exist.
    async fn delete(&self, viewer_id: &str, remote_id: &str) -> AccessResult<bool>;

    /// Delete several pairs as one batch. Either all keys are removed or none.
    async fn delete_many(&self, keys: &[(String, String)]) -> AccessResult<usize>;

    async fn query_by_viewer(&self, viewer_id: &str) -> AccessResult<Vec<Assignment>>;

    async fn query_by_remote(&self, remote_id: &str) -> AccessResult<Vec<Assignment>>;
}

/// Lookup of identities holding the viewer role.
#[async_trait]
pub trait ViewerDirectory: Send + Sync {
    async fn list_viewers(&self) -> AccessResult<Vec<ViewerProfile>>;
}
