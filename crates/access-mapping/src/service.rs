//! Assignment service: assign, unassign, and reverse lookups.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::{
    AccessError, AccessResult, AssignOutcome, Assignment, AssignmentStore, ViewerDirectory,
    ViewerProfile,
};

/// Authoritative viewer authorization service.
///
/// Every lookup goes to the assignment store; nothing is cached here.
#[derive(Clone)]
pub struct AccessMappingService {
    store: Arc<dyn AssignmentStore>,
    directory: Arc<dyn ViewerDirectory>,
}

impl AccessMappingService {
    pub fn new(store: Arc<dyn AssignmentStore>, directory: Arc<dyn ViewerDirectory>) -> Self {
        Self { store, directory }
    }

    /// Authorize `viewer_id` to mirror `remote_id`. Re-assigning an existing
    /// pair is a no-op success.
    pub async fn assign(
        &self,
        remote_id: &str,
        viewer_id: &str,
        assigned_by: &str,
    ) -> AccessResult<AssignOutcome> {
        require("remote_id", remote_id)?;
        require("viewer_id", viewer_id)?;

        if self.store.get(viewer_id, remote_id).await?.is_some() {
            debug!(viewer_id, remote_id, "Assignment already present");
            return Ok(AssignOutcome::AlreadyAssigned);
        }

        self.store
            .put(Assignment::new(viewer_id, remote_id, assigned_by))
            .await?;
        info!(viewer_id, remote_id, assigned_by, "Viewer assigned");
        Ok(AssignOutcome::Created)
    }

    /// Remove one grant. Returns false when it did not exist.
    pub async fn unassign(&self, remote_id: &str, viewer_id: &str) -> AccessResult<bool> {
        require("remote_id", remote_id)?;
        require("viewer_id", viewer_id)?;

        let removed = self.store.delete(viewer_id, remote_id).await?;
        if removed {
            info!(viewer_id, remote_id, "Viewer unassigned");
        }
        Ok(removed)
    }

    /// Remove every grant for a remote identity in one batch.
    pub async fn unassign_all(&self, remote_id: &str) -> AccessResult<usize> {
        require("remote_id", remote_id)?;

        let keys: Vec<(String, String)> = self
            .store
            .query_by_remote(remote_id)
            .await?
            .into_iter()
            .map(|a| (a.viewer_id, a.remote_id))
            .collect();
        if keys.is_empty() {
            return Ok(0);
        }

        let removed = self.store.delete_many(&keys).await?;
        info!(remote_id, removed, "All viewers unassigned");
        Ok(removed)
    }

    /// Remote identities a viewer may mirror, sorted and de-duplicated.
    pub async fn list_remote_ids_for(&self, viewer_id: &str) -> AccessResult<Vec<String>> {
        require("viewer_id", viewer_id)?;
        let ids: BTreeSet<String> = self
            .store
            .query_by_viewer(viewer_id)
            .await?
            .into_iter()
            .map(|a| a.remote_id)
            .collect();
        Ok(ids.into_iter().collect())
    }

    /// Viewers authorized for a remote identity, sorted and de-duplicated.
    pub async fn list_viewers_for(&self, remote_id: &str) -> AccessResult<Vec<String>> {
        require("remote_id", remote_id)?;
        let ids: BTreeSet<String> = self
            .store
            .query_by_remote(remote_id)
            .await?
            .into_iter()
            .map(|a| a.viewer_id)
            .collect();
        Ok(ids.into_iter().collect())
    }

    /// Case-insensitive substring search over viewer email, name and identity.
    ///
    /// Discovery aid only. Not an authorization check.
    pub async fn search_viewers(&self, query: &str) -> AccessResult<Vec<ViewerProfile>> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }

        let matches = self
            .directory
            .list_viewers()
            .await?
            .into_iter()
            .filter(|v| {
                v.email.to_lowercase().contains(&needle)
                    || v.identity.to_lowercase().contains(&needle)
                    || v
                        .display_name
                        .as_deref()
                        .is_some_and(|n| n.to_lowercase().contains(&needle))
            })
            .collect();
        Ok(matches)
    }

    /// Exact (trimmed, case-insensitive) email lookup.
    pub async fn viewer_for_email(&self, email: &str) -> AccessResult<Option<ViewerProfile>> {
        let wanted = email.trim().to_lowercase();
        if wanted.is_empty() {
            return Err(AccessError::InvalidArgument("email is empty".to_string()));
        }

        Ok(self
            .directory
            .list_viewers()
            .await?
            .into_iter()
            .find(|v| v.email.trim().to_lowercase() == wanted))
    }

    pub async fn assign_by_email(
        &self,
        remote_id: &str,
        email: &str,
        assigned_by: &str,
    ) -> AccessResult<AssignOutcome> {
        let viewer = self
            .viewer_for_email(email)
            .await?
            .ok_or_else(|| AccessError::ViewerNotFound(email.trim().to_string()))?;
        self.assign(remote_id, &viewer.identity, assigned_by).await
    }

    /// Turn authorization ids found on a legacy profile into assignments,
    /// assigned by the viewer itself. Returns the number created.
    pub async fn import_legacy(&self, viewer_id: &str, remote_ids: &[String]) -> AccessResult<usize> {
        let mut created = 0;
        for remote_id in remote_ids.iter().filter(|id| !id.trim().is_empty()) {
            match self.assign(remote_id, viewer_id, viewer_id).await {
                Ok(AssignOutcome::Created) => created += 1,
                Ok(AssignOutcome::AlreadyAssigned) => {}
                Err(e) => {
                    warn!(viewer_id, remote_id = %remote_id, error = %e, "Legacy import failed");
                    return Err(e);
                }
            }
        }
        if created > 0 {
            info!(viewer_id, created, "Imported legacy authorizations");
        }
        Ok(created)
    }
}

fn require(name: &str, value: &str) -> AccessResult<()> {
    if value.trim().is_empty() {
        return Err(AccessError::InvalidArgument(format!("{} is empty", name)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryAssignmentStore, MemoryViewerDirectory};

    fn profile(identity: &str, email: &str, name: Option<&str>) -> ViewerProfile {
        ViewerProfile {
            identity: identity.to_string(),
            email: email.to_string(),
            display_name: name.map(str::to_string),
        }
    }

    fn service() -> (AccessMappingService, Arc<MemoryAssignmentStore>) {
        let store = Arc::new(MemoryAssignmentStore::new());
        let directory = Arc::new(MemoryViewerDirectory::new(vec![
            profile("viewer-1", "Nurse.Ana@clinic.org", Some("Ana")),
            profile("viewer-2", "bob@clinic.org", None),
        ]));
        (AccessMappingService::new(store.clone(), directory), store)
    }

    // =========================================================================
    // Assign / unassign
    // =========================================================================

    #[tokio::test]
    async fn test_assign_is_idempotent() {
        let (svc, store) = service();
        assert_eq!(
            svc.assign("s1", "viewer-1", "admin").await.unwrap(),
            AssignOutcome::Created
        );
        assert_eq!(
            svc.assign("s1", "viewer-1", "admin").await.unwrap(),
            AssignOutcome::AlreadyAssigned
        );
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_assign_rejects_empty_ids() {
        let (svc, _) = service();
        assert!(matches!(
            svc.assign("", "viewer-1", "admin").await,
            Err(AccessError::InvalidArgument(_))
        ));
        assert!(matches!(
            svc.assign("s1", "  ", "admin").await,
            Err(AccessError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_unassign_is_visible_immediately() {
        let (svc, _) = service();
        svc.assign("s1", "viewer-1", "admin").await.unwrap();
        svc.assign("s2", "viewer-1", "admin").await.unwrap();

        assert!(svc.unassign("s1", "viewer-1").await.unwrap());
        assert!(!svc.unassign("s1", "viewer-1").await.unwrap());
        assert_eq!(svc.list_remote_ids_for("viewer-1").await.unwrap(), vec!["s2"]);
    }

    #[tokio::test]
    async fn test_unassign_all_removes_every_viewer() {
        let (svc, store) = service();
        svc.assign("s1", "viewer-1", "admin").await.unwrap();
        svc.assign("s1", "viewer-2", "admin").await.unwrap();
        svc.assign("s2", "viewer-2", "admin").await.unwrap();

        assert_eq!(svc.unassign_all("s1").await.unwrap(), 2);
        assert!(svc.list_viewers_for("s1").await.unwrap().is_empty());
        assert_eq!(store.len().await, 1);
        assert_eq!(svc.unassign_all("s1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_lookups_are_sorted() {
        let (svc, _) = service();
        svc.assign("s2", "viewer-1", "admin").await.unwrap();
        svc.assign("s1", "viewer-1", "admin").await.unwrap();
        svc.assign("s1", "viewer-2", "admin").await.unwrap();

        assert_eq!(
            svc.list_remote_ids_for("viewer-1").await.unwrap(),
            vec!["s1", "s2"]
        );
        assert_eq!(
            svc.list_viewers_for("s1").await.unwrap(),
            vec!["viewer-1", "viewer-2"]
        );
    }

    #[tokio::test]
    async fn test_backend_failure_propagates() {
        let (svc, store) = service();
        store.set_unavailable(true);
        assert!(matches!(
            svc.list_remote_ids_for("viewer-1").await,
            Err(AccessError::Backend(_))
        ));
    }

    // =========================================================================
    // Discovery
    // =========================================================================

    #[tokio::test]
    async fn test_search_is_case_insensitive_substring() {
        let (svc, _) = service();
        let hits = svc.search_viewers("NURSE").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].identity, "viewer-1");

        assert_eq!(svc.search_viewers("clinic").await.unwrap().len(), 2);
        assert_eq!(svc.search_viewers("ana").await.unwrap().len(), 1);
        assert!(svc.search_viewers("   ").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_assign_by_email_exact_match() {
        let (svc, _) = service();
        let outcome = svc
            .assign_by_email("s1", "  nurse.ana@CLINIC.org ", "admin")
            .await
            .unwrap();
        assert_eq!(outcome, AssignOutcome::Created);
        assert_eq!(svc.list_viewers_for("s1").await.unwrap(), vec!["viewer-1"]);

        let err = svc.assign_by_email("s1", "ana@clinic", "admin").await.unwrap_err();
        assert_eq!(err, AccessError::ViewerNotFound("ana@clinic".to_string()));
    }

    #[tokio::test]
    async fn test_import_legacy_skips_existing_and_blank() {
        let (svc, _) = service();
        svc.assign("s1", "viewer-1", "admin").await.unwrap();

        let ids = vec!["s1".to_string(), "s2".to_string(), "".to_string()];
        assert_eq!(svc.import_legacy("viewer-1", &ids).await.unwrap(), 1);
        assert_eq!(
            svc.list_remote_ids_for("viewer-1").await.unwrap(),
            vec!["s1", "s2"]
        );
    }
}
