//! Session resolver: identity, roles and authorized remote ids.
//!
//! The resolver owns the single `SessionState` snapshot the pipelines read.
//! Pipelines must treat an unloaded snapshot as "not ready" and never guess
//! a role; [`SessionResolver::wait_ready`] is the gate they wait on.

use std::sync::{Arc, Mutex};

use access_mapping::AccessMappingService;
use serde::Serialize;
use tokio::sync::{watch, Mutex as AsyncMutex, RwLock};
use tracing::{debug, info, warn};

use crate::profile::{decode_profile, Role};
use crate::session_fsm::{SessionMachine, SessionMachineInput, SessionPhase};
use crate::{IdentityProvider, ProfileStore, RolePreferenceStore, SessionError, SessionResult};

/// Loaded identity, roles and viewer authorization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionState {
    pub identity: Option<String>,
    pub roles: Vec<Role>,
    pub selected_role: Option<Role>,
    pub authorized_remote_ids: Vec<String>,
    pub loaded: bool,
}

impl SessionState {
    /// Role the pipelines should run: the selected role, or the first role
    /// when none was selected. `None` while unloaded or without roles.
    pub fn effective_role(&self) -> Option<Role> {
        if !self.loaded {
            return None;
        }
        self.selected_role
            .filter(|r| self.roles.contains(r))
            .or_else(|| self.roles.first().copied())
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}

/// Loads and holds the session snapshot.
pub struct SessionResolver {
    identity: Arc<dyn IdentityProvider>,
    profiles: Arc<dyn ProfileStore>,
    preferences: Arc<dyn RolePreferenceStore>,
    access: AccessMappingService,
    fsm: Mutex<SessionMachine>,
    state: RwLock<SessionState>,
    /// Serializes loads so the FSM never sees two in flight.
    load_lock: AsyncMutex<()>,
    ready_tx: watch::Sender<bool>,
}

impl SessionResolver {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        profiles: Arc<dyn ProfileStore>,
        preferences: Arc<dyn RolePreferenceStore>,
        access: AccessMappingService,
    ) -> Self {
        let (ready_tx, _) = watch::channel(false);
        Self {
            identity,
            profiles,
            preferences,
            access,
            fsm: Mutex::new(SessionMachine::new()),
            state: RwLock::new(SessionState::default()),
            load_lock: AsyncMutex::new(()),
            ready_tx,
        }
    }

    pub fn access(&self) -> &AccessMappingService {
        &self.access
    }

    /// Identity currently signed in, whether or not the session is loaded.
    pub fn current_identity(&self) -> Option<String> {
        self.identity.current_identity()
    }

    pub fn phase(&self) -> SessionPhase {
        SessionPhase::from(self.fsm.lock().expect("lock poisoned").state())
    }

    pub async fn snapshot(&self) -> SessionState {
        self.state.read().await.clone()
    }

    pub async fn is_loaded(&self) -> bool {
        self.state.read().await.loaded
    }

    /// Load the session, returning the existing snapshot when it is already
    /// loaded for the signed-in identity.
    pub async fn load_session(&self) -> SessionResult<SessionState> {
        {
            let state = self.state.read().await;
            if state.loaded && state.identity == self.identity.current_identity() {
                return Ok(state.clone());
            }
        }
        self.fetch_session().await
    }

    /// Force a fresh fetch of profile and authorization.
    pub async fn reload_session(&self) -> SessionResult<SessionState> {
        self.fetch_session().await
    }

    async fn fetch_session(&self) -> SessionResult<SessionState> {
        let _guard = self.load_lock.lock().await;

        let identity = self
            .identity
            .current_identity()
            .ok_or(SessionError::NotAuthenticated)?;

        let start = if self.phase().has_snapshot() {
            SessionMachineInput::Reload
        } else {
            SessionMachineInput::Load
        };
        self.transition(&start)?;

        match self.resolve(&identity).await {
            Ok(state) => {
                *self.state.write().await = state.clone();
                self.transition(&SessionMachineInput::LoadSucceeded)?;
                self.ready_tx.send_replace(true);
                info!(
                    identity = %identity,
                    roles = ?state.roles,
                    selected_role = ?state.selected_role,
                    authorized = state.authorized_remote_ids.len(),
                    "Session loaded"
                );
                Ok(state)
            }
            Err(e) => {
                warn!(identity = %identity, error = %e, "Session load failed");
                self.transition(&SessionMachineInput::LoadFailed)?;
                Err(e)
            }
        }
    }

    async fn resolve(&self, identity: &str) -> SessionResult<SessionState> {
        let profile = self
            .profiles
            .fetch_profile(identity)
            .await?
            .ok_or(SessionError::ProfileMissing)?;
        let decoded = decode_profile(&profile);
        let roles = decoded.roles;

        let authorized_remote_ids = if roles.contains(&Role::Viewer) {
            let mut ids = self.access.list_remote_ids_for(identity).await?;
            if ids.is_empty() && !decoded.legacy_remote_ids.is_empty() {
                self.access
                    .import_legacy(identity, &decoded.legacy_remote_ids)
                    .await?;
                ids = self.access.list_remote_ids_for(identity).await?;
            }
            ids
        } else {
            Vec::new()
        };

        // An existing choice for the same identity survives reloads, even if
        // the profile now lists roles in another order.
        let previous = {
            let state = self.state.read().await;
            if state.identity.as_deref() == Some(identity) {
                state.selected_role
            } else {
                None
            }
        };

        let selected_role = match previous.filter(|r| roles.contains(r)) {
            Some(role) => Some(role),
            None => {
                let preferred = match self.preferences.load(identity).await {
                    Ok(pref) => pref.filter(|r| roles.contains(r)),
                    Err(e) => {
                        warn!(identity, error = %e, "Could not read role preference");
                        None
                    }
                };
                preferred.or_else(|| roles.first().copied())
            }
        };

        Ok(SessionState {
            identity: Some(identity.to_string()),
            roles,
            selected_role,
            authorized_remote_ids,
            loaded: true,
        })
    }

    /// Authorized remote ids for a viewer, straight from the assignment collection.
    pub async fn fetch_authorized_remote_ids(&self, viewer_id: &str) -> SessionResult<Vec<String>> {
        Ok(self.access.list_remote_ids_for(viewer_id).await?)
    }

    /// Re-read the signed-in viewer's authorization into the snapshot.
    /// Returns the fresh list.
    pub async fn refresh_authorization(&self) -> SessionResult<Vec<String>> {
        let identity = {
            let state = self.state.read().await;
            if !state.loaded {
                return Err(SessionError::NotLoaded);
            }
            state.identity.clone().ok_or(SessionError::NotAuthenticated)?
        };

        let ids = self.fetch_authorized_remote_ids(&identity).await?;
        let mut state = self.state.write().await;
        if state.identity.as_deref() == Some(identity.as_str()) {
            state.authorized_remote_ids = ids.clone();
        }
        debug!(identity = %identity, authorized = ids.len(), "Authorization refreshed");
        Ok(ids)
    }

    /// Explicitly choose a role. It must be one the identity holds; the choice
    /// is persisted so the next start restores it.
    pub async fn select_role(&self, role: Role) -> SessionResult<SessionState> {
        let snapshot = {
            let mut state = self.state.write().await;
            if !state.loaded {
                return Err(SessionError::NotLoaded);
            }
            if !state.roles.contains(&role) {
                return Err(SessionError::RoleNotHeld(role.to_string()));
            }
            state.selected_role = Some(role);
            state.clone()
        };

        if let Some(identity) = snapshot.identity.as_deref() {
            if let Err(e) = self.preferences.save(identity, role).await {
                warn!(identity, role = %role, error = %e, "Could not persist role preference");
            }
        }
        info!(role = %role, "Role selected");
        Ok(snapshot)
    }

    /// Wait until a session snapshot is loaded, then return it.
    pub async fn wait_ready(&self) -> SessionState {
        let mut rx = self.ready_tx.subscribe();
        // The sender lives as long as self, so this only returns once ready.
        let _ = rx.wait_for(|ready| *ready).await;
        self.snapshot().await
    }

    /// Clear the snapshot. The persisted role preference is kept so the same
    /// role comes back at the next sign-in.
    pub async fn sign_out(&self) -> SessionResult<()> {
        let _guard = self.load_lock.lock().await;
        self.transition(&SessionMachineInput::SignOut)?;
        *self.state.write().await = SessionState::default();
        self.ready_tx.send_replace(false);
        info!("Session cleared");
        Ok(())
    }

    fn transition(&self, input: &SessionMachineInput) -> SessionResult<SessionPhase> {
        let mut fsm = self.fsm.lock().expect("lock poisoned");
        let old_phase = SessionPhase::from(fsm.state());

        fsm.consume(input).map_err(|_| {
            SessionError::InvalidStateTransition(format!(
                "Cannot apply {:?} in state {:?}",
                input,
                fsm.state()
            ))
        })?;

        let new_phase = SessionPhase::from(fsm.state());
        if old_phase != new_phase {
            debug!(old_state = ?old_phase, new_state = ?new_phase, "Session state transition");
        }
        Ok(new_phase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryPreferences, MemoryProfileStore, StaticIdentity};
    use access_mapping::{MemoryAssignmentStore, MemoryViewerDirectory};
    use serde_json::json;

    struct Fixture {
        identity: Arc<StaticIdentity>,
        profiles: Arc<MemoryProfileStore>,
        preferences: Arc<MemoryPreferences>,
        assignments: Arc<MemoryAssignmentStore>,
        resolver: SessionResolver,
    }

    fn fixture(identity: Option<&str>) -> Fixture {
        let identity = Arc::new(StaticIdentity::new(identity.map(str::to_string)));
        let profiles = Arc::new(MemoryProfileStore::new());
        let preferences = Arc::new(MemoryPreferences::new());
        let assignments = Arc::new(MemoryAssignmentStore::new());
        let access = AccessMappingService::new(
            assignments.clone(),
            Arc::new(MemoryViewerDirectory::default()),
        );
        let resolver = SessionResolver::new(
            identity.clone(),
            profiles.clone(),
            preferences.clone(),
            access,
        );
        Fixture {
            identity,
            profiles,
            preferences,
            assignments,
            resolver,
        }
    }

    // =========================================================================
    // Loading
    // =========================================================================

    #[tokio::test]
    async fn test_load_without_identity_fails() {
        let f = fixture(None);
        let err = f.resolver.load_session().await.unwrap_err();
        assert!(matches!(err, SessionError::NotAuthenticated));
        assert_eq!(f.resolver.phase(), SessionPhase::Unloaded);
    }

    #[tokio::test]
    async fn test_missing_profile() {
        let f = fixture(Some("user-1"));
        let err = f.resolver.load_session().await.unwrap_err();
        assert!(matches!(err, SessionError::ProfileMissing));
        assert!(!f.resolver.is_loaded().await);
        assert_eq!(f.resolver.phase(), SessionPhase::Unloaded);
    }

    #[tokio::test]
    async fn test_transient_failure_can_retry() {
        let f = fixture(Some("user-1"));
        f.profiles.put("user-1", json!({ "roles": ["collector"] })).await;
        f.profiles.set_unavailable(true);

        let err = f.resolver.load_session().await.unwrap_err();
        assert!(err.is_transient());

        f.profiles.set_unavailable(false);
        let state = f.resolver.load_session().await.unwrap();
        assert!(state.loaded);
        assert_eq!(state.effective_role(), Some(Role::Collector));
    }

    #[tokio::test]
    async fn test_unset_role_defaults_to_first() {
        let f = fixture(Some("user-1"));
        f.profiles
            .put("user-1", json!({ "roles": ["collector", "viewer"] }))
            .await;

        let state = f.resolver.load_session().await.unwrap();
        assert_eq!(state.selected_role, Some(Role::Collector));
    }

    #[tokio::test]
    async fn test_reload_keeps_explicit_selection() {
        let f = fixture(Some("user-1"));
        f.profiles
            .put("user-1", json!({ "roles": ["collector", "viewer"] }))
            .await;
        f.resolver.load_session().await.unwrap();
        f.resolver.select_role(Role::Viewer).await.unwrap();

        let state = f.resolver.reload_session().await.unwrap();
        assert_eq!(state.selected_role, Some(Role::Viewer));
        assert_eq!(state.roles, vec![Role::Collector, Role::Viewer]);
    }

    #[tokio::test]
    async fn test_selection_dropped_when_role_revoked() {
        let f = fixture(Some("user-1"));
        f.profiles
            .put("user-1", json!({ "roles": ["collector", "viewer"] }))
            .await;
        f.resolver.load_session().await.unwrap();
        f.resolver.select_role(Role::Viewer).await.unwrap();

        f.profiles.put("user-1", json!({ "roles": ["collector"] })).await;
        let state = f.resolver.reload_session().await.unwrap();
        assert_eq!(state.selected_role, Some(Role::Collector));
    }

    #[tokio::test]
    async fn test_persisted_preference_restored() {
        let f = fixture(Some("user-1"));
        f.profiles
            .put("user-1", json!({ "roles": ["collector", "viewer"] }))
            .await;
        f.preferences.save("user-1", Role::Viewer).await.unwrap();

        let state = f.resolver.load_session().await.unwrap();
        assert_eq!(state.selected_role, Some(Role::Viewer));
    }

    #[tokio::test]
    async fn test_no_known_roles_means_no_pipeline() {
        let f = fixture(Some("user-1"));
        f.profiles.put("user-1", json!({ "roles": ["admin"] })).await;

        let state = f.resolver.load_session().await.unwrap();
        assert!(state.loaded);
        assert_eq!(state.effective_role(), None);
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_snapshot() {
        let f = fixture(Some("user-1"));
        f.profiles.put("user-1", json!({ "roles": ["viewer"] })).await;
        f.resolver.load_session().await.unwrap();

        f.profiles.set_unavailable(true);
        assert!(f.resolver.reload_session().await.is_err());
        assert_eq!(f.resolver.phase(), SessionPhase::Loaded);
        assert!(f.resolver.is_loaded().await);
    }

    // =========================================================================
    // Authorization
    // =========================================================================

    #[tokio::test]
    async fn test_viewer_authorization_from_assignments() {
        let f = fixture(Some("viewer-1"));
        f.profiles.put("viewer-1", json!({ "roles": ["viewer"] })).await;
        f.resolver
            .access()
            .assign("s2", "viewer-1", "admin")
            .await
            .unwrap();
        f.resolver
            .access()
            .assign("s1", "viewer-1", "admin")
            .await
            .unwrap();

        let state = f.resolver.load_session().await.unwrap();
        assert_eq!(state.authorized_remote_ids, vec!["s1", "s2"]);
    }

    #[tokio::test]
    async fn test_legacy_ids_imported_once() {
        let f = fixture(Some("viewer-1"));
        f.profiles
            .put(
                "viewer-1",
                json!({ "role": "supervisor", "supervisedSensorIds": ["s1", "s2"] }),
            )
            .await;

        let state = f.resolver.load_session().await.unwrap();
        assert_eq!(state.authorized_remote_ids, vec!["s1", "s2"]);
        assert_eq!(f.assignments.len().await, 2);

        // Once assignments exist they are the only source.
        f.resolver.access().unassign("s2", "viewer-1").await.unwrap();
        let state = f.resolver.reload_session().await.unwrap();
        assert_eq!(state.authorized_remote_ids, vec!["s1"]);
    }

    #[tokio::test]
    async fn test_collector_has_no_authorized_ids() {
        let f = fixture(Some("user-1"));
        f.profiles
            .put(
                "user-1",
                json!({ "roles": ["collector"], "supervisedSensorIds": ["s1"] }),
            )
            .await;

        let state = f.resolver.load_session().await.unwrap();
        assert!(state.authorized_remote_ids.is_empty());
        assert!(f.assignments.is_empty().await);
    }

    #[tokio::test]
    async fn test_refresh_authorization_updates_snapshot() {
        let f = fixture(Some("viewer-1"));
        f.profiles.put("viewer-1", json!({ "roles": ["viewer"] })).await;
        f.resolver.load_session().await.unwrap();

        f.resolver
            .access()
            .assign("s9", "viewer-1", "admin")
            .await
            .unwrap();
        assert_eq!(f.resolver.refresh_authorization().await.unwrap(), vec!["s9"]);
        assert_eq!(f.resolver.snapshot().await.authorized_remote_ids, vec!["s9"]);
    }

    // =========================================================================
    // Role selection and sign-out
    // =========================================================================

    #[tokio::test]
    async fn test_select_role_requires_membership() {
        let f = fixture(Some("user-1"));
        f.profiles.put("user-1", json!({ "roles": ["collector"] })).await;

        assert!(matches!(
            f.resolver.select_role(Role::Collector).await,
            Err(SessionError::NotLoaded)
        ));

        f.resolver.load_session().await.unwrap();
        assert!(matches!(
            f.resolver.select_role(Role::Viewer).await,
            Err(SessionError::RoleNotHeld(_))
        ));
    }

    #[tokio::test]
    async fn test_select_role_persists_preference() {
        let f = fixture(Some("user-1"));
        f.profiles
            .put("user-1", json!({ "roles": ["collector", "viewer"] }))
            .await;
        f.resolver.load_session().await.unwrap();
        f.resolver.select_role(Role::Viewer).await.unwrap();

        assert_eq!(
            f.preferences.load("user-1").await.unwrap(),
            Some(Role::Viewer)
        );
    }

    #[tokio::test]
    async fn test_wait_ready_resolves_after_load() {
        let f = Arc::new(fixture(Some("user-1")));
        f.profiles.put("user-1", json!({ "roles": ["viewer"] })).await;

        let waiter = {
            let f = f.clone();
            tokio::spawn(async move { f.resolver.wait_ready().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        f.resolver.load_session().await.unwrap();
        let state = waiter.await.unwrap();
        assert!(state.loaded);
    }

    #[tokio::test]
    async fn test_sign_out_clears_snapshot() {
        let f = fixture(Some("user-1"));
        f.profiles.put("user-1", json!({ "roles": ["collector"] })).await;
        f.resolver.load_session().await.unwrap();

        f.identity.sign_out();
        f.resolver.sign_out().await.unwrap();
        assert_eq!(f.resolver.snapshot().await, SessionState::default());
        assert_eq!(f.resolver.phase(), SessionPhase::Unloaded);
        assert!(matches!(
            f.resolver.load_session().await,
            Err(SessionError::NotAuthenticated)
        ));
    }

    #[tokio::test]
    async fn test_identity_switch_resets_selection() {
        let f = fixture(Some("user-1"));
        f.profiles
            .put("user-1", json!({ "roles": ["collector", "viewer"] }))
            .await;
        f.profiles
            .put("user-2", json!({ "roles": ["collector", "viewer"] }))
            .await;
        f.resolver.load_session().await.unwrap();
        f.resolver.select_role(Role::Viewer).await.unwrap();

        f.identity.sign_in("user-2");
        let state = f.resolver.load_session().await.unwrap();
        assert_eq!(state.identity.as_deref(), Some("user-2"));
        assert_eq!(state.selected_role, Some(Role::Collector));
    }
}
