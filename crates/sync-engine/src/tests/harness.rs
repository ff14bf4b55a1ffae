//! Test harness wiring a full orchestrator against in-memory collaborators.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use access_mapping::{AccessMappingService, MemoryAssignmentStore, MemoryViewerDirectory};
use async_trait::async_trait;
use chrono::Utc;
use reading_store::{LocalStoreHandle, Reading, SqliteReadingStore};
use sensor_inventory::{MemorySensorDirectory, SensorInventoryService};
use serde_json::{json, Value};
use session_resolver::{MemoryPreferences, MemoryProfileStore, SessionResolver, StaticIdentity};

use crate::{
    ChangeStream, ConnectivityMonitor, FallNotifier, MemoryRemoteStore, Page, RemoteDocument,
    RemoteFilter, RemoteQuery, RemoteResult, RemoteStore, SyncConfig, SyncOrchestrator,
    ViewerContext,
};

pub const STANDING: &str = "0xAB3311";
pub const FALLING: &str = "0xEF0112";

/// Records every fall notification.
#[derive(Default)]
pub struct RecordingNotifier {
    calls: Mutex<Vec<(String, String, String)>>,
}

impl RecordingNotifier {
    pub fn calls(&self) -> Vec<(String, String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

impl FallNotifier for RecordingNotifier {
    fn notify_fall(&self, viewer: &ViewerContext, who: &str, message: &str) {
        self.calls.lock().unwrap().push((
            viewer.viewer_id.clone(),
            who.to_string(),
            message.to_string(),
        ));
    }
}

pub fn collector_profile() -> Value {
    json!({ "roles": ["collector"] })
}

pub fn viewer_profile() -> Value {
    json!({ "roles": ["viewer"] })
}

pub fn dual_profile() -> Value {
    json!({ "roles": ["collector", "viewer"] })
}

/// A reading from sensor `sensor` owned by `owner`.
pub fn reading(owner: &str, sensor: &str, timestamp: i64, payload: &str) -> Reading {
    Reading::new("AA:BB:CC:DD:EE:FF", sensor, timestamp, payload, owner)
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Config with a small queue and a sweep that never fires during a test.
pub fn test_config() -> SyncConfig {
    let mut config = SyncConfig::default();
    config.queue.capacity = 3;
    config.queue.max_retries = 2;
    config.write.batch_size = 10;
    config.backfill.page_size = 2;
    config.queue_retry_interval = Duration::from_secs(3600);
    config
}

/// Remote store whose subscribe handshake takes `delay`, so a start can be
/// observed while it is still in flight.
pub struct SlowSubscribe {
    inner: Arc<MemoryRemoteStore>,
    delay: Duration,
}

impl SlowSubscribe {
    pub fn new(inner: Arc<MemoryRemoteStore>, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl RemoteStore for SlowSubscribe {
    async fn set(&self, id: &str, doc: &RemoteDocument) -> RemoteResult<()> {
        self.inner.set(id, doc).await
    }

    async fn batch_set(&self, docs: &[(String, RemoteDocument)]) -> RemoteResult<()> {
        self.inner.batch_set(docs).await
    }

    async fn get(&self, id: &str) -> RemoteResult<Option<RemoteDocument>> {
        self.inner.get(id).await
    }

    async fn query(&self, query: &RemoteQuery) -> RemoteResult<Page> {
        self.inner.query(query).await
    }

    async fn count(&self, filter: &RemoteFilter) -> RemoteResult<usize> {
        self.inner.count(filter).await
    }

    async fn subscribe(&self, filter: &RemoteFilter) -> RemoteResult<ChangeStream> {
        tokio::time::sleep(self.delay).await;
        self.inner.subscribe(filter).await
    }
}

/// Write readings straight into the remote store, as another device would.
pub async fn seed_remote(remote: &MemoryRemoteStore, uploader: &str, readings: &[Reading]) {
    let docs: Vec<(String, RemoteDocument)> = readings
        .iter()
        .map(|r| {
            let doc = RemoteDocument::from_reading(r, uploader, now_ms());
            (doc.id(), doc)
        })
        .collect();
    remote.batch_set(&docs).await.unwrap();
}

pub struct TestHarness {
    pub identity: Arc<StaticIdentity>,
    pub profiles: Arc<MemoryProfileStore>,
    pub access: AccessMappingService,
    pub remote: Arc<MemoryRemoteStore>,
    pub local: LocalStoreHandle,
    /// Sensor directory shared by every harness built on the same remote.
    pub sensors: Arc<MemorySensorDirectory>,
    pub connectivity: Arc<ConnectivityMonitor>,
    pub notifier: Arc<RecordingNotifier>,
    pub orchestrator: Arc<SyncOrchestrator>,
}

impl TestHarness {
    pub async fn new(identity: &str, profile: Value, online: bool) -> Self {
        Self::with_remote(
            Arc::new(MemoryRemoteStore::new()),
            identity,
            profile,
            online,
            test_config(),
        )
        .await
    }

    /// A second device sharing `remote` with another harness. Its sensor
    /// directory is its own; use [`with_shared`](Self::with_shared) to share one.
    pub async fn with_remote(
        remote: Arc<MemoryRemoteStore>,
        identity: &str,
        profile: Value,
        online: bool,
        config: SyncConfig,
    ) -> Self {
        Self::with_shared(
            remote,
            Arc::new(MemorySensorDirectory::new()),
            identity,
            profile,
            online,
            config,
        )
        .await
    }

    pub async fn with_shared(
        remote: Arc<MemoryRemoteStore>,
        sensors: Arc<MemorySensorDirectory>,
        identity: &str,
        profile: Value,
        online: bool,
        config: SyncConfig,
    ) -> Self {
        let store: Arc<dyn RemoteStore> = remote.clone();
        Self::build(remote, store, sensors, identity, profile, online, config).await
    }

    /// A harness whose orchestrator subscribes through [`SlowSubscribe`].
    pub async fn slow_subscribe(identity: &str, profile: Value, delay: Duration) -> Self {
        let remote = Arc::new(MemoryRemoteStore::new());
        let store: Arc<dyn RemoteStore> = Arc::new(SlowSubscribe::new(remote.clone(), delay));
        Self::build(
            remote,
            store,
            Arc::new(MemorySensorDirectory::new()),
            identity,
            profile,
            true,
            test_config(),
        )
        .await
    }

    async fn build(
        remote: Arc<MemoryRemoteStore>,
        store: Arc<dyn RemoteStore>,
        sensors: Arc<MemorySensorDirectory>,
        identity: &str,
        profile: Value,
        online: bool,
        config: SyncConfig,
    ) -> Self {
        let identity_provider = Arc::new(StaticIdentity::signed_in(identity));
        let profiles = Arc::new(MemoryProfileStore::new());
        profiles.put(identity, profile).await;
        let access = AccessMappingService::new(
            Arc::new(MemoryAssignmentStore::new()),
            Arc::new(MemoryViewerDirectory::new(Vec::new())),
        );
        let session = Arc::new(SessionResolver::new(
            identity_provider.clone(),
            profiles.clone(),
            Arc::new(MemoryPreferences::new()),
            access.clone(),
        ));
        let sqlite = Arc::new(SqliteReadingStore::open_in_memory().await.unwrap());
        let local: LocalStoreHandle = sqlite.clone();
        let inventory = Arc::new(SensorInventoryService::new(sensors.clone(), sqlite));
        let connectivity = Arc::new(ConnectivityMonitor::new(online));
        let notifier = Arc::new(RecordingNotifier::default());
        let orchestrator = Arc::new(SyncOrchestrator::new(
            session,
            connectivity.clone(),
            local.clone(),
            store,
            inventory,
            notifier.clone(),
            config,
        ));

        Self {
            identity: identity_provider,
            profiles,
            access,
            remote,
            local,
            sensors,
            connectivity,
            notifier,
            orchestrator,
        }
    }

    /// Authorize `viewer` for `remote_id`.
    pub async fn assign(&self, remote_id: &str, viewer: &str) {
        self.access.assign(remote_id, viewer, viewer).await.unwrap();
    }

    /// Flip connectivity and run the matching handler, as the worker would.
    pub async fn go_online(&self) {
        self.connectivity.set_online(true);
        self.orchestrator.handle_connectivity_restored().await;
    }

    pub async fn go_offline(&self) {
        self.connectivity.set_online(false);
        self.orchestrator.handle_connectivity_lost().await;
    }

    pub async fn local_count(&self, owner: &str) -> usize {
        self.local.count_for_owner(owner).await.unwrap()
    }

    /// Poll until `owner` has `expected` local rows.
    pub async fn wait_for_rows(&self, owner: &str, expected: usize) {
        for _ in 0..200 {
            if self.local_count(owner).await == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(self.local_count(owner).await, expected, "rows for {}", owner);
    }

    /// Poll until the active mirror set equals `expected`.
    pub async fn wait_for_mirrors(&self, expected: &[&str]) {
        for _ in 0..200 {
            if self.orchestrator.active_mirrors() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(self.orchestrator.active_mirrors(), expected);
    }
}
