//! Mirror subscription manager.
//!
//! One live subscription per remote identity. Per identity the lifecycle is
//! `Idle -> Starting -> Active -> Idle`: a start first claims the id in the
//! `starting` set, so a second start during the subscribe handshake is
//! refused, and only then moves it into `active`. Both collections sit
//! behind one mutex scoped to the table; no await happens while it is held.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use reading_store::{LocalStoreHandle, Reading};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::remote::{ChangeBatch, ChangeKind, ChangeStream, RemoteFilter, RemoteStore};
use crate::{EventBus, FallNotifier, SyncError, SyncEvent, SyncResult, ViewerContext};

#[derive(Debug, Clone)]
pub struct MirrorConfig {
    /// Mirrored falls younger than this (by their own timestamp) notify the viewer.
    pub fall_alert_window: Duration,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            fall_alert_window: Duration::from_secs(15 * 60),
        }
    }
}

/// Result of [`MirrorManager::start_mirror`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorStart {
    Started,
    AlreadyActive,
    AlreadyStarting,
    /// Stopped while the subscription handshake was in flight.
    Cancelled,
}

/// What one change batch did to the local store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub inserted: usize,
    pub skipped: usize,
    pub falls_notified: usize,
}

struct MirrorSubscription {
    id: Uuid,
    started_at: DateTime<Utc>,
    cancel: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct MirrorTable {
    active: HashMap<String, MirrorSubscription>,
    starting: HashSet<String>,
}

/// Applies change batches for one remote identity.
#[derive(Clone)]
struct Applier {
    local: LocalStoreHandle,
    notifier: Arc<dyn FallNotifier>,
    viewer: Arc<RwLock<Option<ViewerContext>>>,
    events: EventBus,
    fall_window_ms: i64,
}

impl Applier {
    async fn apply(&self, remote_id: &str, batch: &ChangeBatch) -> SyncResult<ApplyOutcome> {
        let mut outcome = ApplyOutcome::default();
        let mut staged: Vec<Reading> = Vec::new();
        let mut staged_keys = HashSet::new();

        for change in &batch.changes {
            // Readings are facts; a remote removal never deletes local rows.
            if change.kind == ChangeKind::Removed {
                continue;
            }
            let reading = change.document.to_reading(remote_id);
            let key = (
                reading.source_address.clone(),
                reading.timestamp,
                reading.payload.clone(),
            );
            let exists = self
                .local
                .exists_exact(
                    &reading.owner_id,
                    &reading.source_address,
                    reading.timestamp,
                    &reading.payload,
                )
                .await
                .map_err(SyncError::local_read)?;
            if exists || !staged_keys.insert(key) {
                outcome.skipped += 1;
                continue;
            }
            staged.push(reading);
        }

        if staged.is_empty() {
            return Ok(outcome);
        }
        outcome.inserted = self.local.insert_all(&staged).await?;

        let now_ms = Utc::now().timestamp_millis();
        let viewer = self.viewer.read().expect("lock poisoned").clone();
        for reading in staged.iter().filter(|r| r.is_fall()) {
            if now_ms - reading.timestamp > self.fall_window_ms {
                continue;
            }
            self.events.publish(SyncEvent::FallAlert {
                remote_id: remote_id.to_string(),
                timestamp: reading.timestamp,
            });
            if let Some(viewer) = &viewer {
                self.notifier.notify_fall(
                    viewer,
                    remote_id,
                    &format!("Fall detected for {}", remote_id),
                );
                outcome.falls_notified += 1;
            }
        }

        self.events.publish(SyncEvent::MirrorApplied {
            remote_id: remote_id.to_string(),
            inserted: outcome.inserted,
        });
        debug!(
            remote_id,
            inserted = outcome.inserted,
            skipped = outcome.skipped,
            from_cache = batch.from_cache,
            "Mirror batch applied"
        );
        Ok(outcome)
    }
}

/// Owns the live subscriptions of the viewer pipeline.
pub struct MirrorManager {
    remote: Arc<dyn RemoteStore>,
    applier: Applier,
    events: EventBus,
    table: Arc<Mutex<MirrorTable>>,
}

impl MirrorManager {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        local: LocalStoreHandle,
        notifier: Arc<dyn FallNotifier>,
        events: EventBus,
        config: MirrorConfig,
    ) -> Self {
        let fall_window_ms = i64::try_from(config.fall_alert_window.as_millis()).unwrap_or(i64::MAX);
        Self {
            remote,
            applier: Applier {
                local,
                notifier,
                viewer: Arc::new(RwLock::new(None)),
                events: events.clone(),
                fall_window_ms,
            },
            events,
            table: Arc::new(Mutex::new(MirrorTable::default())),
        }
    }

    /// Viewer that fall notifications are addressed to.
    pub fn set_viewer(&self, viewer: Option<ViewerContext>) {
        *self.applier.viewer.write().expect("lock poisoned") = viewer;
    }

    /// Start mirroring a remote identity. Idempotent.
    pub async fn start_mirror(&self, remote_id: &str) -> SyncResult<MirrorStart> {
        {
            let mut table = self.table.lock().expect("lock poisoned");
            if table.active.contains_key(remote_id) {
                return Ok(MirrorStart::AlreadyActive);
            }
            if !table.starting.insert(remote_id.to_string()) {
                return Ok(MirrorStart::AlreadyStarting);
            }
        }

        let filter = RemoteFilter::Sensor(remote_id.to_string());
        let stream = match self.remote.subscribe(&filter).await {
            Ok(stream) => stream,
            Err(e) => {
                self.table
                    .lock()
                    .expect("lock poisoned")
                    .starting
                    .remove(remote_id);
                warn!(remote_id, error = %e, "Mirror subscribe failed");
                return Err(SyncError::RemoteReadFailed(e.to_string()));
            }
        };

        let mut table = self.table.lock().expect("lock poisoned");
        if !table.starting.remove(remote_id) {
            debug!(remote_id, "Mirror stopped during start");
            return Ok(MirrorStart::Cancelled);
        }

        let id = Uuid::new_v4();
        let (cancel_tx, cancel_rx) = oneshot::channel();
        // Spawned under the table lock: the task can only deregister itself
        // after its entry is in place.
        let task = tokio::spawn(run_subscription(
            id,
            remote_id.to_string(),
            stream,
            cancel_rx,
            self.applier.clone(),
            self.events.clone(),
            self.table.clone(),
        ));
        table.active.insert(
            remote_id.to_string(),
            MirrorSubscription {
                id,
                started_at: Utc::now(),
                cancel: Some(cancel_tx),
                task,
            },
        );
        drop(table);

        self.events.publish(SyncEvent::MirrorStarted {
            remote_id: remote_id.to_string(),
        });
        info!(remote_id, subscription_id = %id, "Mirror started");
        Ok(MirrorStart::Started)
    }

    /// Stop one mirror. A batch being applied finishes; no further batches
    /// are read. Returns false when nothing was running.
    pub fn stop_mirror(&self, remote_id: &str) -> bool {
        let removed = {
            let mut table = self.table.lock().expect("lock poisoned");
            let was_starting = table.starting.remove(remote_id);
            match table.active.remove(remote_id) {
                Some(sub) => Some(sub),
                None if was_starting => return true,
                None => None,
            }
        };

        match removed {
            Some(mut sub) => {
                if let Some(cancel) = sub.cancel.take() {
                    let _ = cancel.send(());
                }
                let uptime_secs = (Utc::now() - sub.started_at).num_seconds();
                info!(remote_id, subscription_id = %sub.id, uptime_secs, "Mirror stopped");
                self.events.publish(SyncEvent::MirrorStopped {
                    remote_id: remote_id.to_string(),
                    reason: "stopped".to_string(),
                });
                true
            }
            None => false,
        }
    }

    /// Stop every mirror. Returns how many were stopped.
    pub fn stop_all(&self) -> usize {
        let ids: Vec<String> = {
            let table = self.table.lock().expect("lock poisoned");
            table
                .active
                .keys()
                .chain(table.starting.iter())
                .cloned()
                .collect()
        };
        ids.iter().filter(|id| self.stop_mirror(id)).count()
    }

    /// Stop mirrors whose remote identity is not in `keep`.
    pub fn retain(&self, keep: &[String]) -> usize {
        let ids: Vec<String> = {
            let table = self.table.lock().expect("lock poisoned");
            table
                .active
                .keys()
                .filter(|id| !keep.contains(id))
                .cloned()
                .collect()
        };
        ids.iter().filter(|id| self.stop_mirror(id)).count()
    }

    /// Remote identities with a live subscription, sorted.
    pub fn active_ids(&self) -> Vec<String> {
        let table = self.table.lock().expect("lock poisoned");
        let mut ids: Vec<String> = table.active.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn is_active(&self, remote_id: &str) -> bool {
        self.table
            .lock()
            .expect("lock poisoned")
            .active
            .contains_key(remote_id)
    }

    pub fn is_starting(&self, remote_id: &str) -> bool {
        self.table
            .lock()
            .expect("lock poisoned")
            .starting
            .contains(remote_id)
    }

    /// Apply a change batch for `remote_id` as a live subscription would.
    pub async fn apply_changes(&self, remote_id: &str, batch: &ChangeBatch) -> SyncResult<ApplyOutcome> {
        self.applier.apply(remote_id, batch).await
    }
}

impl Drop for MirrorManager {
    fn drop(&mut self) {
        if let Ok(table) = self.table.lock() {
            for sub in table.active.values() {
                sub.task.abort();
            }
        }
    }
}

async fn run_subscription(
    id: Uuid,
    remote_id: String,
    mut stream: ChangeStream,
    mut cancel_rx: oneshot::Receiver<()>,
    applier: Applier,
    events: EventBus,
    table: Arc<Mutex<MirrorTable>>,
) {
    let reason = loop {
        tokio::select! {
            biased;
            _ = &mut cancel_rx => return,
            item = stream.next() => match item {
                Some(Ok(batch)) => {
                    if let Err(e) = applier.apply(&remote_id, &batch).await {
                        warn!(remote_id = %remote_id, error = %e, "Mirror batch not applied");
                    }
                }
                Some(Err(e)) => {
                    warn!(
                        remote_id = %remote_id,
                        error = %e,
                        "Mirror listen error, subscription torn down"
                    );
                    break format!("listen error: {}", e);
                }
                None => break "stream closed".to_string(),
            }
        }
    };

    // Deregister only if the entry is still ours; a newer start may own it.
    let removed = {
        let mut table = table.lock().expect("lock poisoned");
        match table.active.get(&remote_id) {
            Some(sub) if sub.id == id => table.active.remove(&remote_id).is_some(),
            _ => false,
        }
    };
    if removed {
        events.publish(SyncEvent::MirrorStopped { remote_id, reason });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{DocumentChange, RemoteDocument};
    use crate::{MemoryRemoteStore, NullNotifier};
    use reading_store::SqliteReadingStore;

    fn change(sensor: &str, ts: i64, payload: &str) -> DocumentChange {
        let reading = Reading::new("AA:BB", sensor, ts, payload, "collector-1");
        let document = RemoteDocument::from_reading(&reading, "collector-1", 0);
        DocumentChange {
            kind: ChangeKind::Added,
            id: document.id(),
            document,
        }
    }

    async fn manager(remote: Arc<MemoryRemoteStore>) -> (MirrorManager, LocalStoreHandle) {
        let local: LocalStoreHandle = Arc::new(SqliteReadingStore::open_in_memory().await.unwrap());
        let manager = MirrorManager::new(
            remote,
            local.clone(),
            Arc::new(NullNotifier),
            EventBus::new(),
            MirrorConfig::default(),
        );
        (manager, local)
    }

    async fn wait_for_rows(local: &LocalStoreHandle, owner: &str, expected: usize) {
        for _ in 0..200 {
            if local.count_for_owner(owner).await.unwrap() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {} rows for {}", expected, owner);
    }

    #[tokio::test]
    async fn test_apply_dedups_within_and_across_batches() {
        let (manager, local) = manager(Arc::new(MemoryRemoteStore::new())).await;
        let batch = ChangeBatch {
            changes: vec![
                change("s1", 1, "0xAB3311"),
                change("s1", 1, "0xAB3311"),
                change("s1", 2, "0xAC4312"),
            ],
            from_cache: false,
        };

        let first = manager.apply_changes("s1", &batch).await.unwrap();
        assert_eq!(first.inserted, 2);
        assert_eq!(first.skipped, 1);

        let second = manager.apply_changes("s1", &batch).await.unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.skipped, 3);
        assert_eq!(local.count_for_owner("s1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_removed_changes_are_ignored() {
        let (manager, local) = manager(Arc::new(MemoryRemoteStore::new())).await;
        manager
            .apply_changes("s1", &ChangeBatch {
                changes: vec![change("s1", 1, "0xAB3311")],
                from_cache: false,
            })
            .await
            .unwrap();

        let mut removed = change("s1", 1, "0xAB3311");
        removed.kind = ChangeKind::Removed;
        let outcome = manager
            .apply_changes("s1", &ChangeBatch {
                changes: vec![removed],
                from_cache: false,
            })
            .await
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::default());
        assert_eq!(local.count_for_owner("s1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_applies_snapshot() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let docs: Vec<_> = (1..=3)
            .map(|ts| {
                let c = change("s1", ts, "0xAB3311");
                (c.id, c.document)
            })
            .collect();
        remote.batch_set(&docs).await.unwrap();
        let (manager, local) = manager(remote.clone()).await;

        assert_eq!(manager.start_mirror("s1").await.unwrap(), MirrorStart::Started);
        assert_eq!(
            manager.start_mirror("s1").await.unwrap(),
            MirrorStart::AlreadyActive
        );
        assert_eq!(remote.subscribe_calls(), 1);
        wait_for_rows(&local, "s1", 3).await;
        assert_eq!(manager.active_ids(), vec!["s1"]);
    }

    #[tokio::test]
    async fn test_live_changes_flow_into_local_store() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let (manager, local) = manager(remote.clone()).await;
        manager.start_mirror("s1").await.unwrap();

        let c = change("s1", 10, "0xBA3311");
        remote.set(&c.id, &c.document).await.unwrap();
        wait_for_rows(&local, "s1", 1).await;
    }

    #[tokio::test]
    async fn test_stop_cancels_subscription() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let (manager, _local) = manager(remote.clone()).await;
        manager.start_mirror("s1").await.unwrap();
        manager.start_mirror("s2").await.unwrap();

        assert!(manager.stop_mirror("s1"));
        assert!(!manager.stop_mirror("s1"));
        assert_eq!(manager.active_ids(), vec!["s2"]);

        assert_eq!(manager.stop_all(), 1);
        assert!(manager.active_ids().is_empty());

        for _ in 0..200 {
            if remote.listener_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(remote.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_listen_error_isolated_to_one_identity() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let (manager, local) = manager(remote.clone()).await;
        manager.start_mirror("s1").await.unwrap();
        manager.start_mirror("s2").await.unwrap();

        remote.fail_listeners(&RemoteFilter::Sensor("s1".into()));
        for _ in 0..200 {
            if !manager.is_active("s1") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!manager.is_active("s1"));
        assert!(manager.is_active("s2"));

        let c = change("s2", 5, "0xAB3311");
        remote.set(&c.id, &c.document).await.unwrap();
        wait_for_rows(&local, "s2", 1).await;

        // Eligible for restart.
        assert_eq!(manager.start_mirror("s1").await.unwrap(), MirrorStart::Started);
    }

    #[tokio::test]
    async fn test_subscribe_failure_clears_starting() {
        let remote = Arc::new(MemoryRemoteStore::new());
        remote.set_offline(true);
        let (manager, _local) = manager(remote.clone()).await;

        let err = manager.start_mirror("s1").await.unwrap_err();
        assert!(matches!(err, SyncError::RemoteReadFailed(_)));
        assert!(!manager.is_starting("s1"));
        assert!(!manager.is_active("s1"));
    }

    #[tokio::test]
    async fn test_retain_stops_deauthorized() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let (manager, _local) = manager(remote).await;
        for id in ["s1", "s2", "s3"] {
            manager.start_mirror(id).await.unwrap();
        }
        assert_eq!(manager.retain(&["s2".to_string()]), 2);
        assert_eq!(manager.active_ids(), vec!["s2"]);
    }
}
