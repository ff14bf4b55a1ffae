//! Sync orchestrator.
//!
//! Composes connectivity, session, write path, backfill, mirrors and the
//! offline queue. Exactly one role pipeline runs at a time, chosen by the
//! session's effective role, even when the identity holds both roles.
//!
//! A background worker reacts to connectivity transitions and periodically
//! retries the offline queue while the collector pipeline is active.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use offline_outbox::{OfflineQueue, QueueConfig, QueueStatus, QueuedUpload, RetryOutcome};
use reading_store::{LocalStoreHandle, Reading};
use sensor_inventory::{SensorInventoryService, SensorRecord};
use serde::Serialize;
use session_resolver::{Role, SessionResolver, SessionState};
use sync_config_and_utils::SyncSettings;
use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::pipeline::{PipelineMachine, PipelineMachineInput, PipelineState};
use crate::remote::{remote_document_id, RemoteFilter, RemoteStore};
use crate::{
    Backfill, BackfillConfig, ConnectivityListener, ConnectivityMonitor, EventBus, FallNotifier,
    ListenerToken, MirrorConfig, MirrorManager, PurgeReport, SyncError, SyncEvent, SyncResult,
    UploadReport, ViewerContext, WritePath, WritePathConfig,
};

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub write: WritePathConfig,
    pub backfill: BackfillConfig,
    pub mirror: MirrorConfig,
    pub queue: QueueConfig,
    /// Period of the offline queue retry sweep.
    pub queue_retry_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            write: WritePathConfig::default(),
            backfill: BackfillConfig::default(),
            mirror: MirrorConfig::default(),
            queue: QueueConfig::default(),
            queue_retry_interval: Duration::from_secs(30),
        }
    }
}

impl SyncConfig {
    pub fn from_settings(settings: &SyncSettings) -> Self {
        Self {
            write: WritePathConfig {
                batch_size: settings.batch_size,
                page_size: settings.page_size,
            },
            backfill: BackfillConfig {
                page_size: settings.page_size,
            },
            mirror: MirrorConfig {
                fall_alert_window: Duration::from_secs(settings.fall_alert_window_secs),
            },
            queue: QueueConfig {
                capacity: settings.offline_queue_capacity,
                max_retries: settings.offline_queue_max_retries,
            },
            queue_retry_interval: Duration::from_secs(settings.queue_retry_interval_secs.max(1)),
        }
    }
}

/// Why a reading went to the offline queue instead of the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueReason {
    SessionNotLoaded,
    NoConnectivity,
    RemoteWriteFailed,
}

/// What happened to a freshly recorded reading (or packet).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Written remotely under these document ids.
    Uploaded { ids: Vec<String> },
    Queued {
        upload_id: String,
        reason: QueueReason,
    },
    /// The selected role does not upload; the reading is stored locally only.
    LocalOnly,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub delivered: usize,
    pub requeued: usize,
    /// Upload ids dropped for good during this drain.
    pub dropped: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum FullSyncReport {
    Collector(UploadReport),
    Viewer(PurgeReport),
}

/// Remote document count against local row count for one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "difference", rename_all = "snake_case")]
pub enum CloudComparison {
    Match,
    /// The remote store has this many more documents.
    LocalBehind(usize),
    /// The local store has this many more rows.
    LocalAhead(usize),
}

enum Route {
    Upload(String),
    Queue(QueueReason),
    LocalOnly,
}

/// Role-aware sync coordinator. Construct once per process and share via `Arc`.
pub struct SyncOrchestrator {
    session: Arc<SessionResolver>,
    connectivity: Arc<ConnectivityMonitor>,
    local: LocalStoreHandle,
    remote: Arc<dyn RemoteStore>,
    inventory: Arc<SensorInventoryService>,
    write_path: WritePath,
    backfill: Backfill,
    mirrors: MirrorManager,
    queue: OfflineQueue,
    events: EventBus,
    fsm: Mutex<PipelineMachine>,
    bootstrapping: AtomicBool,
    rerun: AtomicBool,
    bootstrap_finished: Notify,
    drain_lock: AsyncMutex<()>,
    listener: Mutex<Option<ListenerToken>>,
    config: SyncConfig,
}

impl SyncOrchestrator {
    pub fn new(
        session: Arc<SessionResolver>,
        connectivity: Arc<ConnectivityMonitor>,
        local: LocalStoreHandle,
        remote: Arc<dyn RemoteStore>,
        inventory: Arc<SensorInventoryService>,
        notifier: Arc<dyn FallNotifier>,
        config: SyncConfig,
    ) -> Self {
        let events = EventBus::new();
        Self {
            write_path: WritePath::new(remote.clone(), events.clone(), config.write.clone()),
            backfill: Backfill::new(
                remote.clone(),
                local.clone(),
                events.clone(),
                config.backfill.clone(),
            ),
            mirrors: MirrorManager::new(
                remote.clone(),
                local.clone(),
                notifier,
                events.clone(),
                config.mirror.clone(),
            ),
            queue: OfflineQueue::new(config.queue.clone()),
            session,
            connectivity,
            local,
            remote,
            inventory,
            events,
            fsm: Mutex::new(PipelineMachine::new()),
            bootstrapping: AtomicBool::new(false),
            rerun: AtomicBool::new(false),
            bootstrap_finished: Notify::new(),
            drain_lock: AsyncMutex::new(()),
            listener: Mutex::new(None),
            config,
        }
    }

    pub fn session(&self) -> &Arc<SessionResolver> {
        &self.session
    }

    pub fn connectivity(&self) -> &Arc<ConnectivityMonitor> {
        &self.connectivity
    }

    pub fn sensor_inventory(&self) -> &Arc<SensorInventoryService> {
        &self.inventory
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn pipeline_state(&self) -> PipelineState {
        PipelineState::from(self.fsm.lock().expect("lock poisoned").state())
    }

    pub async fn queue_status(&self) -> QueueStatus {
        self.queue.status().await
    }

    pub fn active_mirrors(&self) -> Vec<String> {
        self.mirrors.active_ids()
    }

    // ========================================================================
    // Worker
    // ========================================================================

    /// Subscribe to connectivity and spawn the worker. The current
    /// connectivity state is delivered right away, so an online start
    /// bootstraps immediately. Call [`shutdown`](Self::shutdown) to stop it.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let (tx, mut rx) = mpsc::unbounded_channel::<bool>();
        let listener: ConnectivityListener =
            Arc::new(move |online: bool| -> Result<(), String> {
                tx.send(online).map_err(|e| e.to_string())
            });
        let token = self.connectivity.subscribe(listener);
        let previous = self.listener.lock().expect("lock poisoned").replace(token);
        if let Some(previous) = previous {
            self.connectivity.unsubscribe(previous);
        }

        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(this.config.queue_retry_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    maybe_online = rx.recv() => {
                        match maybe_online {
                            Some(true) => this.handle_connectivity_restored().await,
                            Some(false) => this.handle_connectivity_lost().await,
                            None => break,
                        }
                    }
                    _ = ticker.tick() => {
                        this.retry_sweep().await;
                    }
                }
            }
            debug!("Sync worker stopped");
        })
    }

    /// Detach from connectivity; the worker exits once its channel closes.
    pub fn shutdown(&self) {
        let token = self.listener.lock().expect("lock poisoned").take();
        if let Some(token) = token {
            self.connectivity.unsubscribe(token);
        }
        self.mirrors.stop_all();
    }

    pub async fn handle_connectivity_restored(&self) {
        self.events
            .publish(SyncEvent::ConnectivityChanged { online: true });
        match self.bootstrap().await {
            Ok(state) => debug!(state = ?state, "Bootstrap after reconnect finished"),
            Err(e) => warn!(error = %e, "Bootstrap after reconnect failed"),
        }
    }

    /// Mirrors are torn down, not paused; the next restore starts them again.
    pub async fn handle_connectivity_lost(&self) {
        self.events
            .publish(SyncEvent::ConnectivityChanged { online: false });
        let stopped = self.mirrors.stop_all();
        if stopped > 0 {
            info!(stopped, "Connectivity lost, mirrors stopped");
        }
    }

    async fn retry_sweep(&self) {
        if !self.connectivity.is_online() || self.pipeline_state() != PipelineState::Collector {
            return;
        }
        if self.queue.pending_count().await == 0 {
            return;
        }
        if let Err(e) = self.drain_queue().await {
            warn!(error = %e, "Queue retry sweep failed");
        }
    }

    // ========================================================================
    // Bootstrap
    // ========================================================================

    /// Load the session and run the pipeline of its effective role. A call
    /// made while another bootstrap runs is folded into one more pass of the
    /// running bootstrap; it waits for that bootstrap to finish and returns
    /// the state it left behind.
    pub async fn bootstrap(&self) -> SyncResult<PipelineState> {
        let finished = self.bootstrap_finished.notified();
        tokio::pin!(finished);
        finished.as_mut().enable();

        loop {
            if !self.bootstrapping.swap(true, Ordering::SeqCst) {
                return self.run_bootstrap().await;
            }
            self.rerun.store(true, Ordering::SeqCst);
            // The running bootstrap may have released between the swap and the store.
            if self.bootstrapping.load(Ordering::SeqCst) {
                debug!("Bootstrap already running, scheduled another pass");
                finished.await;
                return Ok(self.pipeline_state());
            }
        }
    }

    async fn run_bootstrap(&self) -> SyncResult<PipelineState> {
        loop {
            self.rerun.store(false, Ordering::SeqCst);
            let result = self.bootstrap_once().await;
            if self.rerun.load(Ordering::SeqCst) {
                continue;
            }
            self.bootstrapping.store(false, Ordering::SeqCst);
            // A request may have arrived between the check and the release.
            if self.rerun.load(Ordering::SeqCst) {
                if !self.bootstrapping.swap(true, Ordering::SeqCst) {
                    continue;
                }
                // Another caller took over and wakes the waiters when done.
                return result;
            }
            self.bootstrap_finished.notify_waiters();
            return result;
        }
    }

    async fn bootstrap_once(&self) -> SyncResult<PipelineState> {
        self.transition(&PipelineMachineInput::LoadSession)?;

        let state = match self.session.load_session().await {
            Ok(state) => state,
            Err(e) => {
                self.transition(&PipelineMachineInput::LoadFailed)?;
                return Err(e.into());
            }
        };
        let Some(identity) = state.identity.clone() else {
            self.transition(&PipelineMachineInput::LoadFailed)?;
            return Err(SyncError::NotAuthenticated);
        };

        match state.effective_role() {
            Some(Role::Collector) => self.enter_collector(&identity).await?,
            Some(Role::Viewer) => self.enter_viewer(&identity, &state).await?,
            None => {
                self.mirrors.stop_all();
                self.mirrors.set_viewer(None);
                self.transition(&PipelineMachineInput::NoRole)?;
                warn!(identity = %identity, "No usable role, sync disabled");
            }
        }
        Ok(self.pipeline_state())
    }

    async fn enter_collector(&self, identity: &str) -> SyncResult<()> {
        self.mirrors.stop_all();
        self.mirrors.set_viewer(None);
        self.transition(&PipelineMachineInput::CollectorSelected)?;

        let purged = self
            .local
            .delete_where_owner_not_in(&[identity.to_string()])
            .await?;
        info!(identity, purged, "Collector pipeline selected");

        if !self.connectivity.is_online() {
            debug!(identity, "Offline, collector uploads deferred");
            return Ok(());
        }

        let local_rows = self
            .local
            .count_for_owner(identity)
            .await
            .map_err(SyncError::local_read)?;
        if local_rows == 0 {
            if let Err(e) = self.backfill.backfill_own(identity).await {
                warn!(identity, error = %e, "Collector cold-start backfill failed");
            }
        }
        if let Err(e) = self.sync_local_history().await {
            warn!(identity, error = %e, "Local history upload failed");
        }
        match self.inventory.download_owned(identity).await {
            Ok(names) => debug!(identity, names, "Owned sensor names downloaded"),
            Err(e) => warn!(identity, error = %e, "Sensor name download failed"),
        }
        self.drain_queue().await?;
        Ok(())
    }

    async fn enter_viewer(&self, identity: &str, state: &SessionState) -> SyncResult<()> {
        let dropped = self.queue.clear().await;
        if !dropped.is_empty() {
            info!(dropped = dropped.len(), "Offline queue cleared for viewer pipeline");
        }
        for upload in &dropped {
            self.report_dropped(upload, "viewer role selected");
        }
        self.mirrors.set_viewer(Some(ViewerContext {
            viewer_id: identity.to_string(),
        }));
        self.transition(&PipelineMachineInput::ViewerSelected)?;

        let online = self.connectivity.is_online();
        let authorized = if online {
            match self.session.refresh_authorization().await {
                Ok(ids) => ids,
                Err(e) => {
                    warn!(identity, error = %e, "Authorization refresh failed, using loaded set");
                    state.authorized_remote_ids.clone()
                }
            }
        } else {
            state.authorized_remote_ids.clone()
        };

        let stopped = self.mirrors.retain(&authorized);
        info!(
            identity,
            authorized = authorized.len(),
            stopped,
            "Viewer pipeline selected"
        );

        let keep = [identity.to_string()];
        if !online {
            let mut owners = authorized.clone();
            owners.push(identity.to_string());
            self.local.delete_where_owner_not_in(&owners).await?;
            debug!(identity, "Offline, backfill and mirrors deferred");
            return Ok(());
        }

        let report = self.backfill.purge_and_backfill(&authorized, &keep).await?;
        debug!(
            purged = report.purged,
            inserted = report.inserted(),
            failed = report.failed.len(),
            "Viewer catch-up finished"
        );
        self.start_mirrors(&authorized).await;
        match self.inventory.download_for(&authorized).await {
            Ok(names) => debug!(identity, names, "Authorized sensor names downloaded"),
            Err(e) => warn!(identity, error = %e, "Sensor name download failed"),
        }
        Ok(())
    }

    async fn start_mirrors(&self, remote_ids: &[String]) {
        for remote_id in remote_ids {
            if let Err(e) = self.mirrors.start_mirror(remote_id).await {
                warn!(remote_id = %remote_id, error = %e, "Mirror start failed");
            }
        }
    }

    // ========================================================================
    // Collector write path
    // ========================================================================

    /// Store a new reading locally, then upload it, queue it, or keep it
    /// local depending on session, role and connectivity.
    pub async fn record_reading(&self, reading: Reading) -> SyncResult<RecordOutcome> {
        self.local.insert(&reading).await?;

        match self.route().await? {
            Route::LocalOnly => Ok(RecordOutcome::LocalOnly),
            Route::Queue(reason) => self.enqueue(vec![reading], reason).await,
            Route::Upload(identity) => match self.write_path.upload_one(&reading, &identity).await {
                Ok(id) => Ok(RecordOutcome::Uploaded { ids: vec![id] }),
                Err(e) => {
                    warn!(error = %e, "Immediate upload failed, queueing");
                    self.enqueue(vec![reading], QueueReason::RemoteWriteFailed)
                        .await
                }
            },
        }
    }

    /// Like [`record_reading`](Self::record_reading) for a packet of readings,
    /// uploaded through the partitioned path. Failed partitions are queued.
    pub async fn record_packet(&self, readings: Vec<Reading>) -> SyncResult<RecordOutcome> {
        if readings.is_empty() {
            return Ok(RecordOutcome::LocalOnly);
        }
        self.local.insert_all(&readings).await?;

        match self.route().await? {
            Route::LocalOnly => Ok(RecordOutcome::LocalOnly),
            Route::Queue(reason) => self.enqueue(readings, reason).await,
            Route::Upload(identity) => {
                let report = self.write_path.upload_batch(&readings, &identity).await;
                if report.is_complete() {
                    Ok(RecordOutcome::Uploaded {
                        ids: document_ids(&readings),
                    })
                } else {
                    self.enqueue(report.failed_readings(), QueueReason::RemoteWriteFailed)
                        .await
                }
            }
        }
    }

    async fn route(&self) -> SyncResult<Route> {
        let identity = self
            .session
            .current_identity()
            .ok_or(SyncError::NotAuthenticated)?;

        let state = self.session.snapshot().await;
        if !state.loaded || state.identity.as_deref() != Some(identity.as_str()) {
            return Ok(Route::Queue(QueueReason::SessionNotLoaded));
        }
        if state.effective_role() != Some(Role::Collector) {
            return Ok(Route::LocalOnly);
        }
        if !self.connectivity.is_online() {
            return Ok(Route::Queue(QueueReason::NoConnectivity));
        }
        Ok(Route::Upload(identity))
    }

    async fn enqueue(&self, readings: Vec<Reading>, reason: QueueReason) -> SyncResult<RecordOutcome> {
        let count = readings.len();
        let outcome = self.queue.enqueue(readings).await?;
        if let Some(evicted) = &outcome.evicted {
            self.report_dropped(evicted, "evicted from full queue");
        }
        info!(upload_id = %outcome.upload_id, readings = count, reason = ?reason, "Upload queued");
        Ok(RecordOutcome::Queued {
            upload_id: outcome.upload_id,
            reason,
        })
    }

    fn report_dropped(&self, upload: &QueuedUpload, reason: &str) {
        warn!(
            upload_id = %upload.upload_id,
            readings = upload.readings.len(),
            retry_count = upload.retry_count,
            reason,
            "Queued upload dropped"
        );
        self.events.publish(SyncEvent::UploadDropped {
            upload_id: upload.upload_id.clone(),
            readings: upload.readings.len(),
            reason: reason.to_string(),
        });
    }

    /// Deliver queued uploads in order. Stops at the first failure, which
    /// goes back to the front of the queue or is dropped once out of retries.
    pub async fn drain_queue(&self) -> SyncResult<DrainReport> {
        let _guard = self.drain_lock.lock().await;
        let identity = self
            .session
            .current_identity()
            .ok_or(SyncError::NotAuthenticated)?;

        let mut report = DrainReport::default();
        while self.connectivity.is_online() {
            let Some(upload) = self.queue.next().await else {
                break;
            };

            let result = self.write_path.upload_batch(&upload.readings, &identity).await;
            if result.is_complete() {
                self.queue.acknowledge(&upload.upload_id).await?;
                report.delivered += 1;
                continue;
            }

            // Committed partitions are idempotent, so the whole upload is retried.
            match self.queue.retry(upload).await {
                RetryOutcome::Requeued { .. } => report.requeued += 1,
                RetryOutcome::Exhausted(upload) => {
                    self.report_dropped(&upload, "retries exhausted");
                    report.dropped.push(upload.upload_id);
                }
                RetryOutcome::Evicted(upload) => {
                    self.report_dropped(&upload, "evicted from full queue");
                    report.dropped.push(upload.upload_id);
                }
            }
            break;
        }

        let remaining = self.queue.pending_count().await;
        self.events.publish(SyncEvent::QueueDrained {
            delivered: report.delivered,
            remaining,
        });
        if report.delivered > 0 || !report.dropped.is_empty() {
            info!(
                delivered = report.delivered,
                dropped = report.dropped.len(),
                remaining,
                "Offline queue drained"
            );
        }
        Ok(report)
    }

    /// Upload every local reading of the signed-in collector that the remote
    /// store does not have yet.
    pub async fn sync_local_history(&self) -> SyncResult<UploadReport> {
        let identity = self
            .session
            .current_identity()
            .ok_or(SyncError::NotAuthenticated)?;
        if !self.connectivity.is_online() {
            return Err(SyncError::NoConnectivity);
        }

        let readings = self
            .local
            .readings_for_owner(&identity)
            .await
            .map_err(SyncError::local_read)?;
        self.write_path.upload_missing(&readings, &identity).await
    }

    // ========================================================================
    // Sensor inventory
    // ========================================================================

    /// Register a sensor under the signed-in identity.
    pub async fn register_sensor(
        &self,
        sensor_id: &str,
        device_address: Option<&str>,
        display_name: &str,
    ) -> SyncResult<SensorRecord> {
        let identity = self.inventory_identity()?;
        Ok(self
            .inventory
            .register_sensor(&identity, sensor_id, device_address, display_name)
            .await?)
    }

    pub async fn rename_sensor(&self, sensor_id: &str, display_name: &str) -> SyncResult<()> {
        let identity = self.inventory_identity()?;
        Ok(self
            .inventory
            .rename_sensor(&identity, sensor_id, display_name)
            .await?)
    }

    /// Push every locally named sensor to the directory as owned by the
    /// signed-in identity.
    pub async fn upload_sensor_names(&self) -> SyncResult<usize> {
        let identity = self.inventory_identity()?;
        Ok(self.inventory.upload_all_from_local(&identity).await?)
    }

    fn inventory_identity(&self) -> SyncResult<String> {
        let identity = self
            .session
            .current_identity()
            .ok_or(SyncError::NotAuthenticated)?;
        if !self.connectivity.is_online() {
            return Err(SyncError::NoConnectivity);
        }
        Ok(identity)
    }

    // ========================================================================
    // Role, authorization and full sync
    // ========================================================================

    /// Switch the active role. Pipelines of the previous role stop and the
    /// bootstrap runs again for the new one.
    pub async fn select_role(&self, role: Role) -> SyncResult<PipelineState> {
        self.session.select_role(role).await?;
        self.mirrors.stop_all();
        self.bootstrap().await
    }

    /// Re-read the viewer's authorized set and, when the viewer pipeline is
    /// active, re-run it so mirrors and local rows follow the new set.
    pub async fn refresh_authorization(&self) -> SyncResult<Vec<String>> {
        let ids = self.session.refresh_authorization().await?;
        if self.pipeline_state() == PipelineState::Viewer {
            self.bootstrap().await?;
        }
        Ok(ids)
    }

    pub async fn perform_full_sync(&self) -> SyncResult<FullSyncReport> {
        if !self.connectivity.is_online() {
            return Err(SyncError::NoConnectivity);
        }
        let state = self.session.load_session().await?;
        let identity = state.identity.clone().ok_or(SyncError::NotAuthenticated)?;

        match state.effective_role() {
            Some(Role::Collector) => Ok(FullSyncReport::Collector(
                self.sync_local_history().await?,
            )),
            Some(Role::Viewer) => {
                let authorized = self.session.refresh_authorization().await?;
                let report = self
                    .backfill
                    .purge_and_backfill(&authorized, &[identity])
                    .await?;
                self.start_mirrors(&authorized).await;
                Ok(FullSyncReport::Viewer(report))
            }
            None => Err(SyncError::NoActiveRole),
        }
    }

    /// Compare remote and local counts for `remote_id`. The signed-in
    /// identity is matched by uploader, anything else by sensor id.
    pub async fn verify_cloud_vs_local(&self, remote_id: &str) -> SyncResult<CloudComparison> {
        let filter = if self.session.current_identity().as_deref() == Some(remote_id) {
            RemoteFilter::Uploader(remote_id.to_string())
        } else {
            RemoteFilter::Sensor(remote_id.to_string())
        };

        let remote_count = self
            .remote
            .count(&filter)
            .await
            .map_err(|e| SyncError::RemoteReadFailed(e.to_string()))?;
        let local_count = self
            .local
            .count_for_owner(remote_id)
            .await
            .map_err(SyncError::local_read)?;

        let comparison = match remote_count.cmp(&local_count) {
            std::cmp::Ordering::Equal => CloudComparison::Match,
            std::cmp::Ordering::Greater => CloudComparison::LocalBehind(remote_count - local_count),
            std::cmp::Ordering::Less => CloudComparison::LocalAhead(local_count - remote_count),
        };
        info!(remote_id, remote_count, local_count, comparison = ?comparison, "Cloud vs local");
        Ok(comparison)
    }

    /// Tear everything down: mirrors, queue, local readings and the session.
    pub async fn sign_out(&self) -> SyncResult<()> {
        self.mirrors.stop_all();
        self.mirrors.set_viewer(None);
        let dropped = self.queue.clear().await.len();
        let cleared = self.local.clear_all().await?;
        let names = self.inventory.clear_local().await?;
        self.session.sign_out().await?;
        self.transition(&PipelineMachineInput::Reset)?;
        info!(dropped, cleared, names, "Signed out, sync state reset");
        Ok(())
    }

    fn transition(&self, input: &PipelineMachineInput) -> SyncResult<PipelineState> {
        let (old_state, new_state) = {
            let mut fsm = self.fsm.lock().expect("lock poisoned");
            let old_state = PipelineState::from(fsm.state());

            fsm.consume(input).map_err(|_| {
                SyncError::InvalidStateTransition(format!(
                    "Cannot apply {:?} in state {:?}",
                    input,
                    fsm.state()
                ))
            })?;
            (old_state, PipelineState::from(fsm.state()))
        };

        if old_state != new_state {
            debug!(old_state = ?old_state, new_state = ?new_state, "Pipeline state transition");
            self.events.publish(SyncEvent::PipelineChanged {
                from: old_state,
                to: new_state,
            });
        }
        Ok(new_state)
    }
}

fn document_ids(readings: &[Reading]) -> Vec<String> {
    let mut seen = HashSet::new();
    readings
        .iter()
        .map(|r| remote_document_id(&r.source_address, &r.sensor_id, r.timestamp))
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_from_settings() {
        let settings = SyncSettings {
            batch_size: 200,
            fall_alert_window_secs: 60,
            offline_queue_capacity: 7,
            queue_retry_interval_secs: 0,
            ..SyncSettings::default()
        };
        let config = SyncConfig::from_settings(&settings);
        assert_eq!(config.write.batch_size, 200);
        assert_eq!(config.mirror.fall_alert_window, Duration::from_secs(60));
        assert_eq!(config.queue.capacity, 7);
        assert_eq!(config.queue_retry_interval, Duration::from_secs(1));
    }

    #[test]
    fn document_ids_are_unique_and_ordered() {
        let readings = vec![
            Reading::new("AA:BB", "s1", 2, "0x1", "c1"),
            Reading::new("AA:BB", "s1", 1, "0x1", "c1"),
            Reading::new("AA:BB", "s1", 2, "0x2", "c1"),
        ];
        assert_eq!(document_ids(&readings), vec!["AABB_s1_2", "AABB_s1_1"]);
    }

    #[test]
    fn comparison_serializes_with_status() {
        let json = serde_json::to_value(CloudComparison::LocalBehind(3)).unwrap();
        assert_eq!(json["status"], "local_behind");
        assert_eq!(json["difference"], 3);
    }
}
