//! In-memory run of the offline collector to mirrored viewer scenario.
//!
//! Two devices share one in-memory remote store. The collector records
//! readings offline, reconnects and uploads; a viewer authorized for the
//! sensor then backfills and mirrors it, and a repeated snapshot must not
//! add rows.

use std::sync::Arc;
use std::time::Duration;

use access_mapping::{AccessMappingService, MemoryAssignmentStore, MemoryViewerDirectory};
use chrono::Utc;
use reading_store::{LocalStoreHandle, Reading, SqliteReadingStore};
use sensor_inventory::{MemorySensorDirectory, SensorInventoryService};
use serde::Serialize;
use serde_json::json;
use session_resolver::{MemoryPreferences, MemoryProfileStore, SessionResolver, StaticIdentity};
use sync_config_and_utils::Config;
use sync_engine::{
    CloudComparison, ConnectivityMonitor, LogNotifier, MemoryRemoteStore, RemoteFilter,
    SyncConfig, SyncOrchestrator,
};
use tracing::info;

const COLLECTOR_ID: &str = "collector-sim";
const VIEWER_ID: &str = "viewer-sim";
const DEVICE_ADDRESS: &str = "AA:BB:CC:DD:EE:FF";
const PAYLOADS: [&str; 3] = ["0xAB3311", "0xAC4312", "0xBA3311"];

#[derive(Debug, Serialize)]
pub struct Summary {
    pub sensor: String,
    pub recorded: usize,
    pub local_while_offline: usize,
    pub remote_while_offline: usize,
    pub remote_after_reconnect: usize,
    pub remote_ids: Vec<String>,
    pub viewer_rows_after_backfill: usize,
    pub viewer_rows_after_snapshot: usize,
    pub comparison: CloudComparison,
    /// Display name the viewer downloaded for the sensor.
    pub viewer_sensor_name: Option<String>,
}

struct Device {
    orchestrator: Arc<SyncOrchestrator>,
    connectivity: Arc<ConnectivityMonitor>,
    access: AccessMappingService,
    local: LocalStoreHandle,
}

async fn device(
    remote: Arc<MemoryRemoteStore>,
    directory: Arc<MemorySensorDirectory>,
    identity: &str,
    roles: &[&str],
    online: bool,
    config: SyncConfig,
) -> anyhow::Result<Device> {
    let profiles = Arc::new(MemoryProfileStore::new());
    profiles.put(identity, json!({ "roles": roles })).await;
    let access = AccessMappingService::new(
        Arc::new(MemoryAssignmentStore::new()),
        Arc::new(MemoryViewerDirectory::new(Vec::new())),
    );
    let session = Arc::new(SessionResolver::new(
        Arc::new(StaticIdentity::signed_in(identity)),
        profiles,
        Arc::new(MemoryPreferences::new()),
        access.clone(),
    ));
    let store = Arc::new(SqliteReadingStore::open_in_memory().await?);
    let local: LocalStoreHandle = store.clone();
    let inventory = Arc::new(SensorInventoryService::new(directory, store));
    let connectivity = Arc::new(ConnectivityMonitor::new(online));
    let orchestrator = Arc::new(SyncOrchestrator::new(
        session,
        connectivity.clone(),
        local.clone(),
        remote,
        inventory,
        Arc::new(LogNotifier),
        config,
    ));
    Ok(Device {
        orchestrator,
        connectivity,
        access,
        local,
    })
}

pub async fn run(config: &Config, sensor: &str, count: usize) -> anyhow::Result<Summary> {
    let sync_config = SyncConfig::from_settings(&config.sync);
    let remote = Arc::new(MemoryRemoteStore::new());
    let directory = Arc::new(MemorySensorDirectory::new());

    let collector = device(
        remote.clone(),
        directory.clone(),
        COLLECTOR_ID,
        &["collector"],
        false,
        sync_config.clone(),
    )
    .await?;
    collector.orchestrator.bootstrap().await?;

    let start = Utc::now().timestamp_millis() - (count as i64) * 1_000;
    for i in 0..count {
        let reading = Reading::new(
            DEVICE_ADDRESS,
            sensor,
            start + (i as i64) * 1_000,
            PAYLOADS[i % PAYLOADS.len()],
            COLLECTOR_ID,
        );
        collector.orchestrator.record_reading(reading).await?;
    }
    let local_while_offline = collector.local.count_for_owner(COLLECTOR_ID).await?;
    let remote_while_offline = remote.len();
    info!(local_while_offline, remote_while_offline, "Collector recorded offline");

    collector.connectivity.set_online(true);
    collector.orchestrator.handle_connectivity_restored().await;
    let remote_after_reconnect = remote.len();
    let mut remote_ids = remote.ids();
    remote_ids.sort();
    collector
        .orchestrator
        .register_sensor(sensor, Some(DEVICE_ADDRESS), &format!("Sensor {}", sensor))
        .await?;

    let viewer = device(
        remote.clone(),
        directory,
        VIEWER_ID,
        &["viewer"],
        true,
        sync_config,
    )
    .await?;
    viewer.access.assign(sensor, VIEWER_ID, COLLECTOR_ID).await?;
    viewer.orchestrator.bootstrap().await?;
    let viewer_rows_after_backfill = viewer.local.count_for_owner(sensor).await?;

    remote.redeliver_snapshot(&RemoteFilter::Sensor(sensor.to_string()));
    tokio::time::sleep(Duration::from_millis(100)).await;
    let viewer_rows_after_snapshot = viewer.local.count_for_owner(sensor).await?;
    let comparison = viewer.orchestrator.verify_cloud_vs_local(sensor).await?;
    let viewer_sensor_name = viewer
        .orchestrator
        .sensor_inventory()
        .display_name_for(sensor)
        .await?;

    collector.orchestrator.shutdown();
    viewer.orchestrator.shutdown();

    Ok(Summary {
        sensor: sensor.to_string(),
        recorded: count,
        local_while_offline,
        remote_while_offline,
        remote_after_reconnect,
        remote_ids,
        viewer_rows_after_backfill,
        viewer_rows_after_snapshot,
        comparison,
        viewer_sensor_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scenario_uploads_once_and_mirrors_without_duplicates() {
        let summary = run(&Config::default(), "s1", 3).await.unwrap();

        assert_eq!(summary.local_while_offline, 3);
        assert_eq!(summary.remote_while_offline, 0);
        assert_eq!(summary.remote_after_reconnect, 3);
        assert!(summary
            .remote_ids
            .iter()
            .all(|id| id.starts_with("AABBCCDDEEFF_s1_") && !id.contains(COLLECTOR_ID)));
        assert_eq!(summary.viewer_rows_after_backfill, 3);
        assert_eq!(summary.viewer_rows_after_snapshot, 3);
        assert_eq!(summary.comparison, CloudComparison::Match);
        assert_eq!(summary.viewer_sensor_name.as_deref(), Some("Sensor s1"));
    }
}
