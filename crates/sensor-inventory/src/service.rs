//! Sensor inventory service: registration, renaming, listing and name sync.

use std::collections::BTreeSet;
use std::sync::Arc;

use reading_store::SensorName;
use tracing::{debug, info};

use crate::{InventoryError, InventoryResult, SensorDirectory, SensorNameStore, SensorRecord};

/// Ids per remote `get_many` call, the remote "in" query limit.
pub const MAX_IDS_PER_QUERY: usize = 10;

#[derive(Clone)]
pub struct SensorInventoryService {
    directory: Arc<dyn SensorDirectory>,
    local: Arc<dyn SensorNameStore>,
}

impl SensorInventoryService {
    pub fn new(directory: Arc<dyn SensorDirectory>, local: Arc<dyn SensorNameStore>) -> Self {
        Self { directory, local }
    }

    /// Register a sensor owned by `owner_id`, overwriting any previous
    /// record, and store its name locally once the remote write succeeded.
    pub async fn register_sensor(
        &self,
        owner_id: &str,
        sensor_id: &str,
        device_address: Option<&str>,
        display_name: &str,
    ) -> InventoryResult<SensorRecord> {
        require("owner_id", owner_id)?;
        require("sensor_id", sensor_id)?;
        require("display_name", display_name)?;

        let record = SensorRecord::new(
            sensor_id,
            device_address.map(str::to_string),
            owner_id,
            display_name,
        );
        self.directory.put(record.clone()).await?;
        self.local.upsert_name(sensor_id, display_name).await?;
        info!(owner_id, sensor_id, "Sensor registered");
        Ok(record)
    }

    /// Rename a sensor. Creates the remote record if it does not exist yet.
    pub async fn rename_sensor(
        &self,
        owner_id: &str,
        sensor_id: &str,
        display_name: &str,
    ) -> InventoryResult<()> {
        require("sensor_id", sensor_id)?;
        require("display_name", display_name)?;

        let owner = (!owner_id.trim().is_empty()).then_some(owner_id);
        self.directory
            .merge_name(sensor_id, display_name, owner)
            .await?;
        self.local.upsert_name(sensor_id, display_name).await?;
        info!(sensor_id, "Sensor renamed");
        Ok(())
    }

    pub async fn sensor(&self, sensor_id: &str) -> InventoryResult<Option<SensorRecord>> {
        require("sensor_id", sensor_id)?;
        self.directory.get(sensor_id).await
    }

    pub async fn owned_sensors(&self, owner_id: &str) -> InventoryResult<Vec<SensorRecord>> {
        require("owner_id", owner_id)?;
        self.directory.query_by_owner(owner_id).await
    }

    /// Records for `sensor_ids`, queried in chunks of [`MAX_IDS_PER_QUERY`].
    /// Any failing chunk fails the whole lookup.
    pub async fn sensors_by_ids(&self, sensor_ids: &[String]) -> InventoryResult<Vec<SensorRecord>> {
        let ids: Vec<String> = sensor_ids
            .iter()
            .filter(|id| !id.trim().is_empty())
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut records = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(MAX_IDS_PER_QUERY) {
            records.extend(self.directory.get_many(chunk).await?);
        }
        Ok(records)
    }

    pub async fn local_names(&self) -> InventoryResult<Vec<SensorName>> {
        self.local.list().await
    }

    pub async fn display_name_for(&self, sensor_id: &str) -> InventoryResult<Option<String>> {
        self.local.display_name_for(sensor_id).await
    }

    /// Publish every locally named sensor under `owner_id` in one batch.
    pub async fn upload_all_from_local(&self, owner_id: &str) -> InventoryResult<usize> {
        require("owner_id", owner_id)?;
        let names = self.local.list().await?;
        if names.is_empty() {
            debug!(owner_id, "No sensor names to upload");
            return Ok(0);
        }

        let records = names
            .into_iter()
            .map(|n| SensorRecord::new(n.sensor_id, None, owner_id, n.display_name))
            .collect();
        let uploaded = self.directory.put_many(records).await?;
        info!(owner_id, uploaded, "Sensor names uploaded");
        Ok(uploaded)
    }

    /// Store the names of `records` locally. Unnamed sensors are stored under
    /// their id. Returns the number of names written.
    pub async fn save_to_local(&self, records: &[SensorRecord]) -> InventoryResult<usize> {
        let mut saved = 0;
        for record in records.iter().filter(|r| !r.sensor_id.trim().is_empty()) {
            self.local
                .upsert_name(&record.sensor_id, record.display_name_or_id())
                .await?;
            saved += 1;
        }
        Ok(saved)
    }

    /// Download the names of the sensors `owner_id` registered.
    pub async fn download_owned(&self, owner_id: &str) -> InventoryResult<usize> {
        let records = self.owned_sensors(owner_id).await?;
        let saved = self.save_to_local(&records).await?;
        info!(owner_id, saved, "Owned sensor names downloaded");
        Ok(saved)
    }

    /// Download the names of the given sensors.
    pub async fn download_for(&self, sensor_ids: &[String]) -> InventoryResult<usize> {
        if sensor_ids.is_empty() {
            return Ok(0);
        }
        let records = self.sensors_by_ids(sensor_ids).await?;
        let saved = self.save_to_local(&records).await?;
        info!(requested = sensor_ids.len(), saved, "Sensor names downloaded");
        Ok(saved)
    }

    /// Remove the remote record. The local name is kept.
    pub async fn delete_sensor(&self, sensor_id: &str) -> InventoryResult<bool> {
        require("sensor_id", sensor_id)?;
        let removed = self.directory.delete(sensor_id).await?;
        if removed {
            info!(sensor_id, "Sensor deleted");
        }
        Ok(removed)
    }

    /// Drop every local name. Used on sign-out.
    pub async fn clear_local(&self) -> InventoryResult<usize> {
        self.local.clear().await
    }
}

fn require(field: &str, value: &str) -> InventoryResult<()> {
    if value.trim().is_empty() {
        return Err(InventoryError::InvalidArgument(format!("{} is empty", field)));
    }
    Ok(())
}
