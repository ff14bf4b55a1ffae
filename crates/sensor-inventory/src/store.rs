//! Backend seams of the sensor inventory.

use async_trait::async_trait;
use reading_store::{SensorName, SqliteReadingStore};

use crate::{InventoryError, InventoryResult, SensorRecord};

/// Remote sensor collection keyed by sensor id.
#[async_trait]
pub trait SensorDirectory: Send + Sync {
    async fn get(&self, sensor_id: &str) -> InventoryResult<Option<SensorRecord>>;

    /// Create or overwrite the record for its sensor id.
    async fn put(&self, record: SensorRecord) -> InventoryResult<()>;

    /// Write several records as one batch. Either all land or none.
    async fn put_many(&self, records: Vec<SensorRecord>) -> InventoryResult<usize>;

    /// Set the display name (and owner, when given), creating the record if
    /// needed. Other fields of an existing record are kept.
    async fn merge_name(
        &self,
        sensor_id: &str,
        display_name: &str,
        owner_id: Option<&str>,
    ) -> InventoryResult<()>;

    async fn query_by_owner(&self, owner_id: &str) -> InventoryResult<Vec<SensorRecord>>;

    /// Records for the given ids. Unknown ids are skipped.
    async fn get_many(&self, sensor_ids: &[String]) -> InventoryResult<Vec<SensorRecord>>;

    /// Returns false when the sensor did not exist.
    async fn delete(&self, sensor_id: &str) -> InventoryResult<bool>;
}

/// Local display names keyed by sensor id.
#[async_trait]
pub trait SensorNameStore: Send + Sync {
    async fn upsert_name(&self, sensor_id: &str, display_name: &str) -> InventoryResult<()>;
    async fn display_name_for(&self, sensor_id: &str) -> InventoryResult<Option<String>>;
    async fn list(&self) -> InventoryResult<Vec<SensorName>>;
    async fn delete(&self, sensor_id: &str) -> InventoryResult<bool>;
    async fn clear(&self) -> InventoryResult<usize>;
}

fn local_err(e: reading_store::StoreError) -> InventoryError {
    InventoryError::Local(e.to_string())
}

/// Names live next to the readings in the local SQLite file.
#[async_trait]
impl SensorNameStore for SqliteReadingStore {
    async fn upsert_name(&self, sensor_id: &str, display_name: &str) -> InventoryResult<()> {
        self.upsert_sensor_name(sensor_id, display_name)
            .await
            .map_err(local_err)
    }

    async fn display_name_for(&self, sensor_id: &str) -> InventoryResult<Option<String>> {
        Ok(self
            .sensor_name(sensor_id)
            .await
            .map_err(local_err)?
            .map(|n| n.display_name))
    }

    async fn list(&self) -> InventoryResult<Vec<SensorName>> {
        self.sensor_names().await.map_err(local_err)
    }

    async fn delete(&self, sensor_id: &str) -> InventoryResult<bool> {
        self.delete_sensor_name(sensor_id).await.map_err(local_err)
    }

    async fn clear(&self) -> InventoryResult<usize> {
        self.clear_sensor_names().await.map_err(local_err)
    }
}
