//! In-memory backends, used by tests and the simulator.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use reading_store::SensorName;
use tokio::sync::RwLock;

use crate::{InventoryError, InventoryResult, SensorDirectory, SensorNameStore, SensorRecord};

/// Sensor collection held in a sorted map keyed by sensor id.
#[derive(Default)]
pub struct MemorySensorDirectory {
    docs: RwLock<BTreeMap<String, SensorRecord>>,
    unavailable: AtomicBool,
    get_many_calls: AtomicUsize,
}

impl MemorySensorDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with [`InventoryError::Backend`] until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn get_many_calls(&self) -> usize {
        self.get_many_calls.load(Ordering::SeqCst)
    }

    pub async fn len(&self) -> usize {
        self.docs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.docs.read().await.is_empty()
    }

    fn check(&self) -> InventoryResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(InventoryError::Backend("sensor directory unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SensorDirectory for MemorySensorDirectory {
    async fn get(&self, sensor_id: &str) -> InventoryResult<Option<SensorRecord>> {
        self.check()?;
        Ok(self.docs.read().await.get(sensor_id).cloned())
    }

    async fn put(&self, record: SensorRecord) -> InventoryResult<()> {
        self.check()?;
        self.docs.write().await.insert(record.sensor_id.clone(), record);
        Ok(())
    }

    async fn put_many(&self, records: Vec<SensorRecord>) -> InventoryResult<usize> {
        self.check()?;
        let mut docs = self.docs.write().await;
        let count = records.len();
        for record in records {
            docs.insert(record.sensor_id.clone(), record);
        }
        Ok(count)
    }

    async fn merge_name(
        &self,
        sensor_id: &str,
        display_name: &str,
        owner_id: Option<&str>,
    ) -> InventoryResult<()> {
        self.check()?;
        let mut docs = self.docs.write().await;
        let record = docs
            .entry(sensor_id.to_string())
            .or_insert_with(|| SensorRecord {
                sensor_id: sensor_id.to_string(),
                device_address: None,
                owner_id: None,
                display_name: None,
            });
        record.display_name = Some(display_name.to_string());
        if let Some(owner_id) = owner_id {
            record.owner_id = Some(owner_id.to_string());
        }
        Ok(())
    }

    async fn query_by_owner(&self, owner_id: &str) -> InventoryResult<Vec<SensorRecord>> {
        self.check()?;
        Ok(self
            .docs
            .read()
            .await
            .values()
            .filter(|r| r.owner_id.as_deref() == Some(owner_id))
            .cloned()
            .collect())
    }

    async fn get_many(&self, sensor_ids: &[String]) -> InventoryResult<Vec<SensorRecord>> {
        self.get_many_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        let docs = self.docs.read().await;
        Ok(sensor_ids.iter().filter_map(|id| docs.get(id).cloned()).collect())
    }

    async fn delete(&self, sensor_id: &str) -> InventoryResult<bool> {
        self.check()?;
        Ok(self.docs.write().await.remove(sensor_id).is_some())
    }
}

/// Local display names held in memory.
#[derive(Default)]
pub struct MemorySensorNames {
    names: RwLock<BTreeMap<String, SensorName>>,
}

impl MemorySensorNames {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SensorNameStore for MemorySensorNames {
    async fn upsert_name(&self, sensor_id: &str, display_name: &str) -> InventoryResult<()> {
        let now = Utc::now().timestamp_millis();
        let mut names = self.names.write().await;
        let entry = names.entry(sensor_id.to_string()).or_insert_with(|| SensorName {
            sensor_id: sensor_id.to_string(),
            display_name: String::new(),
            created_at: now,
            updated_at: now,
        });
        entry.display_name = display_name.to_string();
        entry.updated_at = now;
        Ok(())
    }

    async fn display_name_for(&self, sensor_id: &str) -> InventoryResult<Option<String>> {
        Ok(self
            .names
            .read()
            .await
            .get(sensor_id)
            .map(|n| n.display_name.clone()))
    }

    async fn list(&self) -> InventoryResult<Vec<SensorName>> {
        let mut names: Vec<SensorName> = self.names.read().await.values().cloned().collect();
        names.sort_by(|a, b| {
            a.display_name
                .cmp(&b.display_name)
                .then_with(|| a.sensor_id.cmp(&b.sensor_id))
        });
        Ok(names)
    }

    async fn delete(&self, sensor_id: &str) -> InventoryResult<bool> {
        Ok(self.names.write().await.remove(sensor_id).is_some())
    }

    async fn clear(&self) -> InventoryResult<usize> {
        let mut names = self.names.write().await;
        let count = names.len();
        names.clear();
        Ok(count)
    }
}
