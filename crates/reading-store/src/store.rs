//! Read/write contract of the local store.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{Reading, StoreResult};

/// Local reading store used by the write, mirror and backfill paths.
///
/// Inserts are idempotent: a reading that collides with an existing row on
/// `(owner_id, sensor_id, timestamp, payload)` is ignored.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Insert one reading. Returns false when it already existed.
    async fn insert(&self, reading: &Reading) -> StoreResult<bool>;

    /// Insert many readings in one transaction. Returns the number of new rows.
    async fn insert_all(&self, readings: &[Reading]) -> StoreResult<usize>;

    /// Whether a row with exactly these owner/address/timestamp/payload exists.
    async fn exists_exact(
        &self,
        owner_id: &str,
        source_address: &str,
        timestamp: i64,
        payload: &str,
    ) -> StoreResult<bool>;

    /// Highest stored timestamp for an owner, zero if none.
    async fn max_timestamp_for(&self, owner_id: &str) -> StoreResult<i64>;

    /// Delete every row whose owner is not listed. Returns the deleted count.
    async fn delete_where_owner_not_in(&self, owner_ids: &[String]) -> StoreResult<usize>;

    /// Delete everything. Returns the deleted count.
    async fn clear_all(&self) -> StoreResult<usize>;

    async fn count_for_owner(&self, owner_id: &str) -> StoreResult<usize>;

    async fn count_all(&self) -> StoreResult<usize>;

    /// All readings of an owner in timestamp order.
    async fn readings_for_owner(&self, owner_id: &str) -> StoreResult<Vec<Reading>>;
}

/// Thread-safe local store handle shared by the pipelines.
pub type LocalStoreHandle = Arc<dyn LocalStore>;
