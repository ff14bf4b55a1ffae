//! Remote document store contract.
//!
//! Readings are stored as flat documents keyed by a content-derived id, so
//! every write is an upsert that is safe to repeat.

use async_trait::async_trait;
use reading_store::{Reading, DEFAULT_SENSOR_ID};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Collection holding uploaded readings.
pub const READINGS_COLLECTION: &str = "bluetooth_messages";

const UNKNOWN: &str = "unknown";

/// Deterministic document id: `sanitize(address)_sensorId_timestamp`.
///
/// The uploader never takes part, so the same fact uploaded by two collectors
/// lands on one document.
pub fn remote_document_id(source_address: &str, sensor_id: &str, timestamp: i64) -> String {
    let address: String = source_address
        .chars()
        .filter(|c| *c != ':')
        .map(|c| if c == '/' { '_' } else { c })
        .collect();
    let address = if address.is_empty() { UNKNOWN } else { &address };
    let sensor = if sensor_id.is_empty() { UNKNOWN } else { sensor_id };
    format!("{}_{}_{}", address, sensor, timestamp)
}

/// Number of batch writes needed for `count` documents.
pub fn partition_count(count: usize, batch_size: usize) -> usize {
    if batch_size == 0 {
        return 0;
    }
    count.div_ceil(batch_size)
}

fn default_sensor_id() -> String {
    DEFAULT_SENSOR_ID.to_string()
}

/// Wire form of a reading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDocument {
    pub device_address: String,
    #[serde(default = "default_sensor_id")]
    pub sensor_id: String,
    pub timestamp: i64,
    /// Raw posture code.
    pub received_msg: String,
    /// Owner identity of the reading.
    #[serde(rename = "userId")]
    pub owner_id: String,
    pub uploaded_by: String,
    /// Upload time, milliseconds since the epoch.
    #[serde(default)]
    pub sync_timestamp: i64,
}

impl RemoteDocument {
    pub fn from_reading(reading: &Reading, uploaded_by: &str, synced_at_ms: i64) -> Self {
        Self {
            device_address: reading.source_address.clone(),
            sensor_id: reading.sensor_id.clone(),
            timestamp: reading.timestamp,
            received_msg: reading.payload.clone(),
            owner_id: reading.owner_id.clone(),
            uploaded_by: uploaded_by.to_string(),
            sync_timestamp: synced_at_ms,
        }
    }

    pub fn id(&self) -> String {
        remote_document_id(&self.device_address, &self.sensor_id, self.timestamp)
    }

    /// Local reading owned by `owner_id`.
    pub fn to_reading(&self, owner_id: &str) -> Reading {
        Reading::new(
            self.device_address.clone(),
            self.sensor_id.clone(),
            self.timestamp,
            self.received_msg.clone(),
            owner_id,
        )
    }
}

/// Which documents a query or subscription selects.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RemoteFilter {
    /// Documents of one sensor, as mirrored by viewers.
    Sensor(String),
    /// Documents uploaded by one collector identity.
    Uploader(String),
}

impl RemoteFilter {
    pub fn matches(&self, doc: &RemoteDocument) -> bool {
        match self {
            RemoteFilter::Sensor(id) => doc.sensor_id == *id,
            RemoteFilter::Uploader(id) => doc.uploaded_by == *id,
        }
    }
}

/// Position after which the next page starts: `(timestamp, document id)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Cursor {
    pub timestamp: i64,
    pub id: String,
}

/// Page request ordered by `(timestamp, id)` ascending.
#[derive(Debug, Clone)]
pub struct RemoteQuery {
    pub filter: RemoteFilter,
    /// Strict lower bound on the timestamp.
    pub after_timestamp: Option<i64>,
    pub cursor: Option<Cursor>,
    pub limit: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Page {
    pub documents: Vec<(String, RemoteDocument)>,
    /// Position of the last document, `None` on an empty page.
    pub next_cursor: Option<Cursor>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

#[derive(Debug, Clone)]
pub struct DocumentChange {
    pub kind: ChangeKind,
    pub id: String,
    pub document: RemoteDocument,
}

/// One delivery of a live subscription.
#[derive(Debug, Clone, Default)]
pub struct ChangeBatch {
    pub changes: Vec<DocumentChange>,
    /// Served from the store's local cache rather than the server.
    pub from_cache: bool,
}

/// Live subscription. Dropping it cancels the subscription.
pub struct ChangeStream {
    rx: mpsc::UnboundedReceiver<RemoteResult<ChangeBatch>>,
}

impl ChangeStream {
    pub fn new(rx: mpsc::UnboundedReceiver<RemoteResult<ChangeBatch>>) -> Self {
        Self { rx }
    }

    /// Next batch; `None` once the store closed the subscription.
    pub async fn next(&mut self) -> Option<RemoteResult<ChangeBatch>> {
        self.rx.recv().await
    }
}

/// Remote store errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Remote store unavailable: {0}")]
    Unavailable(String),

    #[error("Remote store rejected the request: {0}")]
    Rejected(String),

    #[error("Listen failed: {0}")]
    Listen(String),
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Document CRUD, paged query and change-notification contract of the
/// remote store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn set(&self, id: &str, doc: &RemoteDocument) -> RemoteResult<()>;

    /// Write all documents atomically.
    async fn batch_set(&self, docs: &[(String, RemoteDocument)]) -> RemoteResult<()>;

    async fn get(&self, id: &str) -> RemoteResult<Option<RemoteDocument>>;

    async fn query(&self, query: &RemoteQuery) -> RemoteResult<Page>;

    async fn count(&self, filter: &RemoteFilter) -> RemoteResult<usize>;

    /// Subscribe to changes of the selected documents, ordered by timestamp.
    /// The first batch is a snapshot of everything currently selected.
    async fn subscribe(&self, filter: &RemoteFilter) -> RemoteResult<ChangeStream>;
}
