//! Offline upload queue.

use crate::{QueueError, QueueResult};
use chrono::{DateTime, Utc};
use reading_store::Reading;
use serde::Serialize;
use std::collections::VecDeque;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Default number of queued uploads kept before the oldest is evicted.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Default number of failed attempts after which an upload is dropped.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Queue limits.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum pending uploads.
    pub capacity: usize,
    /// Failed attempts before an upload is dropped.
    pub max_retries: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_QUEUE_CAPACITY,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// Readings waiting for upload, in the order they were produced.
#[derive(Debug, Clone, Serialize)]
pub struct QueuedUpload {
    /// Unique upload ID.
    pub upload_id: String,
    pub readings: Vec<Reading>,
    /// Failed attempts so far.
    pub retry_count: u32,
    pub enqueued_at: DateTime<Utc>,
}

/// Result of [`OfflineQueue::enqueue`].
#[derive(Debug)]
pub struct EnqueueOutcome {
    pub upload_id: String,
    /// Oldest upload dropped to make room, if the queue was full.
    pub evicted: Option<QueuedUpload>,
}

/// Result of [`OfflineQueue::retry`].
#[derive(Debug)]
pub enum RetryOutcome {
    /// Back at the front of the queue.
    Requeued { retry_count: u32 },
    /// Retry cap reached; the upload was removed.
    Exhausted(QueuedUpload),
    /// The queue filled up while the upload was in flight; being the oldest
    /// item, it was dropped.
    Evicted(QueuedUpload),
}

/// Status of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub pending: usize,
    pub in_flight: usize,
}

/// Bounded FIFO of uploads awaiting connectivity.
pub struct OfflineQueue {
    config: QueueConfig,
    pending: Mutex<VecDeque<QueuedUpload>>,
    in_flight: Mutex<Vec<QueuedUpload>>,
}

impl OfflineQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            pending: Mutex::new(VecDeque::new()),
            in_flight: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Append an upload at the back, evicting the oldest pending upload when
    /// the queue is full.
    pub async fn enqueue(&self, readings: Vec<Reading>) -> QueueResult<EnqueueOutcome> {
        if readings.is_empty() {
            return Err(QueueError::EmptyUpload);
        }

        let upload = QueuedUpload {
            upload_id: uuid::Uuid::new_v4().to_string(),
            readings,
            retry_count: 0,
            enqueued_at: Utc::now(),
        };
        let upload_id = upload.upload_id.clone();

        let mut pending = self.pending.lock().await;
        let evicted = if pending.len() >= self.config.capacity {
            pending.pop_front()
        } else {
            None
        };
        if let Some(dropped) = &evicted {
            warn!(
                upload_id = %dropped.upload_id,
                readings = dropped.readings.len(),
                capacity = self.config.capacity,
                "Offline queue full, evicted oldest upload"
            );
        }
        let count = upload.readings.len();
        pending.push_back(upload);

        debug!(upload_id = %upload_id, readings = count, pending = pending.len(), "Queued upload");
        Ok(EnqueueOutcome { upload_id, evicted })
    }

    /// Take the oldest pending upload and mark it in flight.
    pub async fn next(&self) -> Option<QueuedUpload> {
        let upload = self.pending.lock().await.pop_front()?;
        self.in_flight.lock().await.push(upload.clone());
        Some(upload)
    }

    /// Mark an in-flight upload as delivered.
    pub async fn acknowledge(&self, upload_id: &str) -> QueueResult<()> {
        let mut in_flight = self.in_flight.lock().await;
        let before = in_flight.len();
        in_flight.retain(|u| u.upload_id != upload_id);
        if in_flight.len() == before {
            return Err(QueueError::UnknownUpload(upload_id.to_string()));
        }

        info!(upload_id = %upload_id, "Queued upload delivered");
        Ok(())
    }

    /// Return a failed in-flight upload to the front of the queue, or drop it
    /// once it has failed `max_retries` times.
    pub async fn retry(&self, mut upload: QueuedUpload) -> RetryOutcome {
        self.in_flight
            .lock()
            .await
            .retain(|u| u.upload_id != upload.upload_id);

        upload.retry_count += 1;
        if upload.retry_count >= self.config.max_retries {
            warn!(
                upload_id = %upload.upload_id,
                retry_count = upload.retry_count,
                "Queued upload exhausted its retries"
            );
            return RetryOutcome::Exhausted(upload);
        }

        let mut pending = self.pending.lock().await;
        if pending.len() >= self.config.capacity {
            warn!(upload_id = %upload.upload_id, "Queue full on retry, dropping oldest upload");
            return RetryOutcome::Evicted(upload);
        }

        let retry_count = upload.retry_count;
        debug!(upload_id = %upload.upload_id, retry_count, "Upload returned for retry");
        pending.push_front(upload);
        RetryOutcome::Requeued { retry_count }
    }

    /// Drop everything, pending and in flight. Returns the removed uploads,
    /// in-flight first, then pending in queue order.
    pub async fn clear(&self) -> Vec<QueuedUpload> {
        let mut pending = self.pending.lock().await;
        let mut in_flight = self.in_flight.lock().await;
        let mut removed: Vec<QueuedUpload> = in_flight.drain(..).collect();
        removed.extend(pending.drain(..));
        removed
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn in_flight_count(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    /// Check if the queue is empty (no pending or in-flight).
    pub async fn is_empty(&self) -> bool {
        self.pending_count().await == 0 && self.in_flight_count().await == 0
    }

    pub async fn status(&self) -> QueueStatus {
        QueueStatus {
            pending: self.pending_count().await,
            in_flight: self.in_flight_count().await,
        }
    }

    /// Upload IDs in queue order (front first).
    pub async fn pending_ids(&self) -> Vec<String> {
        self.pending
            .lock()
            .await
            .iter()
            .map(|u| u.upload_id.clone())
            .collect()
    }
}

impl Default for OfflineQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}
