//! Idempotent write path: deterministic ids and partitioned batch upserts.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use reading_store::Reading;
use sync_config_and_utils::MAX_REMOTE_BATCH_SIZE;
use tracing::{debug, info, warn};

use crate::remote::{
    partition_count, remote_document_id, RemoteDocument, RemoteFilter, RemoteQuery, RemoteStore,
};
use crate::{EventBus, SyncError, SyncEvent, SyncResult};

#[derive(Debug, Clone)]
pub struct WritePathConfig {
    /// Documents per batch write, at most the remote limit.
    pub batch_size: usize,
    /// Page size when listing existing remote ids.
    pub page_size: usize,
}

impl Default for WritePathConfig {
    fn default() -> Self {
        Self {
            batch_size: MAX_REMOTE_BATCH_SIZE,
            page_size: 500,
        }
    }
}

/// A partition whose batch write failed. Sibling partitions are unaffected.
#[derive(Debug, Clone)]
pub struct FailedPartition {
    /// 1-based partition number.
    pub index: usize,
    pub readings: Vec<Reading>,
    pub error: String,
}

/// Outcome of a partitioned upload.
#[derive(Debug, Clone, Default)]
pub struct UploadReport {
    /// Readings considered after de-duplication.
    pub total: usize,
    pub uploaded: usize,
    /// Already present remotely and skipped.
    pub skipped: usize,
    pub partitions: usize,
    pub failed: Vec<FailedPartition>,
}

impl UploadReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Readings of every failed partition, in order.
    pub fn failed_readings(&self) -> Vec<Reading> {
        self.failed
            .iter()
            .flat_map(|p| p.readings.iter().cloned())
            .collect()
    }
}

/// Uploads readings to the remote store.
#[derive(Clone)]
pub struct WritePath {
    remote: Arc<dyn RemoteStore>,
    events: EventBus,
    config: WritePathConfig,
}

impl WritePath {
    pub fn new(remote: Arc<dyn RemoteStore>, events: EventBus, config: WritePathConfig) -> Self {
        let batch_size = config.batch_size.clamp(1, MAX_REMOTE_BATCH_SIZE);
        Self {
            remote,
            events,
            config: WritePathConfig {
                batch_size,
                ..config
            },
        }
    }

    pub fn batch_size(&self) -> usize {
        self.config.batch_size
    }

    /// Single-document upsert for a fresh reading. Skips the existence check;
    /// the deterministic id de-duplicates on the server.
    pub async fn upload_one(&self, reading: &Reading, uploader_id: &str) -> SyncResult<String> {
        let doc = RemoteDocument::from_reading(reading, uploader_id, Utc::now().timestamp_millis());
        let id = doc.id();
        self.remote
            .set(&id, &doc)
            .await
            .map_err(|e| SyncError::RemoteWriteFailed(e.to_string()))?;
        debug!(id = %id, uploader_id, "Reading uploaded");
        Ok(id)
    }

    /// Upload readings in partitions of `batch_size`. Each partition commits
    /// or fails on its own; every partition is attempted.
    pub async fn upload_batch(&self, readings: &[Reading], uploader_id: &str) -> UploadReport {
        let synced_at = Utc::now().timestamp_millis();
        let mut seen = HashSet::new();
        let unique: Vec<(String, RemoteDocument, &Reading)> = readings
            .iter()
            .filter_map(|reading| {
                let doc = RemoteDocument::from_reading(reading, uploader_id, synced_at);
                let id = doc.id();
                seen.insert(id.clone()).then_some((id, doc, reading))
            })
            .collect();

        let total_partitions = partition_count(unique.len(), self.config.batch_size);
        let mut report = UploadReport {
            total: unique.len(),
            partitions: total_partitions,
            ..Default::default()
        };

        for (i, chunk) in unique.chunks(self.config.batch_size).enumerate() {
            let index = i + 1;
            let docs: Vec<(String, RemoteDocument)> = chunk
                .iter()
                .map(|(id, doc, _)| (id.clone(), doc.clone()))
                .collect();

            let failed = match self.remote.batch_set(&docs).await {
                Ok(()) => {
                    report.uploaded += docs.len();
                    debug!(partition = index, total_partitions, documents = docs.len(), "Partition committed");
                    false
                }
                Err(e) => {
                    warn!(
                        partition = index,
                        total_partitions,
                        documents = docs.len(),
                        error = %e,
                        "Partition failed"
                    );
                    report.failed.push(FailedPartition {
                        index,
                        readings: chunk.iter().map(|(_, _, r)| (*r).clone()).collect(),
                        error: e.to_string(),
                    });
                    true
                }
            };

            self.events.publish(SyncEvent::UploadProgress {
                partition: index,
                total_partitions,
                uploaded: report.uploaded,
                failed,
            });
        }

        if total_partitions > 0 {
            self.events.publish(SyncEvent::UploadFinished {
                uploaded: report.uploaded,
                failed_partitions: report.failed.len(),
            });
            info!(
                uploader_id,
                uploaded = report.uploaded,
                partitions = total_partitions,
                failed_partitions = report.failed.len(),
                "Batch upload finished"
            );
        }
        report
    }

    /// Ids the uploader already has remotely, read page by page.
    pub async fn existing_ids(&self, uploader_id: &str) -> SyncResult<HashSet<String>> {
        let mut ids = HashSet::new();
        let mut query = RemoteQuery {
            filter: RemoteFilter::Uploader(uploader_id.to_string()),
            after_timestamp: None,
            cursor: None,
            limit: self.config.page_size.max(1),
        };

        loop {
            let page = self
                .remote
                .query(&query)
                .await
                .map_err(|e| SyncError::RemoteReadFailed(e.to_string()))?;
            let fetched = page.documents.len();
            ids.extend(page.documents.into_iter().map(|(id, _)| id));
            if fetched < query.limit {
                break;
            }
            match page.next_cursor {
                Some(cursor) => query.cursor = Some(cursor),
                None => break,
            }
        }
        Ok(ids)
    }

    /// Bulk catch-up: upload only readings whose id the uploader does not
    /// already have remotely.
    pub async fn upload_missing(
        &self,
        readings: &[Reading],
        uploader_id: &str,
    ) -> SyncResult<UploadReport> {
        if readings.is_empty() {
            return Ok(UploadReport::default());
        }

        let existing = self.existing_ids(uploader_id).await?;
        let missing: Vec<Reading> = readings
            .iter()
            .filter(|r| {
                !existing.contains(&remote_document_id(&r.source_address, &r.sensor_id, r.timestamp))
            })
            .cloned()
            .collect();
        let skipped = readings.len() - missing.len();
        debug!(uploader_id, missing = missing.len(), skipped, "Computed upload complement");

        let mut report = self.upload_batch(&missing, uploader_id).await;
        report.skipped = skipped;
        Ok(report)
    }
}
