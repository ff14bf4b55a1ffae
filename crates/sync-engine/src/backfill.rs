//! Cursor-paged backfill from the local high-water mark.
//!
//! Pages are ordered by `(timestamp, id)` and applied strictly in order:
//! each page's cursor is the last document of the previous one. A page
//! shorter than the page size ends the run. Local inserts are idempotent, so
//! re-running a backfill over already applied pages changes nothing.

use std::sync::Arc;

use reading_store::{LocalStoreHandle, Reading};
use tracing::{debug, info, warn};

use crate::remote::{RemoteFilter, RemoteQuery, RemoteStore};
use crate::{EventBus, SyncError, SyncEvent, SyncResult};

#[derive(Debug, Clone)]
pub struct BackfillConfig {
    pub page_size: usize,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self { page_size: 500 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillReport {
    pub remote_id: String,
    /// Lower bound used (exclusive).
    pub high_water_mark: i64,
    pub pages: usize,
    pub fetched: usize,
    pub inserted: usize,
}

#[derive(Debug, Clone, Default)]
pub struct PurgeReport {
    /// Local rows deleted because their owner is no longer authorized.
    pub purged: usize,
    pub backfilled: Vec<BackfillReport>,
    /// Remote identities whose backfill failed, with the error.
    pub failed: Vec<(String, String)>,
}

impl PurgeReport {
    pub fn inserted(&self) -> usize {
        self.backfilled.iter().map(|r| r.inserted).sum()
    }
}

#[derive(Clone)]
pub struct Backfill {
    remote: Arc<dyn RemoteStore>,
    local: LocalStoreHandle,
    events: EventBus,
    config: BackfillConfig,
}

impl Backfill {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        local: LocalStoreHandle,
        events: EventBus,
        config: BackfillConfig,
    ) -> Self {
        Self {
            remote,
            local,
            events,
            config,
        }
    }

    /// Pull everything for `remote_id` newer than `high_water_mark`.
    pub async fn backfill_since(&self, remote_id: &str, high_water_mark: i64) -> SyncResult<BackfillReport> {
        self.run(
            RemoteFilter::Sensor(remote_id.to_string()),
            remote_id,
            high_water_mark,
            self.config.page_size,
        )
        .await
    }

    /// Backfill from the local high-water mark of `remote_id`.
    pub async fn backfill(&self, remote_id: &str) -> SyncResult<BackfillReport> {
        self.backfill_paged(remote_id, self.config.page_size).await
    }

    /// Backfill from the local high-water mark with an explicit page size.
    pub async fn backfill_paged(&self, remote_id: &str, page_size: usize) -> SyncResult<BackfillReport> {
        let hwm = self
            .local
            .max_timestamp_for(remote_id)
            .await
            .map_err(SyncError::local_read)?;
        self.run(
            RemoteFilter::Sensor(remote_id.to_string()),
            remote_id,
            hwm,
            page_size,
        )
        .await
    }

    /// Collector cold start: pull back what this identity uploaded earlier.
    pub async fn backfill_own(&self, identity: &str) -> SyncResult<BackfillReport> {
        let hwm = self
            .local
            .max_timestamp_for(identity)
            .await
            .map_err(SyncError::local_read)?;
        self.run(
            RemoteFilter::Uploader(identity.to_string()),
            identity,
            hwm,
            self.config.page_size,
        )
        .await
    }

    /// Delete local rows of identities outside `authorized` and `keep`, then
    /// backfill every authorized identity. One identity failing does not stop
    /// the others.
    pub async fn purge_and_backfill(&self, authorized: &[String], keep: &[String]) -> SyncResult<PurgeReport> {
        let mut owners: Vec<String> = authorized.iter().chain(keep.iter()).cloned().collect();
        owners.sort();
        owners.dedup();

        let purged = self.local.delete_where_owner_not_in(&owners).await?;
        if purged > 0 {
            info!(purged, kept_owners = owners.len(), "Purged de-authorized readings");
        }

        let mut report = PurgeReport {
            purged,
            ..Default::default()
        };
        for remote_id in authorized {
            match self.backfill(remote_id).await {
                Ok(r) => report.backfilled.push(r),
                Err(e) => {
                    warn!(remote_id = %remote_id, error = %e, "Backfill failed");
                    report.failed.push((remote_id.clone(), e.to_string()));
                }
            }
        }
        Ok(report)
    }

    async fn run(
        &self,
        filter: RemoteFilter,
        owner_id: &str,
        high_water_mark: i64,
        page_size: usize,
    ) -> SyncResult<BackfillReport> {
        let page_size = page_size.max(1);
        let mut report = BackfillReport {
            remote_id: owner_id.to_string(),
            high_water_mark,
            ..Default::default()
        };
        let mut query = RemoteQuery {
            filter,
            after_timestamp: Some(high_water_mark),
            cursor: None,
            limit: page_size,
        };

        loop {
            let page = self
                .remote
                .query(&query)
                .await
                .map_err(|e| SyncError::RemoteReadFailed(e.to_string()))?;
            let fetched = page.documents.len();
            let readings: Vec<Reading> = page
                .documents
                .iter()
                .map(|(_, doc)| doc.to_reading(owner_id))
                .collect();
            let inserted = if readings.is_empty() {
                0
            } else {
                self.local.insert_all(&readings).await?
            };

            report.pages += 1;
            report.fetched += fetched;
            report.inserted += inserted;
            self.events.publish(SyncEvent::BackfillPage {
                remote_id: owner_id.to_string(),
                page: report.pages,
                fetched,
                inserted,
            });
            debug!(remote_id = owner_id, page = report.pages, fetched, inserted, "Backfill page applied");

            if fetched < page_size {
                break;
            }
            match page.next_cursor {
                Some(cursor) => query.cursor = Some(cursor),
                None => break,
            }
        }

        self.events.publish(SyncEvent::BackfillFinished {
            remote_id: owner_id.to_string(),
            inserted: report.inserted,
        });
        info!(
            remote_id = owner_id,
            high_water_mark,
            pages = report.pages,
            inserted = report.inserted,
            "Backfill finished"
        );
        Ok(report)
    }
}
