//! Offline upload queue for collector readings.
//!
//! Readings produced while the collector cannot reach the remote store are
//! queued here and drained on reconnect:
//! - FIFO order, bounded capacity, oldest item evicted on overflow
//! - per-item retry count, items dropped once the cap is reached
//! - in-flight tracking so a failed attempt goes back to the front

mod error;
mod queue;

pub use error::{QueueError, QueueResult};
pub use queue::{
    EnqueueOutcome, OfflineQueue, QueueConfig, QueueStatus, QueuedUpload, RetryOutcome,
    DEFAULT_MAX_RETRIES, DEFAULT_QUEUE_CAPACITY,
};
