//! Progress and result events.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::PipelineState;

const EVENT_CAPACITY: usize = 256;

/// Something the engine did that a UI or log may want to show.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    ConnectivityChanged {
        online: bool,
    },
    PipelineChanged {
        from: PipelineState,
        to: PipelineState,
    },
    /// One upload partition finished (successfully or not).
    UploadProgress {
        partition: usize,
        total_partitions: usize,
        uploaded: usize,
        failed: bool,
    },
    UploadFinished {
        uploaded: usize,
        failed_partitions: usize,
    },
    BackfillPage {
        remote_id: String,
        page: usize,
        fetched: usize,
        inserted: usize,
    },
    BackfillFinished {
        remote_id: String,
        inserted: usize,
    },
    MirrorStarted {
        remote_id: String,
    },
    MirrorStopped {
        remote_id: String,
        reason: String,
    },
    MirrorApplied {
        remote_id: String,
        inserted: usize,
    },
    QueueDrained {
        delivered: usize,
        remaining: usize,
    },
    /// A queued upload was dropped for good.
    UploadDropped {
        upload_id: String,
        readings: usize,
        reason: String,
    },
    FallAlert {
        remote_id: String,
        timestamp: i64,
    },
}

/// Broadcast fan-out of [`SyncEvent`]s. Publishing without subscribers is a no-op.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, event: SyncEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_subscribers() {
        let bus = EventBus::new();
        bus.publish(SyncEvent::ConnectivityChanged { online: false });

        let mut rx = bus.subscribe();
        bus.publish(SyncEvent::MirrorStarted {
            remote_id: "s1".into(),
        });
        assert_eq!(
            rx.recv().await.unwrap(),
            SyncEvent::MirrorStarted {
                remote_id: "s1".into()
            }
        );
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(SyncEvent::QueueDrained {
            delivered: 2,
            remaining: 0,
        })
        .unwrap();
        assert_eq!(json["type"], "queue_drained");
        assert_eq!(json["delivered"], 2);
    }
}
