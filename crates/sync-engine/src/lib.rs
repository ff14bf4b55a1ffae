//! Sync engine for posture readings.
//!
//! This crate provides:
//! - `ConnectivityMonitor`: de-duplicated online/offline transitions with
//!   isolated listeners, fed by a `ReachabilitySource` poller
//! - `RemoteStore`: the document store contract, with `MemoryRemoteStore`
//! - `WritePath`: deterministic document ids and partitioned, idempotent uploads
//! - `MirrorManager`: one live subscription per authorized remote identity
//! - `Backfill`: cursor-paged catch-up from the local high-water mark
//! - `SyncOrchestrator`: composes the above by connectivity and selected role,
//!   tracked as a `PipelineState` and reported on the `EventBus`

mod backfill;
mod connectivity;
mod error;
mod events;
mod memory;
mod mirror;
mod notify;
mod orchestrator;
mod pipeline;
mod remote;
mod write_path;

#[cfg(test)]
mod tests;

pub use backfill::{Backfill, BackfillConfig, BackfillReport, PurgeReport};
pub use connectivity::{
    spawn_poller, ConnectivityListener, ConnectivityMonitor, ListenerToken, ManualReachability,
    ReachabilitySource, TcpProbe,
};
pub use error::{SyncError, SyncResult};
pub use events::{EventBus, SyncEvent};
pub use memory::MemoryRemoteStore;
pub use mirror::{ApplyOutcome, MirrorConfig, MirrorManager, MirrorStart};
pub use notify::{FallNotifier, LogNotifier, NullNotifier, ViewerContext};
pub use orchestrator::{
    CloudComparison, DrainReport, FullSyncReport, QueueReason, RecordOutcome, SyncConfig,
    SyncOrchestrator,
};
pub use pipeline::{PipelineMachine, PipelineMachineInput, PipelineMachineState, PipelineState};
pub use remote::{
    partition_count, remote_document_id, ChangeBatch, ChangeKind, ChangeStream, Cursor,
    DocumentChange, Page, RemoteDocument, RemoteError, RemoteFilter, RemoteQuery, RemoteResult,
    RemoteStore, READINGS_COLLECTION,
};
pub use write_path::{FailedPartition, UploadReport, WritePath, WritePathConfig};
