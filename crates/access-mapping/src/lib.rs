//! Authorization mapping between viewers and the remote identities they may mirror.
//!
//! Assignments are the only source of truth for viewer authorization. The
//! service never caches them, so an unassignment is visible to the next lookup.

mod error;
mod memory;
mod service;
mod store;
mod types;

pub use error::{AccessError, AccessResult};
pub use memory::{MemoryAssignmentStore, MemoryViewerDirectory};
pub use service::AccessMappingService;
pub use store::{AssignmentStore, ViewerDirectory};
pub use types::{AssignOutcome, Assignment, ViewerProfile};
