//! Local store for posture readings.
//!
//! This crate provides:
//! - `Reading`: one immutable, timestamped sample owned by an identity
//! - `Posture`: classification of a reading's payload code
//! - `LocalStore`: the read/write contract the sync pipelines depend on
//! - `SqliteReadingStore`: SQLite implementation on a dedicated executor thread,
//!   also holding the per-identity "last selected role" preference and
//!   sensor display names

mod error;
mod posture;
mod sqlite;
mod store;
mod types;

pub use error::{StoreError, StoreResult};
pub use posture::Posture;
pub use sqlite::SqliteReadingStore;
pub use store::{LocalStore, LocalStoreHandle};
pub use types::{Reading, SensorName, DEFAULT_SENSOR_ID};
