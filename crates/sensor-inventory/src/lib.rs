//! Sensor inventory: which physical sensors exist, who owns them and what
//! they are called.
//!
//! Sensor records live remotely, keyed by sensor id. Each device keeps a
//! local copy of the display names so readings can be shown by name while
//! offline. Collectors register and rename their sensors; both roles
//! download the names of the sensors they see.

mod error;
mod memory;
mod service;
mod store;
mod types;

pub use error::{InventoryError, InventoryResult};
pub use memory::{MemorySensorDirectory, MemorySensorNames};
pub use service::{SensorInventoryService, MAX_IDS_PER_QUERY};
pub use store::{SensorDirectory, SensorNameStore};
pub use types::SensorRecord;
