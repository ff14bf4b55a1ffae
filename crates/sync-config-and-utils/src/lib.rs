//! Configuration, filesystem paths, and logging setup for the posture sync engine.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{
    Config, SyncSettings, DEFAULT_LOG_LEVEL, DEFAULT_PROBE_URL, MAX_REMOTE_BATCH_SIZE,
};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, parse_level};
pub use paths::Paths;
