//! Configuration for the sync engine and its binary.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;
use url::Url;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Host probed to decide whether the remote store is reachable.
pub const DEFAULT_PROBE_URL: &str = "https://firestore.googleapis.com";

/// Largest batch the remote store accepts in one write.
pub const MAX_REMOTE_BATCH_SIZE: usize = 500;

/// Top-level configuration file (`config.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Sync engine tuning.
    #[serde(default)]
    pub sync: SyncSettings,
}

/// Tunables for the sync pipelines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Documents per remote batch write.
    pub batch_size: usize,
    /// Documents per backfill page.
    pub page_size: usize,
    /// A mirrored fall reading younger than this triggers a notification.
    pub fall_alert_window_secs: u64,
    /// Offline upload queue capacity (oldest item dropped beyond this).
    pub offline_queue_capacity: usize,
    /// Failed attempts after which a queued upload is dropped.
    pub offline_queue_max_retries: u32,
    /// Period of the queue retry sweep.
    pub queue_retry_interval_secs: u64,
    /// Period of the reachability probe.
    pub connectivity_poll_interval_secs: u64,
    /// URL whose host/port is probed for reachability.
    pub reachability_probe_url: String,
    /// Probe connect timeout.
    pub probe_timeout_ms: u64,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            batch_size: MAX_REMOTE_BATCH_SIZE,
            page_size: 500,
            fall_alert_window_secs: 15 * 60,
            offline_queue_capacity: 100,
            offline_queue_max_retries: 3,
            queue_retry_interval_secs: 30,
            connectivity_poll_interval_secs: 5,
            reachability_probe_url: DEFAULT_PROBE_URL.to_string(),
            probe_timeout_ms: 3_000,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            sync: SyncSettings::default(),
        }
    }
}

impl Config {
    /// Defaults overridden from the environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load `config.json` from the paths' base directory, falling back to
    /// defaults when the file does not exist. Environment overrides apply last.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    /// Reject settings the pipelines cannot run with.
    pub fn validate(&self) -> CoreResult<()> {
        let sync = &self.sync;
        if sync.batch_size == 0 || sync.batch_size > MAX_REMOTE_BATCH_SIZE {
            return Err(CoreError::InvalidSetting {
                key: "sync.batch_size",
                reason: format!("must be between 1 and {}", MAX_REMOTE_BATCH_SIZE),
            });
        }
        if sync.page_size == 0 {
            return Err(CoreError::InvalidSetting {
                key: "sync.page_size",
                reason: "must be greater than zero".to_string(),
            });
        }
        if sync.offline_queue_capacity == 0 {
            return Err(CoreError::InvalidSetting {
                key: "sync.offline_queue_capacity",
                reason: "must be greater than zero".to_string(),
            });
        }
        self.probe_target()?;
        Ok(())
    }

    /// `host:port` derived from the reachability probe URL.
    pub fn probe_target(&self) -> CoreResult<String> {
        let url = Url::parse(&self.sync.reachability_probe_url)?;
        let host = url
            .host_str()
            .ok_or_else(|| CoreError::Config("probe URL has no host".to_string()))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| CoreError::Config("probe URL has no known port".to_string()))?;
        Ok(format!("{}:{}", host, port))
    }

    fn load_from_env(&mut self) {
        if let Ok(log_level) = std::env::var("POSTURE_SYNC_LOG_LEVEL") {
            self.log_level = log_level;
        }
        if let Some(batch_size) = parse_env_usize("POSTURE_SYNC_BATCH_SIZE") {
            self.sync.batch_size = batch_size;
        }
        if let Some(page_size) = parse_env_usize("POSTURE_SYNC_PAGE_SIZE") {
            self.sync.page_size = page_size;
        }
        if let Ok(url) = std::env::var("POSTURE_SYNC_PROBE_URL") {
            self.sync.reachability_probe_url = url;
        }
    }
}

fn parse_env_usize(name: &str) -> Option<usize> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<usize>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(variable = name, value = %raw, "Ignoring non-numeric override");
            None
        }
    }
}
