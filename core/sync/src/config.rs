//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use courier_common::{Error, Result};

/// Default key the snapshot is stored under.
pub const DEFAULT_STORAGE_KEY: &str = "courier_offline_queue";

/// Configuration for the delivery engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Maximum number of messages held in the queue.
    pub max_queue_size: usize,
    /// Interval of the periodic sync tick.
    #[serde(with = "duration_ms")]
    pub sync_interval: Duration,
    /// Interval between connectivity probes.
    #[serde(with = "duration_ms")]
    pub probe_interval: Duration,
    /// Number of retries after the first failed attempt.
    pub max_retry_attempts: u32,
    /// Delay inserted between two sends of the same cycle.
    #[serde(with = "duration_ms")]
    pub send_pacing: Duration,
    /// Whether the queue is persisted through the configured store.
    pub persist_queue: bool,
    /// Key the snapshot is stored under.
    pub storage_key: String,
    /// Snapshots older than this are discarded at startup.
    #[serde(with = "duration_ms")]
    pub snapshot_max_age: Duration,
    /// Connectivity state assumed before the first reading arrives.
    pub assume_online: bool,
}

impl SyncConfig {
    /// Set the queue capacity.
    pub fn with_max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size;
        self
    }

    /// Set the periodic sync interval.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Set the connectivity probe interval.
    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    /// Set the retry budget.
    pub fn with_max_retry_attempts(mut self, attempts: u32) -> Self {
        self.max_retry_attempts = attempts;
        self
    }

    /// Set the delay between sends.
    pub fn with_send_pacing(mut self, pacing: Duration) -> Self {
        self.send_pacing = pacing;
        self
    }

    /// Enable or disable persistence.
    pub fn with_persist_queue(mut self, persist: bool) -> Self {
        self.persist_queue = persist;
        self
    }

    /// Set the storage key.
    pub fn with_storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = key.into();
        self
    }

    /// Set the snapshot staleness window.
    pub fn with_snapshot_max_age(mut self, age: Duration) -> Self {
        self.snapshot_max_age = age;
        self
    }

    /// Set the initial connectivity assumption.
    pub fn with_assume_online(mut self, online: bool) -> Self {
        self.assume_online = online;
        self
    }

    /// Check the configuration for values the engine cannot run with.
    ///
    /// # Errors
    /// - Zero queue capacity, zero intervals, empty storage key or zero event capacity
    pub fn validate(&self) -> Result<()> {
        if self.max_queue_size == 0 {
            return Err(Error::Config("max_queue_size must be at least 1".to_string()));
        }
        if self.sync_interval.is_zero() {
            return Err(Error::Config("sync_interval must be non-zero".to_string()));
        }
        if self.probe_interval.is_zero() {
            return Err(Error::Config("probe_interval must be non-zero".to_string()));
        }
        if self.persist_queue && self.storage_key.trim().is_empty() {
            return Err(Error::Config("storage_key cannot be empty".to_string()));
        }
        Ok(())
    }

    /// Parse a JSON configuration document. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 10_000,
            sync_interval: Duration::from_secs(5),
            probe_interval: Duration::from_secs(5),
            max_retry_attempts: 3,
            send_pacing: Duration::from_millis(100),
            persist_queue: true,
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            snapshot_max_age: Duration::from_secs(24 * 60 * 60),
            assume_online: true,
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
