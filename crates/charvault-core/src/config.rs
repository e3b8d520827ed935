//! Store configuration
//!
//! Plain serde struct with defaults for every field, so a config file
//! only needs to name what it overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dedup::DedupPolicy;
use crate::error::StoreResult;
use crate::events::EVENT_CHANNEL_CAPACITY;
use crate::retry::RetryPolicy;

/// Configuration for a `HybridStore`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding the local database
    pub data_dir: PathBuf,
    /// Database file name inside `data_dir`
    pub db_file_name: String,
    /// Time budget for any single remote call
    pub remote_timeout_ms: u64,
    /// Attempts when loading an image that may not be visible yet
    pub image_retry_attempts: u32,
    /// First backoff delay for image loads
    pub image_retry_base_delay_ms: u64,
    /// Identity and tie-break rules for merges
    pub dedup_policy: DedupPolicy,
    /// Buffered events per subscriber before the slowest one lags
    pub event_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            db_file_name: "charvault.redb".to_string(),
            remote_timeout_ms: 10_000,
            image_retry_attempts: 3,
            image_retry_base_delay_ms: 100,
            dedup_policy: DedupPolicy::default(),
            event_capacity: EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl StoreConfig {
    /// Defaults rooted at `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Read a JSON config file. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read(path)?;
        Ok(serde_json::from_slice(&data)?)
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(&self.db_file_name)
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }

    pub fn image_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.image_retry_attempts,
            base_delay: Duration::from_millis(self.image_retry_base_delay_ms),
            ..RetryPolicy::default()
        }
    }
}
