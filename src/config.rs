//! Node and storage configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Process-wide storage settings. Every field has a default so partial JSON
/// files are accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Physical storage locations; new tables are balanced across them.
    pub storage_directories: Vec<PathBuf>,

    /// Maximum number of tuples in a memtable before it is rotated.
    pub memtable_entries_max: usize,

    /// Maximum memtable size in bytes before it is rotated.
    pub memtable_size_max: usize,

    /// Flush worker threads per storage location.
    pub flush_threads_per_storage: usize,

    pub write_ahead_log: bool,

    /// Tolerated clock difference between replicas, used by recovery.
    pub max_clock_skew_ms: u64,

    /// Attempts for lookups that wait on the coordination service.
    pub operation_retry: usize,

    pub acquire_retry: usize,
    pub acquire_retry_delay_ms: u64,

    /// Pause between background compaction runs. 0 disables them.
    pub compaction_interval_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            storage_directories: vec![PathBuf::from("data")],
            memtable_entries_max: 50_000,
            memtable_size_max: 128 * 1024 * 1024,
            flush_threads_per_storage: 1,
            write_ahead_log: true,
            max_clock_skew_ms: 5_000,
            operation_retry: 10,
            acquire_retry: 10,
            acquire_retry_delay_ms: 10,
            compaction_interval_ms: 60_000,
        }
    }
}

impl StoreConfig {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: StoreConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_directories(directories: Vec<PathBuf>) -> Self {
        Self {
            storage_directories: directories,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.storage_directories.is_empty() {
            anyhow::bail!("at least one storage directory is required");
        }
        if self.memtable_entries_max == 0 {
            anyhow::bail!("memtable_entries_max must be > 0");
        }
        if self.flush_threads_per_storage == 0 {
            anyhow::bail!("flush_threads_per_storage must be > 0");
        }
        Ok(())
    }

    pub fn acquire_retry_delay(&self) -> Duration {
        Duration::from_millis(self.acquire_retry_delay_ms)
    }
}
