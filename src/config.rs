//! Configuration for LodeKV
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{LodeError, Result};

/// Main configuration for a LodeKV instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Directory holding the segment files.
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── sstable_000001.dat
    ///     ├── sstable_000002.dat
    ///     └── sstable_000003.tmp   (only while a write is in flight)
    pub data_dir: PathBuf,

    /// fsync the data directory after every segment rename
    pub sync_dir_on_publish: bool,

    // -------------------------------------------------------------------------
    // MemTable Configuration
    // -------------------------------------------------------------------------
    /// Estimated memtable size (in bytes) at which a write triggers a flush.
    /// Signed so that a negative value can be rejected by `validate`.
    pub flush_threshold: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./lodekv_data"),
            sync_dir_on_publish: true,
            flush_threshold: 4 * 1024 * 1024, // 4 MB
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.flush_threshold < 0 {
            return Err(LodeError::Config(format!(
                "flush threshold must be non-negative, got {}",
                self.flush_threshold
            )));
        }
        if self.data_dir.as_os_str().is_empty() {
            return Err(LodeError::Config("data directory path is empty".to_string()));
        }
        Ok(())
    }

    /// Flush threshold as an unsigned byte count. Only meaningful after `validate`.
    pub(crate) fn flush_threshold_bytes(&self) -> usize {
        usize::try_from(self.flush_threshold).unwrap_or(usize::MAX)
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the flush threshold (in bytes)
    pub fn flush_threshold(mut self, bytes: i64) -> Self {
        self.config.flush_threshold = bytes;
        self
    }

    /// Enable or disable directory fsync after publishing a segment
    pub fn sync_dir_on_publish(mut self, enabled: bool) -> Self {
        self.config.sync_dir_on_publish = enabled;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
