//! Configuration for EmberKV
//!
//! Centralized configuration with sensible defaults.

use crate::error::{EmberError, Result};
use crate::record::RecordEntry;

/// Main configuration for an EmberKV instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Size limit of a single data / tombstone file before rollover (bytes).
    /// Index entries store 32-bit record offsets, so this is a `u32`.
    pub max_file_size: u32,

    /// When to fsync data, index and tombstone files
    pub flush_policy: FlushPolicy,

    // -------------------------------------------------------------------------
    // Compaction Configuration
    // -------------------------------------------------------------------------
    /// Fraction of `max_file_size` that must be stale before a file is
    /// queued for compaction
    pub compaction_threshold_per_file: f64,

    /// Upper bound on bytes copied per second by the compaction worker
    pub compaction_job_rate_bytes_per_sec: u64,

    /// Disable the background compaction worker (tests only)
    pub compaction_disabled: bool,

    // -------------------------------------------------------------------------
    // Index Configuration
    // -------------------------------------------------------------------------
    /// Expected number of keys; sizes the in-memory index up front
    pub number_of_records: usize,

    /// Number of independently locked index shards (power of two, at least 2)
    pub index_shards: usize,

    /// Drop the in-memory index on close instead of leaving it to `Drop`
    pub clean_up_index_on_close: bool,
}

/// File flush strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushPolicy {
    /// Never fsync explicitly while writing; only at rollover and close
    OsDeferred,

    /// fsync once this many bytes were appended since the last flush
    EveryNBytes { bytes: u64 },
}

impl FlushPolicy {
    /// Map the classic `flushDataSizeBytes` setting, where `-1` defers to the OS.
    pub fn from_flush_data_size_bytes(bytes: i64) -> Result<Self> {
        match bytes {
            -1 => Ok(FlushPolicy::OsDeferred),
            b if b > 0 => Ok(FlushPolicy::EveryNBytes { bytes: b as u64 }),
            b => Err(EmberError::Config(format!(
                "flush data size must be -1 or positive, got {}",
                b
            ))),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_file_size: 1024 * 1024 * 1024, // 1 GB
            flush_policy: FlushPolicy::OsDeferred,
            compaction_threshold_per_file: 0.75,
            compaction_job_rate_bytes_per_sec: 50 * 1024 * 1024, // 50 MB/s
            compaction_disabled: false,
            number_of_records: 1 << 20,
            index_shards: 64,
            clean_up_index_on_close: false,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject option combinations the engine cannot honor
    pub fn validate(&self) -> Result<()> {
        let min_file_size = RecordEntry::HEADER_SIZE as u32 + 1;
        if self.max_file_size < min_file_size {
            return Err(EmberError::Config(format!(
                "max_file_size must be at least {} bytes, got {}",
                min_file_size, self.max_file_size
            )));
        }

        if let FlushPolicy::EveryNBytes { bytes: 0 } = self.flush_policy {
            return Err(EmberError::Config(
                "flush threshold must be positive".to_string(),
            ));
        }

        let threshold = self.compaction_threshold_per_file;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(EmberError::Config(format!(
                "compaction_threshold_per_file must be in (0, 1], got {}",
                threshold
            )));
        }

        if self.compaction_job_rate_bytes_per_sec == 0 {
            return Err(EmberError::Config(
                "compaction_job_rate_bytes_per_sec must be positive".to_string(),
            ));
        }

        if self.index_shards < 2 || !self.index_shards.is_power_of_two() {
            return Err(EmberError::Config(format!(
                "index_shards must be a power of two of at least 2, got {}",
                self.index_shards
            )));
        }

        Ok(())
    }

    /// Stale bytes at which a file gets queued for compaction
    pub fn stale_threshold_bytes(&self) -> u64 {
        (self.compaction_threshold_per_file * self.max_file_size as f64) as u64
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the maximum size of a data / tombstone file (in bytes)
    pub fn max_file_size(mut self, size: u32) -> Self {
        self.config.max_file_size = size;
        self
    }

    /// Set the flush policy
    pub fn flush_policy(mut self, policy: FlushPolicy) -> Self {
        self.config.flush_policy = policy;
        self
    }

    /// Set the per-file stale fraction that triggers compaction
    pub fn compaction_threshold_per_file(mut self, fraction: f64) -> Self {
        self.config.compaction_threshold_per_file = fraction;
        self
    }

    /// Set the compaction copy rate (bytes per second)
    pub fn compaction_job_rate_bytes_per_sec(mut self, rate: u64) -> Self {
        self.config.compaction_job_rate_bytes_per_sec = rate;
        self
    }

    /// Disable background compaction
    pub fn compaction_disabled(mut self, disabled: bool) -> Self {
        self.config.compaction_disabled = disabled;
        self
    }

    /// Set the expected number of records (index capacity hint)
    pub fn number_of_records(mut self, count: usize) -> Self {
        self.config.number_of_records = count;
        self
    }

    /// Set the number of index shards
    pub fn index_shards(mut self, shards: usize) -> Self {
        self.config.index_shards = shards;
        self
    }

    /// Clear the in-memory index when the engine closes
    pub fn clean_up_index_on_close(mut self, clean_up: bool) -> Self {
        self.config.clean_up_index_on_close = clean_up;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
