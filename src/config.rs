//! Configuration for chainkv
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::block::BlockLayout;
use crate::error::{ChainError, Result};

/// Main configuration for a chainkv instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files.
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── blocks.dat   (fixed-size block file)
    ///     └── index.dat    (fixed 9-byte index records)
    pub data_dir: PathBuf,

    /// Size of one on-disk block in bytes (header included)
    pub block_size: usize,

    /// Whether every occupied block also carries the owning key hash in its
    /// header. A layout decision made once per data file; chains written with
    /// one setting cannot be read with the other.
    pub stamp_key_hash: bool,

    // -------------------------------------------------------------------------
    // Index Configuration
    // -------------------------------------------------------------------------
    /// Minimum branching degree of the in-memory index search tree
    pub min_degree: usize,

    // -------------------------------------------------------------------------
    // I/O Configuration
    // -------------------------------------------------------------------------
    /// Number of worker threads in the disk I/O pool
    pub io_threads: usize,

    // -------------------------------------------------------------------------
    // Cache Configuration
    // -------------------------------------------------------------------------
    /// TTL for resolved values in the database-level cache (0 = never expire)
    pub value_ttl_ms: u64,

    /// TTL for index lookups in the database-level cache (0 = never expire)
    pub index_ttl_ms: u64,

    /// Interval of the background sweep removing expired cache entries
    /// (0 = lazy eviction only)
    pub sweep_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./chainkv_data"),
            block_size: 128,
            stamp_key_hash: false,
            min_degree: 5,
            io_threads: 4,
            value_ttl_ms: 30_000,
            index_ttl_ms: 30_000,
            sweep_interval_ms: 60_000,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// The block layout implied by this configuration
    pub fn block_layout(&self) -> BlockLayout {
        BlockLayout::new(self.block_size, self.stamp_key_hash)
    }

    /// Validate configuration invariants
    pub fn validate(&self) -> Result<()> {
        let layout = self.block_layout();
        if layout.payload_size() < 1 {
            return Err(ChainError::IllegalState(format!(
                "block size {} leaves no payload room (header is {} bytes)",
                self.block_size,
                layout.header_size()
            )));
        }
        if self.min_degree < 2 {
            return Err(ChainError::IllegalState(format!(
                "index tree minimum degree must be at least 2, got {}",
                self.min_degree
            )));
        }
        if self.io_threads < 1 {
            return Err(ChainError::IllegalState(
                "I/O pool needs at least one worker thread".to_string(),
            ));
        }
        Ok(())
    }

    /// Value-cache TTL as a `Duration` (`None` = never expire)
    pub fn value_ttl(&self) -> Option<Duration> {
        duration_from_ms(self.value_ttl_ms)
    }

    /// Index-cache TTL as a `Duration` (`None` = never expire)
    pub fn index_ttl(&self) -> Option<Duration> {
        duration_from_ms(self.index_ttl_ms)
    }

    /// Sweep interval as a `Duration` (`None` = lazy eviction only)
    pub fn sweep_interval(&self) -> Option<Duration> {
        duration_from_ms(self.sweep_interval_ms)
    }
}

fn duration_from_ms(ms: u64) -> Option<Duration> {
    if ms == 0 {
        None
    } else {
        Some(Duration::from_millis(ms))
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the on-disk block size in bytes
    pub fn block_size(mut self, size: usize) -> Self {
        self.config.block_size = size;
        self
    }

    /// Enable or disable per-block key-hash stamping
    pub fn stamp_key_hash(mut self, stamp: bool) -> Self {
        self.config.stamp_key_hash = stamp;
        self
    }

    /// Set the index tree minimum branching degree
    pub fn min_degree(mut self, degree: usize) -> Self {
        self.config.min_degree = degree;
        self
    }

    /// Set the number of I/O pool worker threads
    pub fn io_threads(mut self, threads: usize) -> Self {
        self.config.io_threads = threads;
        self
    }

    /// Set the value-cache TTL in milliseconds (0 = never expire)
    pub fn value_ttl_ms(mut self, ms: u64) -> Self {
        self.config.value_ttl_ms = ms;
        self
    }

    /// Set the index-cache TTL in milliseconds (0 = never expire)
    pub fn index_ttl_ms(mut self, ms: u64) -> Self {
        self.config.index_ttl_ms = ms;
        self
    }

    /// Set the cache sweep interval in milliseconds (0 = lazy eviction only)
    pub fn sweep_interval_ms(mut self, ms: u64) -> Self {
        self.config.sweep_interval_ms = ms;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
