//! Configuration for BucketKV
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{KvsError, Result};

/// Main configuration for a BucketKV instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Store Limits
    // -------------------------------------------------------------------------
    /// Max length (in bytes) of a key or a value
    pub max_key_len: usize,

    /// Max number of keys (or pairs) accepted by one batched command
    pub max_batch_pairs: usize,

    // -------------------------------------------------------------------------
    // Batch Configuration
    // -------------------------------------------------------------------------
    /// Directory scanned for `*.job` files
    pub jobs_dir: PathBuf,

    /// Number of threads processing job files
    pub worker_threads: usize,

    /// Max backup workers alive at the same time
    pub max_backups: usize,

    // -------------------------------------------------------------------------
    // Session Configuration
    // -------------------------------------------------------------------------
    /// Registration FIFO path. `None` runs in batch-only mode.
    pub registry_path: Option<PathBuf>,

    /// Max concurrently connected clients
    pub max_sessions: usize,

    /// Max keys a single client may be subscribed to
    pub max_subscriptions: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_key_len: 40,
            max_batch_pairs: 256,
            jobs_dir: PathBuf::from("./jobs"),
            worker_threads: 1,
            max_backups: 1,
            registry_path: None,
            max_sessions: 4,
            max_subscriptions: 10,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject limits that would leave a pool or queue with no capacity
    pub fn validate(&self) -> Result<()> {
        if self.worker_threads == 0 {
            return Err(KvsError::Config("worker_threads must be at least 1".into()));
        }
        if self.max_backups == 0 {
            return Err(KvsError::Config("max_backups must be at least 1".into()));
        }
        if self.max_sessions == 0 {
            return Err(KvsError::Config("max_sessions must be at least 1".into()));
        }
        if self.max_key_len == 0 || self.max_batch_pairs == 0 {
            return Err(KvsError::Config("key and batch limits must be non-zero".into()));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the max key/value length (in bytes)
    pub fn max_key_len(mut self, len: usize) -> Self {
        self.config.max_key_len = len;
        self
    }

    /// Set the max number of entries per batched command
    pub fn max_batch_pairs(mut self, count: usize) -> Self {
        self.config.max_batch_pairs = count;
        self
    }

    /// Set the job directory
    pub fn jobs_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.jobs_dir = path.into();
        self
    }

    /// Set the number of job worker threads
    pub fn worker_threads(mut self, count: usize) -> Self {
        self.config.worker_threads = count;
        self
    }

    /// Set the max number of concurrent backups
    pub fn max_backups(mut self, count: usize) -> Self {
        self.config.max_backups = count;
        self
    }

    /// Enable server mode on the given registration FIFO
    pub fn registry_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.registry_path = Some(path.into());
        self
    }

    /// Set the max number of concurrent client sessions
    pub fn max_sessions(mut self, count: usize) -> Self {
        self.config.max_sessions = count;
        self
    }

    /// Set the per-client subscription cap
    pub fn max_subscriptions(mut self, count: usize) -> Self {
        self.config.max_subscriptions = count;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
