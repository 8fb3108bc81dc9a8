//! Error types for BucketKV
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using KvsError
pub type Result<T> = std::result::Result<T, KvsError>;

/// Unified error type for BucketKV operations
#[derive(Debug, Error)]
pub enum KvsError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("KVS state must be initialized")]
    NotInitialized,

    #[error("KVS state has already been initialized")]
    AlreadyInitialized,

    // -------------------------------------------------------------------------
    // Input Errors
    // -------------------------------------------------------------------------
    #[error("Invalid key: {0:?}")]
    InvalidKey(String),

    #[error("Value too long for key {key:?} ({len} bytes, max {max})")]
    ValueTooLong { key: String, len: usize, max: usize },

    #[error("Batch too large: {len} entries (max {max})")]
    BatchTooLarge { len: usize, max: usize },

    #[error("Empty batch")]
    EmptyBatch,

    #[error("Parse error: {0}")]
    Parse(String),

    // -------------------------------------------------------------------------
    // Backup Errors
    // -------------------------------------------------------------------------
    #[error("Backup error: {0}")]
    Backup(String),

    // -------------------------------------------------------------------------
    // Session / Protocol Errors
    // -------------------------------------------------------------------------
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Session error: {0}")]
    Session(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}
