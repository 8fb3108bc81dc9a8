//! # BucketKV
//!
//! A concurrent in-memory key-value store with:
//! - 26 independently locked buckets and deadlock-free multi-key batches
//! - Batch execution of `.job` scripts on a worker pool
//! - Point-in-time backups written in the background
//! - Per-key change notifications pushed to connected clients
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────┐      ┌──────────────────────────────┐
//! │   Job Workers (N)        │      │   Session Threads (slots)    │
//! │   .job -> .out / .bck    │      │   subscribe / unsubscribe    │
//! └────────────┬─────────────┘      └──────────────┬───────────────┘
//!              │                                   │
//! ┌────────────▼───────────────────────────────────▼───────────────┐
//! │                      Store (engine)                            │
//! │        sort keys · validate · format output · backups          │
//! └────────────┬───────────────────────────────────┬───────────────┘
//!              │                                   │
//!              ▼                                   ▼
//!   ┌─────────────────────┐             ┌─────────────────────┐
//!   │  Lock Orchestrator  │             │  Backup Coordinator │
//!   │ (ascending buckets) │             │ (tokens + workers)  │
//!   └──────────┬──────────┘             └──────────┬──────────┘
//!              │                                   │
//!              ▼                                   ▼
//!   ┌────────────────────────────────────────────────────────┐
//!   │  PartitionedTable: barrier > bucket[0..26] (RwLock)    │
//!   │  Entry { key, value, subscribers }                     │
//!   └────────────────────────────────────────────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod table;
pub mod lock;
pub mod subscription;
pub mod backup;
pub mod engine;
pub mod protocol;
pub mod session;
pub mod job;
pub mod client;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{KvsError, Result};
pub use config::Config;
pub use engine::Store;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of BucketKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
