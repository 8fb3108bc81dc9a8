//! Partitioned table implementation
//!
//! `TABLE_SIZE` buckets, each behind its own reader/writer lock, plus a
//! table-wide barrier used by snapshots.
//!
//! ## Lock hierarchy
//! 1. `barrier` (read for normal operations, write for snapshots)
//! 2. bucket locks, always in ascending index order
//!
//! Never take the barrier while holding a bucket lock.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{KvsError, Result};
use crate::lock::{LockMode, LockOrchestrator};
use crate::subscription::{ClientId, Notifier};
use super::{bucket_index, Bucket, PutOutcome, TABLE_SIZE};

/// The shared key-value table
pub struct PartitionedTable {
    buckets: Vec<RwLock<Bucket>>,
    barrier: RwLock<()>,
}

impl PartitionedTable {
    /// Create a table with `TABLE_SIZE` empty buckets
    pub fn new() -> Self {
        Self {
            buckets: (0..TABLE_SIZE).map(|_| RwLock::new(Bucket::new())).collect(),
            barrier: RwLock::new(()),
        }
    }

    /// Bucket index of a key, or `InvalidKey`
    pub fn index_of(key: &str) -> Result<usize> {
        bucket_index(key).ok_or_else(|| KvsError::InvalidKey(key.to_string()))
    }

    pub(crate) fn bucket_lock(&self, index: usize) -> &RwLock<Bucket> {
        &self.buckets[index]
    }

    /// Table-wide barrier, super-ordinate to every bucket lock
    pub fn barrier(&self) -> &RwLock<()> {
        &self.barrier
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    // =========================================================================
    // Bucket-local operations
    // =========================================================================

    /// Insert or overwrite one key (bucket write lock)
    pub fn put(&self, key: &str, value: &str) -> Result<PutOutcome> {
        let index = Self::index_of(key)?;
        Ok(self.buckets[index].write().put(key, value))
    }

    /// Read one key (bucket read lock)
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let index = Self::index_of(key)?;
        Ok(self.buckets[index].read().get(key).map(str::to_string))
    }

    /// Delete one key (bucket write lock). Returns false if absent.
    pub fn delete(&self, key: &str) -> Result<bool> {
        let index = Self::index_of(key)?;
        Ok(self.buckets[index].write().delete(key))
    }

    /// Subscribe a channel to an existing key (bucket write lock)
    pub fn subscribe(&self, key: &str, notifier: &Arc<Notifier>) -> Result<bool> {
        let index = Self::index_of(key)?;
        Ok(self.buckets[index].write().subscribe(key, notifier))
    }

    /// Remove a client's subscription on a key (bucket write lock)
    pub fn unsubscribe(&self, key: &str, client: ClientId) -> Result<bool> {
        let index = Self::index_of(key)?;
        Ok(self.buckets[index].write().unsubscribe(key, client))
    }

    /// Whether `key` exists and carries a subscription of `client`
    pub fn is_subscribed(&self, key: &str, client: ClientId) -> Result<bool> {
        let index = Self::index_of(key)?;
        Ok(self.buckets[index]
            .read()
            .entry(key)
            .map_or(false, |entry| entry.subscribers().contains(client)))
    }

    // =========================================================================
    // Full-table scans
    // =========================================================================

    /// Visit every entry with all buckets read-locked in ascending order
    pub fn for_each<F>(&self, mut visitor: F)
    where
        F: FnMut(&str, &str),
    {
        let held = LockOrchestrator::acquire_all(self, LockMode::Read);
        for bucket in held.buckets() {
            for entry in bucket.iter() {
                visitor(entry.key(), entry.value());
            }
        }
    }

    /// Deep copy of every (key, value) pair, bucket order
    pub fn snapshot(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        self.for_each(|key, value| pairs.push((key.to_string(), value.to_string())));
        pairs
    }

    /// Total number of entries
    pub fn len(&self) -> usize {
        let held = LockOrchestrator::acquire_all(self, LockMode::Read);
        held.buckets().map(|b| b.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PartitionedTable {
    fn default() -> Self {
        Self::new()
    }
}
