//! Engine Module
//!
//! The operation engine shared by job workers and client sessions.
//!
//! ## Responsibilities
//! - Own the table lifecycle (init / terminate, double-init guard)
//! - Validate keys and batch sizes before anything is locked
//! - Sort batch keys and lock their buckets through the orchestrator
//! - Format READ / DELETE / SHOW output
//! - Route subscriptions and backups

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::backup::{write_entry_line, BackupCoordinator};
use crate::config::Config;
use crate::error::{KvsError, Result};
use crate::lock::{LockMode, LockOrchestrator};
use crate::subscription::{ClientId, Notifier};
use crate::table::PartitionedTable;

/// Marker printed by READ for a key that does not exist
pub const READ_MISSING_MARKER: &str = "KVSERROR";

/// Marker printed by DELETE for a key that does not exist
pub const DELETE_MISSING_MARKER: &str = "KVSMISSING";

/// The key-value store
///
/// ## Concurrency Model
///
/// - Batch operations hold the table barrier for reading, then their bucket
///   locks (write for WRITE/DELETE, read for READ) in ascending order
/// - SHOW read-locks every bucket ascending
/// - BACKUP takes the barrier for writing while it copies the table
/// - Operations on disjoint buckets never wait on each other
///
/// ## Duplicate keys in one batch
/// Keys are stably sorted before locking. For WRITE the last occurrence of a
/// key (in input order) wins. DELETE deduplicates its keys. READ reports
/// every requested key, duplicates included.
pub struct Store {
    /// Store configuration
    config: Config,

    /// `None` until `init`, and again after `terminate`
    table: RwLock<Option<Arc<PartitionedTable>>>,

    /// Backup admission and worker tracking
    backups: BackupCoordinator,
}

impl Store {
    /// Create an uninitialized store
    pub fn new(config: Config) -> Self {
        let backups = BackupCoordinator::new(config.max_backups);
        Self {
            config,
            table: RwLock::new(None),
            backups,
        }
    }

    /// Create and initialize a store
    pub fn open(config: Config) -> Result<Self> {
        let store = Self::new(config);
        store.init()?;
        Ok(store)
    }

    /// Allocate the table
    pub fn init(&self) -> Result<()> {
        let mut table = self.table.write();
        if table.is_some() {
            return Err(KvsError::AlreadyInitialized);
        }
        *table = Some(Arc::new(PartitionedTable::new()));
        tracing::info!("KVS initialized");
        Ok(())
    }

    /// Wait for outstanding backups and drop the table
    pub fn terminate(&self) -> Result<()> {
        self.backups.wait_all();
        let mut table = self.table.write();
        if table.take().is_none() {
            return Err(KvsError::NotInitialized);
        }
        tracing::info!("KVS terminated");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.table.read().is_some()
    }

    fn table(&self) -> Result<Arc<PartitionedTable>> {
        self.table.read().clone().ok_or(KvsError::NotInitialized)
    }

    // =========================================================================
    // Validation
    // =========================================================================

    fn validate_key(&self, key: &str) -> Result<()> {
        if key.len() > self.config.max_key_len {
            return Err(KvsError::InvalidKey(key.to_string()));
        }
        PartitionedTable::index_of(key).map(|_| ())
    }

    fn validate_batch(&self, len: usize) -> Result<()> {
        if len == 0 {
            return Err(KvsError::EmptyBatch);
        }
        if len > self.config.max_batch_pairs {
            return Err(KvsError::BatchTooLarge {
                len,
                max: self.config.max_batch_pairs,
            });
        }
        Ok(())
    }

    fn sorted_keys<'k, S: AsRef<str>>(&self, keys: &'k [S]) -> Result<Vec<&'k str>> {
        self.validate_batch(keys.len())?;
        let mut sorted = Vec::with_capacity(keys.len());
        for key in keys {
            let key = key.as_ref();
            self.validate_key(key)?;
            sorted.push(key);
        }
        sorted.sort();
        Ok(sorted)
    }

    // =========================================================================
    // Batch operations
    // =========================================================================

    /// Write a batch of pairs
    pub fn batch_write<K, V>(&self, pairs: &[(K, V)]) -> Result<()>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.validate_batch(pairs.len())?;
        let mut sorted = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let (key, value) = (key.as_ref(), value.as_ref());
            self.validate_key(key)?;
            if value.len() > self.config.max_key_len {
                return Err(KvsError::ValueTooLong {
                    key: key.to_string(),
                    len: value.len(),
                    max: self.config.max_key_len,
                });
            }
            sorted.push((key, value));
        }
        sorted.sort_by(|a, b| a.0.cmp(b.0));

        // last occurrence of a key wins
        let mut pairs: Vec<(&str, &str)> = Vec::with_capacity(sorted.len());
        for pair in sorted {
            match pairs.last_mut() {
                Some(last) if last.0 == pair.0 => *last = pair,
                _ => pairs.push(pair),
            }
        }

        let table = self.table()?;
        let _barrier = table.barrier().read();
        let mut held = LockOrchestrator::acquire(&table, pairs.iter().map(|p| p.0), LockMode::Write)?;

        for (key, value) in &pairs {
            let index = PartitionedTable::index_of(key)?;
            let bucket = held
                .bucket_mut(index)
                .ok_or_else(|| KvsError::InvalidKey(key.to_string()))?;
            bucket.put(key, value);
        }

        held.release();
        tracing::debug!("Wrote {} pairs", pairs.len());
        Ok(())
    }

    /// Read a batch of keys, writing `[(k,v)(k2,KVSERROR)]` to `out`
    pub fn batch_read<S, W>(&self, keys: &[S], out: &mut W) -> Result<()>
    where
        S: AsRef<str>,
        W: Write,
    {
        let keys = self.sorted_keys(keys)?;

        let table = self.table()?;
        let mut line = String::from("[");
        {
            let _barrier = table.barrier().read();
            let held = LockOrchestrator::acquire(&table, keys.iter(), LockMode::Read)?;

            for key in &keys {
                let index = PartitionedTable::index_of(key)?;
                let value = held.bucket(index).and_then(|b| b.get(key));
                line.push('(');
                line.push_str(key);
                line.push(',');
                line.push_str(value.unwrap_or(READ_MISSING_MARKER));
                line.push(')');
            }
        }
        line.push_str("]\n");

        out.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Delete a batch of keys
    ///
    /// Keys that did not exist are reported as `[(k,KVSMISSING)...]`; when
    /// every key existed nothing is written.
    pub fn batch_delete<S, W>(&self, keys: &[S], out: &mut W) -> Result<()>
    where
        S: AsRef<str>,
        W: Write,
    {
        let mut keys = self.sorted_keys(keys)?;
        keys.dedup();

        let table = self.table()?;
        let mut missing = Vec::new();
        {
            let _barrier = table.barrier().read();
            let mut held = LockOrchestrator::acquire(&table, keys.iter(), LockMode::Write)?;

            for key in &keys {
                let index = PartitionedTable::index_of(key)?;
                let deleted = held.bucket_mut(index).map(|b| b.delete(key)).unwrap_or(false);
                if !deleted {
                    missing.push(*key);
                }
            }
        }

        if missing.is_empty() {
            return Ok(());
        }

        let mut line = String::from("[");
        for key in &missing {
            line.push('(');
            line.push_str(key);
            line.push(',');
            line.push_str(DELETE_MISSING_MARKER);
            line.push(')');
        }
        line.push_str("]\n");

        out.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Write every entry as a `(key, value)` line
    pub fn show<W: Write>(&self, out: &mut W) -> Result<()> {
        let table = self.table()?;
        let mut dump = Vec::new();
        {
            let _barrier = table.barrier().read();
            let held = LockOrchestrator::acquire_all(&table, LockMode::Read);
            for bucket in held.buckets() {
                for entry in bucket.iter() {
                    write_entry_line(&mut dump, entry.key(), entry.value())?;
                }
            }
        }

        out.write_all(&dump)?;
        Ok(())
    }

    /// Sleep for `delay_ms` milliseconds
    pub fn wait(&self, delay_ms: u64) {
        std::thread::sleep(Duration::from_millis(delay_ms));
    }

    // =========================================================================
    // Single-key helpers
    // =========================================================================

    /// Write one pair
    pub fn put(&self, key: &str, value: &str) -> Result<()> {
        self.batch_write(&[(key, value)])
    }

    /// Read one key
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        self.validate_key(key)?;
        let table = self.table()?;
        let _barrier = table.barrier().read();
        table.get(key)
    }

    /// Delete one key. Returns false if it did not exist.
    pub fn delete(&self, key: &str) -> Result<bool> {
        self.validate_key(key)?;
        let table = self.table()?;
        let _barrier = table.barrier().read();
        table.delete(key)
    }

    /// Number of stored entries
    pub fn len(&self) -> Result<usize> {
        Ok(self.table()?.len())
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Subscribe a channel to an existing key
    ///
    /// Returns false if the key does not exist; no placeholder is created.
    pub fn subscribe(&self, key: &str, notifier: &Arc<Notifier>) -> Result<bool> {
        self.validate_key(key)?;
        let table = self.table()?;
        let _barrier = table.barrier().read();
        table.subscribe(key, notifier)
    }

    /// Remove a client's subscription. Returns false if there was none.
    pub fn unsubscribe(&self, key: &str, client: ClientId) -> Result<bool> {
        self.validate_key(key)?;
        let table = self.table()?;
        let _barrier = table.barrier().read();
        table.unsubscribe(key, client)
    }

    /// Whether a client still holds a subscription on `key`
    ///
    /// False once the entry has been deleted, even if it was recreated.
    pub fn is_subscribed(&self, key: &str, client: ClientId) -> Result<bool> {
        self.validate_key(key)?;
        let table = self.table()?;
        let _barrier = table.barrier().read();
        table.is_subscribed(key, client)
    }

    // =========================================================================
    // Backups
    // =========================================================================

    /// Snapshot the table and write it to `path` in the background
    pub fn backup(&self, path: &Path) -> Result<()> {
        let table = self.table()?;
        self.backups.start(&table, path)
    }

    /// Block until every running backup has finished
    pub fn wait_for_backups(&self) {
        self.backups.wait_all();
    }

    /// Number of backups still being written
    pub fn backups_in_flight(&self) -> usize {
        self.backups.in_flight()
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }
}
