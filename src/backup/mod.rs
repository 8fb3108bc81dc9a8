//! Backup Module
//!
//! Point-in-time dumps of the whole table to a file.
//!
//! ## Flow
//! 1. Take an admission token (blocks while `max_backups` workers are alive)
//! 2. Take the table barrier for writing, so no operation is mid-flight
//! 3. Deep copy every entry (buckets read-locked ascending)
//! 4. Drop the barrier; normal service resumes
//! 5. A worker thread streams the copy to the backup file, then returns
//!    its token
//!
//! The copy is O(n) under the barrier; the file I/O happens outside it.
//! Completion is tracked through the workers' join handles.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::thread::JoinHandle;

use crossbeam::channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::error::{KvsError, Result};
use crate::table::PartitionedTable;

/// Write one `(key, value)` line, as used by SHOW and backup files
pub fn write_entry_line<W: Write>(out: &mut W, key: &str, value: &str) -> std::io::Result<()> {
    writeln!(out, "({}, {})", key, value)
}

/// Frozen copy of the table contents
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    entries: Vec<(String, String)>,
}

impl Snapshot {
    /// Copy the table under its write barrier
    pub fn capture(table: &PartitionedTable) -> Self {
        let _barrier = table.barrier().write();
        Self {
            entries: table.snapshot(),
        }
    }

    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stream every entry as a `(key, value)` line
    pub fn write_to<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        for (key, value) in &self.entries {
            write_entry_line(out, key, value)?;
        }
        out.flush()
    }
}

/// Permit to run one backup worker. Returned to the pool on drop.
struct AdmissionToken {
    release: Sender<()>,
}

impl Drop for AdmissionToken {
    fn drop(&mut self) {
        // capacity equals the number of tokens, so this never blocks
        let _ = self.release.try_send(());
    }
}

/// Bounds and tracks concurrent backup workers
pub struct BackupCoordinator {
    tokens_tx: Sender<()>,
    tokens_rx: Receiver<()>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    limit: usize,
}

impl BackupCoordinator {
    /// Create a coordinator admitting at most `limit` concurrent workers
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        let (tokens_tx, tokens_rx) = bounded(limit);
        for _ in 0..limit {
            let _ = tokens_tx.try_send(());
        }
        Self {
            tokens_tx,
            tokens_rx,
            workers: Mutex::new(Vec::new()),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Block until a worker slot is free
    fn admit(&self) -> Result<AdmissionToken> {
        self.tokens_rx
            .recv()
            .map_err(|_| KvsError::Backup("admission pool closed".into()))?;
        Ok(AdmissionToken {
            release: self.tokens_tx.clone(),
        })
    }

    /// Snapshot `table` and stream it to `path` from a worker thread
    ///
    /// Returns once the snapshot is taken and the file is open; the write
    /// itself completes asynchronously. Failing to open the file aborts only
    /// this backup.
    pub fn start(&self, table: &PartitionedTable, path: &Path) -> Result<()> {
        let token = self.admit()?;
        let snapshot = Snapshot::capture(table);

        let file = File::create(path).map_err(|e| {
            KvsError::Backup(format!("Failed to open backup file {}: {}", path.display(), e))
        })?;

        self.spawn_worker(token, snapshot, BufWriter::new(file), path.display().to_string())
    }

    /// Same as [`start`](Self::start), streaming into an already open sink
    ///
    /// `label` names the destination in log lines.
    pub fn start_with_writer<W>(&self, table: &PartitionedTable, writer: W, label: &str) -> Result<()>
    where
        W: Write + Send + 'static,
    {
        let token = self.admit()?;
        let snapshot = Snapshot::capture(table);
        self.spawn_worker(token, snapshot, writer, label.to_string())
    }

    fn spawn_worker<W>(&self, token: AdmissionToken, snapshot: Snapshot, mut writer: W, label: String) -> Result<()>
    where
        W: Write + Send + 'static,
    {
        tracing::debug!("Backup of {} entries to {}", snapshot.len(), label);

        let handle = std::thread::Builder::new()
            .name("kvs-backup".into())
            .spawn(move || {
                let _token = token;
                match snapshot.write_to(&mut writer) {
                    Ok(()) => tracing::info!("Backup written to {}", label),
                    Err(e) => tracing::error!("Backup to {} failed: {}", label, e),
                }
            })?;

        let mut workers = self.workers.lock();
        workers.retain(|w| !w.is_finished());
        workers.push(handle);
        Ok(())
    }

    /// Number of admission tokens currently held
    ///
    /// A backup holds its token from admission until its file is written,
    /// so this never exceeds [`limit`](Self::limit).
    pub fn in_flight(&self) -> usize {
        self.limit.saturating_sub(self.tokens_rx.len())
    }

    /// Wait for every outstanding worker
    pub fn wait_all(&self) {
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for worker in workers {
            if worker.join().is_err() {
                tracing::error!("Backup worker panicked");
            }
        }
    }
}
