//! Lock Orchestrator
//!
//! Acquires the bucket locks of a multi-key operation in a canonical order.
//!
//! ## Deadlock avoidance
//! The buckets touched by an operation are deduplicated and sorted
//! ascending, then locked strictly in that order. Two operations with
//! overlapping key sets therefore always contend in the same relative order
//! and no wait cycle can form. A full scan is the special case of locking
//! every bucket ascending.
//!
//! There is no timeout-based detection: any code path that holds two bucket
//! locks at once must go through this module.

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::error::Result;
use crate::table::{Bucket, PartitionedTable};

/// Lock mode requested for every bucket of a set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Shared access (READ, SHOW, snapshots)
    Read,

    /// Exclusive access (WRITE, DELETE)
    Write,
}

enum BucketGuard<'a> {
    Read(RwLockReadGuard<'a, Bucket>),
    Write(RwLockWriteGuard<'a, Bucket>),
}

impl BucketGuard<'_> {
    fn bucket(&self) -> &Bucket {
        match self {
            BucketGuard::Read(guard) => &**guard,
            BucketGuard::Write(guard) => &**guard,
        }
    }
}

/// Set of bucket locks held by one operation
///
/// Guards are kept in ascending bucket order. Dropping the set releases
/// everything it still holds.
pub struct HeldSet<'a> {
    mode: LockMode,
    guards: Vec<(usize, BucketGuard<'a>)>,
}

impl<'a> HeldSet<'a> {
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Indices still held, ascending
    pub fn indices(&self) -> Vec<usize> {
        self.guards.iter().map(|(index, _)| *index).collect()
    }

    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_released(&self) -> bool {
        self.guards.is_empty()
    }

    fn slot(&self, index: usize) -> Option<usize> {
        self.guards.binary_search_by_key(&index, |(i, _)| *i).ok()
    }

    /// A held bucket, by index
    pub fn bucket(&self, index: usize) -> Option<&Bucket> {
        self.slot(index).map(|slot| self.guards[slot].1.bucket())
    }

    /// A held bucket for mutation. `None` if not held or held for reading.
    pub fn bucket_mut(&mut self, index: usize) -> Option<&mut Bucket> {
        let slot = self.slot(index)?;
        match &mut self.guards[slot].1 {
            BucketGuard::Write(guard) => Some(&mut **guard),
            BucketGuard::Read(_) => None,
        }
    }

    /// Held buckets in ascending order
    pub fn buckets(&self) -> impl Iterator<Item = &Bucket> {
        self.guards.iter().map(|(_, guard)| guard.bucket())
    }

    /// Release every held lock in ascending order
    ///
    /// Releasing an already released set is a no-op.
    pub fn release(&mut self) {
        for (index, guard) in self.guards.drain(..) {
            drop(guard);
            tracing::trace!("Released bucket {}", index);
        }
    }
}

impl Drop for HeldSet<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Computes and acquires canonical bucket lock sets
pub struct LockOrchestrator;

impl LockOrchestrator {
    /// Distinct bucket indices touched by `keys`, ascending
    ///
    /// Fails with `InvalidKey` on the first key that has no bucket, before
    /// anything is locked.
    pub fn plan<I, S>(keys: I) -> Result<Vec<usize>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut indices = keys
            .into_iter()
            .map(|key| PartitionedTable::index_of(key.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        indices.sort_unstable();
        indices.dedup();
        Ok(indices)
    }

    /// Lock the buckets of `keys` in ascending order
    pub fn acquire<'a, I, S>(table: &'a PartitionedTable, keys: I, mode: LockMode) -> Result<HeldSet<'a>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let indices = Self::plan(keys)?;
        Ok(Self::acquire_indices(table, indices, mode))
    }

    /// Lock every bucket of the table in ascending order
    pub fn acquire_all(table: &PartitionedTable, mode: LockMode) -> HeldSet<'_> {
        Self::acquire_indices(table, (0..table.bucket_count()).collect(), mode)
    }

    /// Lock an explicit set of bucket indices
    ///
    /// Indices are sorted and deduplicated here; out-of-range indices are
    /// ignored.
    pub fn acquire_indices(table: &PartitionedTable, mut indices: Vec<usize>, mode: LockMode) -> HeldSet<'_> {
        indices.retain(|&i| i < table.bucket_count());
        indices.sort_unstable();
        indices.dedup();

        let mut guards = Vec::with_capacity(indices.len());
        for index in indices {
            let lock = table.bucket_lock(index);
            let guard = match mode {
                LockMode::Read => BucketGuard::Read(lock.read()),
                LockMode::Write => BucketGuard::Write(lock.write()),
            };
            tracing::trace!("Acquired bucket {} ({:?})", index, mode);
            guards.push((index, guard));
        }

        HeldSet { mode, guards }
    }

    /// Release a held set. Idempotent.
    pub fn release(held: &mut HeldSet<'_>) {
        held.release();
    }
}
