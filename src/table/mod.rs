//! Table Module
//!
//! Fixed-size array of independently locked buckets.
//!
//! ## Responsibilities
//! - Map every key to exactly one bucket (first-character hash)
//! - Hold entries and their subscriber lists
//! - Bucket-local put/get/delete/subscribe, each under its own lock
//! - Consistent full-table scans for SHOW and snapshots
//!
//! ## Data Structure Choice
//! Each bucket is a `Vec<Entry>` behind a `parking_lot::RwLock`:
//! - The table exclusively owns entries, an entry owns its subscriber list
//! - Buckets are small (26 partitions, short keys), a linear scan is fine
//! - A second `RwLock<()>` above all buckets acts as the snapshot barrier

mod bucket;
mod partitioned;

pub use bucket::{Bucket, Entry, PutOutcome};
pub use partitioned::PartitionedTable;

/// Number of buckets in a table
pub const TABLE_SIZE: usize = 26;

/// Map a key to its bucket
///
/// Letters map case-insensitively to 0..26, digits to 0..10. Anything else
/// (including the empty key) has no bucket and must be rejected.
pub fn bucket_index(key: &str) -> Option<usize> {
    let first = key.bytes().next()?.to_ascii_lowercase();
    match first {
        b'a'..=b'z' => Some((first - b'a') as usize),
        b'0'..=b'9' => Some((first - b'0') as usize),
        _ => None,
    }
}
