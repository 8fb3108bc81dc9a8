//! Bucket and Entry
//!
//! A bucket is a small unordered list of entries with unique keys. All
//! methods assume the caller already holds the bucket's lock.

use std::sync::Arc;

use crate::subscription::{Change, ClientId, Notifier, SubscriberList};

/// Stored record for one key
#[derive(Debug)]
pub struct Entry {
    key: String,
    value: String,
    subscribers: SubscriberList,
}

impl Entry {
    fn new(key: &str, value: &str) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
            subscribers: SubscriberList::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn subscribers(&self) -> &SubscriberList {
        &self.subscribers
    }
}

/// Result of a put
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// A new entry was created
    Inserted,

    /// An existing entry's value was replaced (subscribers notified)
    Updated,
}

/// One partition of the table
#[derive(Debug, Default)]
pub struct Bucket {
    entries: Vec<Entry>,
}

impl Bucket {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.key == key)
    }

    pub fn entry(&self, key: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.key == key)
    }

    /// Insert or overwrite. Overwrites notify the entry's subscribers.
    pub fn put(&mut self, key: &str, value: &str) -> PutOutcome {
        match self.position(key) {
            Some(pos) => {
                let entry = &mut self.entries[pos];
                entry.value = value.to_string();
                entry.subscribers.notify(key, Change::Updated(value));
                PutOutcome::Updated
            }
            None => {
                // fully built before it becomes reachable
                let entry = Entry::new(key, value);
                self.entries.push(entry);
                PutOutcome::Inserted
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entry(key).map(|e| e.value.as_str())
    }

    /// Remove an entry, notifying its subscribers first
    pub fn delete(&mut self, key: &str) -> bool {
        match self.position(key) {
            Some(pos) => {
                self.entries[pos].subscribers.notify(key, Change::Deleted);
                self.entries.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Register a channel on an existing entry
    ///
    /// Returns false (and registers nothing) if the key does not exist.
    /// Subscribing twice is a no-op that still reports true.
    pub fn subscribe(&mut self, key: &str, notifier: &Arc<Notifier>) -> bool {
        match self.position(key) {
            Some(pos) => {
                self.entries[pos].subscribers.add(notifier);
                true
            }
            None => false,
        }
    }

    /// Drop a client's registration on an entry
    pub fn unsubscribe(&mut self, key: &str, client: ClientId) -> bool {
        match self.position(key) {
            Some(pos) => self.entries[pos].subscribers.remove(client),
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
