//! Subscription Module
//!
//! Per-entry lists of notification channels and the fan-out that runs when
//! an entry changes.
//!
//! ## Ownership
//! - A [`Notifier`] is owned by the client session (`Arc<Notifier>`)
//! - Entries only hold [`Subscriber`] records with a `Weak` back-reference,
//!   so a subscription never keeps a client's channel alive
//!
//! Subscriptions are entry-scoped: deleting a key drops its list, and a
//! recreated key starts with no subscribers.

use std::io::Write;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::{KvsError, Result};
use crate::protocol::{encode_notification, DELETE_MARKER};

/// Identifier of a connected client
pub type ClientId = u64;

/// What happened to a subscribed entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change<'a> {
    /// The value was overwritten
    Updated(&'a str),

    /// The entry is being deleted
    Deleted,
}

impl<'a> Change<'a> {
    /// Value written on the notification channel
    pub fn wire_value(&self) -> &'a str {
        match self {
            Change::Updated(value) => value,
            Change::Deleted => DELETE_MARKER,
        }
    }
}

/// A client's notification channel
pub struct Notifier {
    client: ClientId,
    channel: Mutex<Option<Box<dyn Write + Send>>>,
}

impl Notifier {
    pub fn new(client: ClientId, channel: Box<dyn Write + Send>) -> Self {
        Self {
            client,
            channel: Mutex::new(Some(channel)),
        }
    }

    pub fn client(&self) -> ClientId {
        self.client
    }

    /// Write one (key, value) notification
    pub fn send(&self, key: &str, value: &str) -> Result<()> {
        let frame = encode_notification(key, value)?;
        let mut channel = self.channel.lock();
        let writer = channel.as_mut().ok_or_else(|| {
            KvsError::Session(format!("notification channel of client {} is closed", self.client))
        })?;
        writer.write_all(&frame)?;
        writer.flush()?;
        Ok(())
    }

    /// Close the channel. Returns false if it was already closed.
    pub fn close(&self) -> bool {
        self.channel.lock().take().is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.channel.lock().is_none()
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("client", &self.client)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A notification destination registered against one entry
#[derive(Debug, Clone)]
pub struct Subscriber {
    client: ClientId,
    channel: Weak<Notifier>,
}

impl Subscriber {
    pub fn new(notifier: &Arc<Notifier>) -> Self {
        Self {
            client: notifier.client(),
            channel: Arc::downgrade(notifier),
        }
    }

    pub fn client(&self) -> ClientId {
        self.client
    }
}

/// Ordered list of subscribers of one entry
#[derive(Debug, Default)]
pub struct SubscriberList {
    subscribers: Vec<Subscriber>,
}

impl SubscriberList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel. Returns false if the client was already registered.
    pub fn add(&mut self, notifier: &Arc<Notifier>) -> bool {
        if self.contains(notifier.client()) {
            return false;
        }
        self.subscribers.push(Subscriber::new(notifier));
        true
    }

    /// Remove a client's registration. Returns false if it was not registered.
    pub fn remove(&mut self, client: ClientId) -> bool {
        match self.subscribers.iter().position(|s| s.client == client) {
            Some(pos) => {
                self.subscribers.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, client: ClientId) -> bool {
        self.subscribers.iter().any(|s| s.client == client)
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    pub fn clients(&self) -> impl Iterator<Item = ClientId> + '_ {
        self.subscribers.iter().map(|s| s.client)
    }

    /// Push a change to every subscriber, in registration order
    ///
    /// A failed write is logged and skipped; the remaining subscribers are
    /// still notified. Returns the number of successful deliveries.
    pub fn notify(&self, key: &str, change: Change<'_>) -> usize {
        let value = change.wire_value();
        let mut delivered = 0;

        for subscriber in &self.subscribers {
            let Some(notifier) = subscriber.channel.upgrade() else {
                tracing::debug!(
                    "Skipping notification of {:?} for dropped client {}",
                    key,
                    subscriber.client
                );
                continue;
            };

            match notifier.send(key, value) {
                Ok(()) => delivered += 1,
                Err(e) => tracing::warn!(
                    "Failed to notify client {} about {:?}: {}",
                    subscriber.client,
                    key,
                    e
                ),
            }
        }

        delivered
    }
}
