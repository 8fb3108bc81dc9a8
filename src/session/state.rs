//! Per-client session state
//!
//! ```text
//! Connecting ──> Active ──> Disconnecting ──> Closed
//!                  │                            ▲
//!                  └──────── reset ─────────────┘
//! ```
//!
//! Reaching `Closed` fires the session's close signal, which wakes the
//! session thread even while it waits for the client's next request.

use std::io::Write;
use std::sync::Arc;

use crossbeam::channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::engine::Store;
use crate::error::{KvsError, Result};
use crate::protocol::{write_response, Response};
use crate::subscription::{ClientId, Notifier};

/// Lifecycle of a client session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,

    /// A DISCONNECT was received, or the session is tearing down its
    /// subscriptions. No new requests are served.
    Disconnecting,

    Closed,
}

/// Server-side state of one connected client
///
/// The session's own key list mirrors the subscriber records it owns on
/// table entries; both are updated under the `subscriptions` mutex.
/// Lock order: `subscriptions`, then `state`, then table locks.
pub struct ClientSession {
    id: ClientId,
    slot: usize,
    notifier: Arc<Notifier>,
    responses: Mutex<Option<Box<dyn Write + Send>>>,
    subscriptions: Mutex<Vec<String>>,
    state: Mutex<SessionState>,
    max_subscriptions: usize,
    close_tx: Mutex<Option<Sender<()>>>,
    close_rx: Receiver<()>,
}

impl ClientSession {
    pub fn new(
        id: ClientId,
        slot: usize,
        notifications: Box<dyn Write + Send>,
        responses: Box<dyn Write + Send>,
        max_subscriptions: usize,
    ) -> Self {
        let (close_tx, close_rx) = bounded(0);
        Self {
            id,
            slot,
            notifier: Arc::new(Notifier::new(id, notifications)),
            responses: Mutex::new(Some(responses)),
            subscriptions: Mutex::new(Vec::new()),
            state: Mutex::new(SessionState::Connecting),
            max_subscriptions,
            close_tx: Mutex::new(Some(close_tx)),
            close_rx,
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn notifier(&self) -> &Arc<Notifier> {
        &self.notifier
    }

    /// Disconnects once the session is `Closed`; never carries a message
    pub fn close_signal(&self) -> &Receiver<()> {
        &self.close_rx
    }

    /// Keys this client is subscribed to, in subscription order
    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().clone()
    }

    /// Connecting -> Active
    pub fn activate(&self) {
        let mut state = self.state.lock();
        if *state == SessionState::Connecting {
            *state = SessionState::Active;
        }
    }

    /// Active -> Disconnecting. Returns false from any other state.
    pub fn begin_disconnect(&self) -> bool {
        let mut state = self.state.lock();
        if *state != SessionState::Active {
            return false;
        }
        *state = SessionState::Disconnecting;
        true
    }

    /// Send an acknowledgment on the response channel
    pub fn respond(&self, response: Response) -> Result<()> {
        let mut responses = self.responses.lock();
        let writer = responses.as_mut().ok_or_else(|| {
            KvsError::Session(format!("response channel of client {} is closed", self.id))
        })?;
        write_response(writer, &response)
    }

    /// Subscribe to an existing key
    ///
    /// Returns false if the key does not exist or the client already holds
    /// `max_subscriptions` other keys.
    pub fn subscribe(&self, store: &Store, key: &str) -> Result<bool> {
        let mut subscriptions = self.subscriptions.lock();
        if self.state() != SessionState::Active {
            return Err(KvsError::Session(format!("client {} is not active", self.id)));
        }

        // keys whose entry was deleted no longer count against the limit
        subscriptions.retain(|k| match store.is_subscribed(k, self.id) {
            Ok(held) => held,
            Err(e) => {
                tracing::warn!("Dropping subscription {:?} of client {}: {}", k, self.id, e);
                false
            }
        });

        let known = subscriptions.iter().any(|k| k == key);
        if !known && subscriptions.len() >= self.max_subscriptions {
            tracing::warn!(
                "Client {} reached its subscription limit ({})",
                self.id,
                self.max_subscriptions
            );
            return Ok(false);
        }

        let existed = store.subscribe(key, &self.notifier)?;
        if existed && !known {
            subscriptions.push(key.to_string());
        }
        Ok(existed)
    }

    /// Drop a subscription. Returns false if the client was not subscribed.
    pub fn unsubscribe(&self, store: &Store, key: &str) -> Result<bool> {
        let mut subscriptions = self.subscriptions.lock();
        if self.state() != SessionState::Active {
            return Err(KvsError::Session(format!("client {} is not active", self.id)));
        }

        let removed = store.unsubscribe(key, self.id)?;
        subscriptions.retain(|k| k != key);
        Ok(removed)
    }

    /// Remove every subscription and close the notification channel
    ///
    /// Moves the session to `Closed`. Returns false if it already was.
    pub fn close(&self, store: &Store) -> bool {
        let mut subscriptions = self.subscriptions.lock();
        {
            let mut state = self.state.lock();
            if *state == SessionState::Closed {
                return false;
            }
            *state = SessionState::Disconnecting;
        }

        for key in subscriptions.drain(..) {
            if let Err(e) = store.unsubscribe(&key, self.id) {
                tracing::warn!("Failed to unsubscribe client {} from {:?}: {}", self.id, key, e);
            }
        }
        self.notifier.close();

        *self.state.lock() = SessionState::Closed;
        self.close_tx.lock().take();
        true
    }

    /// Close the response channel
    pub fn close_responses(&self) {
        self.responses.lock().take();
    }
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("id", &self.id)
            .field("slot", &self.slot)
            .field("state", &self.state())
            .finish()
    }
}
