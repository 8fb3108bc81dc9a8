//! Session Manager
//!
//! Admits clients from the registration channel and serves them from a
//! fixed pool of session threads.
//!
//! ## Admission
//! - Connect requests go into a bounded queue (capacity `max_sessions`)
//! - One session thread per slot; a thread serves one client at a time,
//!   so at most `max_sessions` clients are ever active
//! - A connect beyond capacity waits in the queue until a slot frees

use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::{bounded, select, Receiver, Sender};
use parking_lot::Mutex;

use crate::config::Config;
use crate::engine::Store;
use crate::error::{KvsError, Result};
use crate::protocol::{read_connect, read_request, result, ConnectRequest, OpCode, Request, Response};
use crate::subscription::ClientId;
use super::{ClientSession, SessionState, Transport};

/// Serves client sessions against a shared store
pub struct SessionManager {
    store: Arc<Store>,
    transport: Arc<dyn Transport>,
    max_subscriptions: usize,
    pending_tx: Mutex<Option<Sender<ConnectRequest>>>,
    pending_rx: Receiver<ConnectRequest>,
    slots: Mutex<Vec<Option<Arc<ClientSession>>>>,
    next_id: AtomicU64,
}

impl SessionManager {
    /// Create a manager with `config.max_sessions` slots
    pub fn new(store: Arc<Store>, transport: Arc<dyn Transport>, config: &Config) -> Self {
        let capacity = config.max_sessions.max(1);
        let (pending_tx, pending_rx) = bounded(capacity);
        Self {
            store,
            transport,
            max_subscriptions: config.max_subscriptions,
            pending_tx: Mutex::new(Some(pending_tx)),
            pending_rx,
            slots: Mutex::new(vec![None; capacity]),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.lock().len()
    }

    /// Number of clients currently holding a slot
    pub fn active_sessions(&self) -> usize {
        self.slots.lock().iter().filter(|s| s.is_some()).count()
    }

    /// Snapshot of the sessions currently holding a slot
    pub fn sessions(&self) -> Vec<Arc<ClientSession>> {
        self.slots.lock().iter().flatten().cloned().collect()
    }

    // =========================================================================
    // Producer side
    // =========================================================================

    /// Queue a connect request, blocking while the queue is full
    pub fn submit(&self, request: ConnectRequest) -> Result<()> {
        let sender = self
            .pending_tx
            .lock()
            .clone()
            .ok_or_else(|| KvsError::Session("session manager is shut down".into()))?;
        sender
            .send(request)
            .map_err(|_| KvsError::Session("session manager is shut down".into()))
    }

    /// Read connect messages from the registration channel until it closes
    ///
    /// Malformed messages are logged and skipped.
    pub fn serve_registry<R: Read>(&self, registry: &mut R) -> Result<()> {
        loop {
            match read_connect(registry) {
                Ok(request) => {
                    tracing::debug!("Connect request: {:?}", request);
                    self.submit(request)?;
                }
                Err(KvsError::Io(ref e)) if e.kind() == ErrorKind::UnexpectedEof => {
                    tracing::debug!("Registration channel closed by all writers");
                    return Ok(());
                }
                Err(KvsError::Protocol(msg)) => {
                    tracing::warn!("Dropping malformed connect message: {}", msg);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Stop accepting connect requests
    ///
    /// Session threads exit once the queue is drained and their current
    /// client is gone.
    pub fn shutdown(&self) {
        self.pending_tx.lock().take();
    }

    // =========================================================================
    // Consumer side
    // =========================================================================

    /// Spawn one session thread per slot
    pub fn spawn_workers(self: &Arc<Self>) -> Result<Vec<JoinHandle<()>>> {
        (0..self.capacity())
            .map(|slot| {
                let manager = Arc::clone(self);
                std::thread::Builder::new()
                    .name(format!("kvs-session-{}", slot))
                    .spawn(move || manager.worker_loop(slot))
                    .map_err(KvsError::from)
            })
            .collect()
    }

    fn worker_loop(&self, slot: usize) {
        while let Ok(request) = self.pending_rx.recv() {
            self.run_session(slot, request);
        }
        tracing::debug!("Session thread {} exiting", slot);
    }

    /// Admit one client into `slot` and serve it until it leaves
    ///
    /// Returns as soon as the session is closed, by the client or by a
    /// reset, freeing the slot for the next queued connect.
    pub fn run_session(&self, slot: usize, request: ConnectRequest) {
        let Some((session, requests)) = self.admit(slot, &request) else {
            return;
        };

        match spawn_request_reader(session.id(), requests) {
            Ok(requests) => self.serve(&session, &requests),
            Err(e) => tracing::error!("Failed to start request reader for {}: {}", session.id(), e),
        }

        session.close(&self.store);
        session.close_responses();
        self.slots.lock()[slot] = None;
        tracing::info!("Client {} left slot {}", session.id(), slot);
    }

    /// Open the client's channels and register it
    fn admit(&self, slot: usize, request: &ConnectRequest) -> Option<(Arc<ClientSession>, Box<dyn Read + Send>)> {
        let opened = (|| -> std::io::Result<_> {
            let notifications = self.transport.open_notification(&request.notification_path)?;
            let requests = self.transport.open_request(&request.request_path)?;
            let responses = self.transport.open_response(&request.response_path)?;
            Ok((notifications, requests, responses))
        })();

        let (notifications, requests, responses) = match opened {
            Ok(channels) => channels,
            Err(e) => {
                tracing::error!("Failed to open channels for {:?}: {}", request, e);
                return None;
            }
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let session = Arc::new(ClientSession::new(
            id,
            slot,
            notifications,
            responses,
            self.max_subscriptions,
        ));
        session.activate();
        self.slots.lock()[slot] = Some(Arc::clone(&session));

        if let Err(e) = session.respond(Response::new(OpCode::Connect, result::OK)) {
            tracing::error!("Failed to acknowledge client {}: {}", id, e);
            session.close(&self.store);
            session.close_responses();
            self.slots.lock()[slot] = None;
            return None;
        }

        tracing::info!("Client {} connected in slot {}", id, slot);
        Some((session, requests))
    }

    /// Dispatch requests until disconnect, channel closure or reset
    fn serve(&self, session: &ClientSession, requests: &Receiver<Result<Request>>) {
        loop {
            let received = select! {
                recv(requests) -> received => received,
                recv(session.close_signal()) -> _ => {
                    tracing::debug!("Client {} was reset", session.id());
                    return;
                }
            };

            let request = match received {
                Ok(Ok(request)) => request,
                Ok(Err(KvsError::Io(ref e))) if e.kind() == ErrorKind::UnexpectedEof => {
                    tracing::debug!("Client {} closed its request channel", session.id());
                    return;
                }
                Ok(Err(e)) => {
                    // unknown opcodes and broken channels end the session
                    tracing::warn!("Client {} sent a bad request: {}", session.id(), e);
                    return;
                }
                Err(_) => return,
            };

            if session.state() != SessionState::Active {
                tracing::debug!("Client {} was reset, dropping {:?}", session.id(), request);
                return;
            }

            tracing::trace!("Client {} request: {:?}", session.id(), request);

            let response = match request {
                Request::Disconnect => {
                    session.begin_disconnect();
                    session.close(&self.store);
                    if let Err(e) = session.respond(Response::new(OpCode::Disconnect, result::OK)) {
                        tracing::warn!("Failed to acknowledge disconnect of {}: {}", session.id(), e);
                    }
                    return;
                }
                Request::Subscribe { key } => {
                    let existed = session.subscribe(&self.store, &key).unwrap_or_else(|e| {
                        tracing::warn!("Subscribe of {} to {:?} failed: {}", session.id(), key, e);
                        false
                    });
                    Response::subscribe(existed)
                }
                Request::Unsubscribe { key } => {
                    let removed = session.unsubscribe(&self.store, &key).unwrap_or_else(|e| {
                        tracing::warn!("Unsubscribe of {} from {:?} failed: {}", session.id(), key, e);
                        false
                    });
                    Response::unsubscribe(removed)
                }
            };

            if let Err(e) = session.respond(response) {
                tracing::warn!("Failed to answer client {}: {}", session.id(), e);
                return;
            }
        }
    }

    /// Force every active client to `Closed` without acknowledgment
    ///
    /// Subscriptions are removed and channels closed. Each session thread
    /// wakes on the close signal and frees its slot right away, so queued
    /// connects are admitted without waiting for the old clients.
    pub fn reset(&self) -> usize {
        let sessions = self.sessions();
        let mut closed = 0;
        for session in sessions {
            if session.close(&self.store) {
                closed += 1;
            }
            session.close_responses();
        }
        tracing::info!("Reset closed {} client sessions", closed);
        closed
    }
}

/// Read requests on a dedicated thread and hand them over one at a time
///
/// The thread ends after forwarding the first error (end of stream
/// included), or once the session thread stops receiving. A session closed
/// by a reset leaves this thread blocked in its read until the client
/// writes again or closes its request channel.
fn spawn_request_reader(
    client: ClientId,
    mut requests: Box<dyn Read + Send>,
) -> std::io::Result<Receiver<Result<Request>>> {
    let (tx, rx) = bounded(0);
    std::thread::Builder::new()
        .name(format!("kvs-requests-{}", client))
        .spawn(move || loop {
            let request = read_request(&mut requests);
            let failed = request.is_err();
            if tx.send(request).is_err() || failed {
                return;
            }
        })?;
    Ok(rx)
}
