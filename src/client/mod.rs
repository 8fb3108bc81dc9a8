//! Client Module
//!
//! Client side of the session protocol.
//!
//! ## Connection sequence (named pipes)
//! 1. Create the three client FIFOs
//! 2. Write a CONNECT message on the server's registration FIFO
//! 3. Open notification (read), request (write), response (read), in the
//!    order the server opens its ends
//! 4. Read the connect acknowledgment
//!
//! Notifications arrive on their own channel and are consumed by a
//! listener thread; the listener ends when the server closes the channel,
//! which disconnects [`Listener::closed`].

mod command;

pub use command::ClientCommand;

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;

use crossbeam::channel::{bounded, never, Receiver};

use crate::error::{KvsError, Result};
use crate::protocol::{
    encode_connect, read_notification, read_response, result, write_request, ConnectRequest,
    OpCode, Request, Response,
};
use crate::session::{make_fifo, remove_fifo};

/// Paths of a client's three channels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientPaths {
    pub request: PathBuf,
    pub response: PathBuf,
    pub notification: PathBuf,
}

impl ClientPaths {
    /// Conventional paths for a client id: `/tmp/req<id>`, ...
    pub fn for_id(id: &str) -> Self {
        Self {
            request: PathBuf::from(format!("/tmp/req{}", id)),
            response: PathBuf::from(format!("/tmp/resp{}", id)),
            notification: PathBuf::from(format!("/tmp/notif{}", id)),
        }
    }

    /// Connect message announcing these paths
    pub fn connect_request(&self) -> Result<ConnectRequest> {
        let as_str = |p: &Path| {
            p.to_str()
                .map(str::to_string)
                .ok_or_else(|| KvsError::Protocol(format!("Path is not UTF-8: {}", p.display())))
        };
        Ok(ConnectRequest {
            request_path: as_str(self.request.as_path())?,
            response_path: as_str(self.response.as_path())?,
            notification_path: as_str(self.notification.as_path())?,
        })
    }

    fn remove_all(&self) {
        for path in [&self.request, &self.response, &self.notification] {
            if let Err(e) = remove_fifo(path) {
                tracing::warn!("Failed to remove {}: {}", path.display(), e);
            }
        }
    }
}

/// Handle on the notification listener thread
pub struct Listener {
    handle: JoinHandle<()>,
    closed: Receiver<()>,
}

impl Listener {
    /// Disconnects once the listener thread has exited
    ///
    /// Nothing is ever sent on it, so it is only useful in `select!`.
    pub fn closed(&self) -> &Receiver<()> {
        &self.closed
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    fn join(self) {
        if self.handle.join().is_err() {
            tracing::error!("Notification listener panicked");
        }
    }
}

/// Spawn a thread feeding every notification to `on_notification`
///
/// The thread exits when the channel reaches end of stream.
pub fn spawn_listener<R, F>(mut notifications: R, mut on_notification: F) -> std::io::Result<Listener>
where
    R: Read + Send + 'static,
    F: FnMut(String, String) + Send + 'static,
{
    let (closed_tx, closed) = bounded::<()>(0);
    let handle = std::thread::Builder::new()
        .name("kvs-notifications".into())
        .spawn(move || {
            let _closed = closed_tx;
            loop {
                match read_notification(&mut notifications) {
                    Ok((key, value)) => on_notification(key, value),
                    Err(KvsError::Io(ref e)) if e.kind() == ErrorKind::UnexpectedEof => {
                        tracing::debug!("Notification channel closed");
                        return;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to read notification: {}", e);
                        return;
                    }
                }
            }
        })?;
    Ok(Listener { handle, closed })
}

/// A connected client
pub struct KvsClient<W: Write, R: Read> {
    requests: W,
    responses: R,
    listener: Option<Listener>,
    paths: Option<ClientPaths>,
}

impl<W: Write, R: Read> KvsClient<W, R> {
    /// Wrap already connected request/response channels
    pub fn from_channels(requests: W, responses: R) -> Self {
        Self {
            requests,
            responses,
            listener: None,
            paths: None,
        }
    }

    /// Attach the notification listener, joined on disconnect
    pub fn with_listener(mut self, listener: Listener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Whether the server has closed the notification channel
    pub fn listener_finished(&self) -> bool {
        self.listener.as_ref().map_or(false, Listener::is_finished)
    }

    /// Signal that disconnects when the server closes the notification
    /// channel. Never fires for a client without a listener.
    pub fn closed_signal(&self) -> Receiver<()> {
        self.listener.as_ref().map_or_else(never, |l| l.closed().clone())
    }

    fn call(&mut self, request: &Request) -> Result<Response> {
        write_request(&mut self.requests, request)?;
        let response = read_response(&mut self.responses)?;
        if response.opcode != request.opcode() {
            return Err(KvsError::Protocol(format!(
                "Expected {:?} response, got {:?}",
                request.opcode(),
                response.opcode
            )));
        }
        Ok(response)
    }

    /// Subscribe to a key. Returns false if the key does not exist.
    pub fn subscribe(&mut self, key: &str) -> Result<bool> {
        let response = self.call(&Request::Subscribe { key: key.to_string() })?;
        Ok(response.result == result::KEY_EXISTS)
    }

    /// Unsubscribe from a key. Returns false if there was no subscription.
    pub fn unsubscribe(&mut self, key: &str) -> Result<bool> {
        let response = self.call(&Request::Unsubscribe { key: key.to_string() })?;
        Ok(response.result == result::OK)
    }

    /// End the session and wait for the notification listener
    pub fn disconnect(mut self) -> Result<()> {
        self.call(&Request::Disconnect)?;
        self.release();
        Ok(())
    }

    /// Drop a session the server already ended
    ///
    /// Sends nothing. Joins the listener and removes the client FIFOs.
    pub fn abandon(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.join();
        }
        if let Some(paths) = self.paths.take() {
            paths.remove_all();
        }
    }
}

impl KvsClient<File, File> {
    /// Connect to a server through its registration FIFO
    pub fn connect<F>(registry: &Path, paths: ClientPaths, on_notification: F) -> Result<Self>
    where
        F: FnMut(String, String) + Send + 'static,
    {
        let message = encode_connect(&paths.connect_request()?)?;

        for path in [&paths.request, &paths.response, &paths.notification] {
            make_fifo(path)?;
        }

        {
            let mut registry = OpenOptions::new().write(true).open(registry)?;
            registry.write_all(&message)?;
        }

        let notifications = File::open(&paths.notification)?;
        let requests = OpenOptions::new().write(true).open(&paths.request)?;
        let mut responses = File::open(&paths.response)?;

        let ack = read_response(&mut responses)?;
        if ack.opcode != OpCode::Connect || ack.result != result::OK {
            paths.remove_all();
            return Err(KvsError::Session(format!("Server refused connection: {:?}", ack)));
        }

        let listener = spawn_listener(notifications, on_notification)?;
        Ok(Self {
            requests,
            responses,
            listener: Some(listener),
            paths: Some(paths),
        })
    }
}
