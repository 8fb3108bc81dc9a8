//! Tests for client sessions
//!
//! These tests verify:
//! - Connect acknowledgment and per-request result codes
//! - Disconnect removes every subscription of the client
//! - Admission never exceeds `max_sessions`
//! - Reset closes every session without acknowledgment and frees its slot
//! - Deleted keys stop counting against the subscription limit
//! - A client's listener signals when the server ends the session
//! - Protocol errors end the session
//! - The named-pipe path end to end

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, ErrorKind, Read, Write};
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bucketkv::client::{spawn_listener, ClientPaths, KvsClient};
use bucketkv::protocol::{
    encode_connect, read_notification, read_response, result, ConnectRequest, OpCode,
    CONNECT_MESSAGE_SIZE,
};
use bucketkv::session::{
    make_fifo, ClientSession, FifoTransport, SessionManager, SessionState, Transport,
};
use bucketkv::{Config, Store};
use crossbeam::channel::{RecvTimeoutError, TryRecvError};
use parking_lot::Mutex;
use tempfile::TempDir;

// =============================================================================
// In-memory transport
// =============================================================================

/// Server ends of one client's channels
struct ServerEnds {
    notification: Option<UnixStream>,
    request: Option<UnixStream>,
    response: Option<UnixStream>,
}

/// Transport handing out socket pairs registered under channel paths
#[derive(Default)]
struct MemoryTransport {
    clients: Mutex<HashMap<String, ServerEnds>>,
}

fn take_end(
    clients: &Mutex<HashMap<String, ServerEnds>>,
    path: &str,
    pick: fn(&mut ServerEnds) -> Option<UnixStream>,
) -> std::io::Result<UnixStream> {
    let id = path.rsplit('/').next().unwrap_or(path).trim_start_matches(|c: char| c.is_alphabetic());
    clients
        .lock()
        .get_mut(id)
        .and_then(pick)
        .ok_or_else(|| std::io::Error::new(ErrorKind::NotFound, path.to_string()))
}

impl Transport for MemoryTransport {
    fn open_notification(&self, path: &str) -> std::io::Result<Box<dyn Write + Send>> {
        Ok(Box::new(take_end(&self.clients, path, |e| e.notification.take())?))
    }

    fn open_request(&self, path: &str) -> std::io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(take_end(&self.clients, path, |e| e.request.take())?))
    }

    fn open_response(&self, path: &str) -> std::io::Result<Box<dyn Write + Send>> {
        Ok(Box::new(take_end(&self.clients, path, |e| e.response.take())?))
    }
}

/// Client ends of one registered client
struct TestClient {
    notifications: UnixStream,
    requests: UnixStream,
    responses: UnixStream,
}

impl MemoryTransport {
    /// Create the channels of client `id`, named `/mem/req<id>` and so on
    fn register(&self, id: &str) -> (ConnectRequest, TestClient) {
        let (notif_server, notif_client) = UnixStream::pair().unwrap();
        let (req_server, req_client) = UnixStream::pair().unwrap();
        let (resp_server, resp_client) = UnixStream::pair().unwrap();

        self.clients.lock().insert(
            id.to_string(),
            ServerEnds {
                notification: Some(notif_server),
                request: Some(req_server),
                response: Some(resp_server),
            },
        );

        let request = ConnectRequest {
            request_path: format!("/mem/req{}", id),
            response_path: format!("/mem/resp{}", id),
            notification_path: format!("/mem/notif{}", id),
        };
        let client = TestClient {
            notifications: notif_client,
            requests: req_client,
            responses: resp_client,
        };
        (request, client)
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

struct Harness {
    store: Arc<Store>,
    transport: Arc<MemoryTransport>,
    manager: Arc<SessionManager>,
    workers: Vec<JoinHandle<()>>,
}

impl Harness {
    fn new(max_sessions: usize, max_subscriptions: usize) -> Self {
        let config = Config::builder()
            .max_sessions(max_sessions)
            .max_subscriptions(max_subscriptions)
            .build();
        let store = Arc::new(Store::open(config.clone()).unwrap());
        let transport = Arc::new(MemoryTransport::default());
        let manager = Arc::new(SessionManager::new(
            Arc::clone(&store),
            Arc::clone(&transport) as Arc<dyn Transport>,
            &config,
        ));
        let workers = manager.spawn_workers().unwrap();
        Self {
            store,
            transport,
            manager,
            workers,
        }
    }

    /// Register, submit and read the connect acknowledgment
    fn connect(&self, id: &str) -> (KvsClient<UnixStream, UnixStream>, UnixStream) {
        let (request, client) = self.transport.register(id);
        self.manager.submit(request).unwrap();

        let mut responses = client.responses;
        let ack = read_response(&mut responses).unwrap();
        assert_eq!(ack.opcode, OpCode::Connect);
        assert_eq!(ack.result, result::OK);

        (KvsClient::from_channels(client.requests, responses), client.notifications)
    }

    fn finish(self) {
        self.manager.shutdown();
        for worker in self.workers {
            worker.join().unwrap();
        }
    }
}

fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(5));
    }
}

// =============================================================================
// Request Tests
// =============================================================================

#[test]
fn test_subscribe_result_codes() {
    let harness = Harness::new(2, 10);
    harness.store.put("a", "1").unwrap();
    let (mut client, _notifications) = harness.connect("1");

    assert!(client.subscribe("a").unwrap());
    assert!(!client.subscribe("missing").unwrap());
    assert!(!client.subscribe("_invalid").unwrap());

    client.disconnect().unwrap();
    harness.finish();
}

#[test]
fn test_unsubscribe_result_codes() {
    let harness = Harness::new(2, 10);
    harness.store.put("a", "1").unwrap();
    let (mut client, _notifications) = harness.connect("1");

    assert!(!client.unsubscribe("a").unwrap());
    client.subscribe("a").unwrap();
    assert!(client.unsubscribe("a").unwrap());
    assert!(!client.unsubscribe("a").unwrap());

    client.disconnect().unwrap();
    harness.finish();
}

#[test]
fn test_notifications_reach_client() {
    let harness = Harness::new(2, 10);
    harness.store.put("a", "1").unwrap();
    let (mut client, mut notifications) = harness.connect("1");
    client.subscribe("a").unwrap();

    harness.store.batch_write(&[("a", "2")]).unwrap();
    harness.store.delete("a").unwrap();

    assert_eq!(read_notification(&mut notifications).unwrap(), ("a".into(), "2".into()));
    assert_eq!(read_notification(&mut notifications).unwrap(), ("a".into(), "DELETE".into()));

    client.disconnect().unwrap();
    harness.finish();
}

#[test]
fn test_subscription_limit() {
    let harness = Harness::new(1, 2);
    harness.store.batch_write(&[("a", "1"), ("b", "2"), ("c", "3")]).unwrap();
    let (mut client, _notifications) = harness.connect("1");

    assert!(client.subscribe("a").unwrap());
    assert!(client.subscribe("b").unwrap());
    assert!(!client.subscribe("c").unwrap());
    // re-subscribing to a held key is not a new subscription
    assert!(client.subscribe("a").unwrap());

    client.disconnect().unwrap();
    harness.finish();
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_disconnect_removes_subscriptions() {
    let harness = Harness::new(2, 10);
    harness.store.batch_write(&[("a", "1"), ("b", "2")]).unwrap();
    let (mut client, mut notifications) = harness.connect("1");
    client.subscribe("a").unwrap();
    client.subscribe("b").unwrap();

    let session_id = harness.manager.sessions()[0].id();
    client.disconnect().unwrap();

    // server closed the notification channel
    let mut rest = Vec::new();
    notifications.read_to_end(&mut rest).unwrap();
    assert!(rest.is_empty());

    wait_until(|| harness.manager.active_sessions() == 0);
    assert!(!harness.store.unsubscribe("a", session_id).unwrap());
    assert!(!harness.store.unsubscribe("b", session_id).unwrap());
    harness.finish();
}

#[test]
fn test_admission_bounded_by_capacity() {
    let harness = Harness::new(1, 10);
    let (first, _n1) = harness.connect("1");
    assert_eq!(harness.manager.active_sessions(), 1);

    let (request, second) = harness.transport.register("2");
    harness.manager.submit(request).unwrap();

    let mut responses = second.responses;
    responses.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
    let mut byte = [0u8; 1];
    let err = responses.read(&mut byte).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut));
    assert_eq!(harness.manager.active_sessions(), 1);

    first.disconnect().unwrap();

    responses.set_read_timeout(None).unwrap();
    let ack = read_response(&mut responses).unwrap();
    assert_eq!(ack.opcode, OpCode::Connect);
    assert_eq!(harness.manager.active_sessions(), 1);

    KvsClient::from_channels(second.requests, responses).disconnect().unwrap();
    harness.finish();
}

#[test]
fn test_reset_closes_sessions() {
    let harness = Harness::new(2, 10);
    harness.store.put("a", "1").unwrap();
    let (mut c1, mut n1) = harness.connect("1");
    let (mut c2, _n2) = harness.connect("2");
    c1.subscribe("a").unwrap();
    c2.subscribe("a").unwrap();

    let sessions = harness.manager.sessions();
    assert_eq!(harness.manager.reset(), 2);
    for session in &sessions {
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!harness.store.unsubscribe("a", session.id()).unwrap());
    }

    // no acknowledgment, channels are just closed
    let mut rest = Vec::new();
    n1.read_to_end(&mut rest).unwrap();
    assert!(rest.is_empty());

    // both clients are still connected on their side, yet the slots free up
    wait_until(|| harness.manager.active_sessions() == 0);
    assert!(c1.subscribe("a").is_err());

    let (c3, _n3) = harness.connect("3");
    c3.disconnect().unwrap();
    drop(c2);
    harness.finish();
}

#[test]
fn test_reset_admits_queued_connect() {
    let harness = Harness::new(1, 10);
    let (_idle, _idle_notifications) = harness.connect("1");

    let (request, queued) = harness.transport.register("2");
    harness.manager.submit(request).unwrap();

    assert_eq!(harness.manager.reset(), 1);

    let mut responses = queued.responses;
    responses.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let ack = read_response(&mut responses).unwrap();
    assert_eq!(ack.opcode, OpCode::Connect);
    assert_eq!(ack.result, result::OK);
    assert_eq!(harness.manager.active_sessions(), 1);

    responses.set_read_timeout(None).unwrap();
    KvsClient::from_channels(queued.requests, responses).disconnect().unwrap();
    harness.finish();
}

#[test]
fn test_reset_signals_client_listener() {
    let harness = Harness::new(1, 10);
    harness.store.put("a", "1").unwrap();
    let (client, notifications) = harness.connect("1");

    let seen = Arc::new(Mutex::new(Vec::new()));
    let listener = {
        let seen = Arc::clone(&seen);
        spawn_listener(notifications, move |key, value| seen.lock().push((key, value))).unwrap()
    };
    let mut client = client.with_listener(listener);
    let closed = client.closed_signal();

    client.subscribe("a").unwrap();
    harness.store.put("a", "2").unwrap();
    wait_until(|| seen.lock().len() == 1);
    assert_eq!(closed.recv_timeout(Duration::from_millis(50)), Err(RecvTimeoutError::Timeout));

    harness.manager.reset();
    assert_eq!(closed.recv_timeout(Duration::from_secs(5)), Err(RecvTimeoutError::Disconnected));
    assert!(client.listener_finished());
    assert_eq!(seen.lock().clone(), vec![("a".to_string(), "2".to_string())]);

    client.abandon();
    harness.finish();
}

#[test]
fn test_deleted_key_frees_subscription_quota() {
    let harness = Harness::new(1, 1);
    harness.store.batch_write(&[("a", "1"), ("b", "2")]).unwrap();
    let (mut client, _notifications) = harness.connect("1");

    assert!(client.subscribe("a").unwrap());
    harness.store.delete("a").unwrap();

    assert!(client.subscribe("b").unwrap());
    assert_eq!(harness.manager.sessions()[0].subscriptions(), vec!["b".to_string()]);

    client.disconnect().unwrap();
    harness.finish();
}

#[test]
fn test_session_state_transitions() {
    let store = Store::open(Config::default()).unwrap();
    store.put("a", "1").unwrap();
    let session = ClientSession::new(7, 0, Box::new(io::sink()), Box::new(io::sink()), 10);
    assert_eq!(session.state(), SessionState::Connecting);
    assert!(session.subscribe(&store, "a").is_err());

    session.activate();
    assert!(session.subscribe(&store, "a").unwrap());
    assert!(matches!(session.close_signal().try_recv(), Err(TryRecvError::Empty)));

    assert!(session.begin_disconnect());
    assert_eq!(session.state(), SessionState::Disconnecting);
    assert!(!session.begin_disconnect());
    assert!(session.subscribe(&store, "a").is_err());

    assert!(session.close(&store));
    assert_eq!(session.state(), SessionState::Closed);
    assert!(!session.close(&store));
    assert!(!store.is_subscribed("a", 7).unwrap());
    assert!(matches!(session.close_signal().try_recv(), Err(TryRecvError::Disconnected)));
}

#[test]
fn test_unknown_opcode_ends_session() {
    let harness = Harness::new(1, 10);
    let (request, client) = harness.transport.register("1");
    harness.manager.submit(request).unwrap();

    let mut responses = client.responses;
    read_response(&mut responses).unwrap();

    let mut requests = client.requests;
    requests.write_all(&[0x09]).unwrap();

    let mut rest = Vec::new();
    responses.read_to_end(&mut rest).unwrap();
    assert!(rest.is_empty());
    wait_until(|| harness.manager.active_sessions() == 0);
    harness.finish();
}

#[test]
fn test_failed_channel_open_frees_slot() {
    let harness = Harness::new(1, 10);
    harness
        .manager
        .submit(ConnectRequest {
            request_path: "/mem/reqX".into(),
            response_path: "/mem/respX".into(),
            notification_path: "/mem/notifX".into(),
        })
        .unwrap();

    let (client, _n) = harness.connect("1");
    client.disconnect().unwrap();
    harness.finish();
}

// =============================================================================
// Registration Tests
// =============================================================================

#[test]
fn test_serve_registry_skips_malformed_messages() {
    let harness = Harness::new(2, 10);
    let (r1, c1) = harness.transport.register("1");
    let (r2, c2) = harness.transport.register("2");

    let mut stream = Vec::new();
    stream.extend_from_slice(&encode_connect(&r1).unwrap());
    let mut garbage = vec![0u8; CONNECT_MESSAGE_SIZE];
    garbage[0] = OpCode::Subscribe as u8;
    stream.extend_from_slice(&garbage);
    stream.extend_from_slice(&encode_connect(&r2).unwrap());

    harness.manager.serve_registry(&mut stream.as_slice()).unwrap();

    for client in [c1, c2] {
        let mut responses = client.responses;
        let ack = read_response(&mut responses).unwrap();
        assert_eq!(ack.opcode, OpCode::Connect);
        KvsClient::from_channels(client.requests, responses).disconnect().unwrap();
    }
    harness.finish();
}

#[test]
fn test_submit_after_shutdown_fails() {
    let harness = Harness::new(1, 10);
    harness.manager.shutdown();
    let (request, _client) = harness.transport.register("1");
    assert!(harness.manager.submit(request).is_err());
    harness.finish();
}

// =============================================================================
// Named Pipe Tests
// =============================================================================

#[test]
fn test_fifo_session_end_to_end() {
    let temp_dir = TempDir::new().unwrap();
    let registry = temp_dir.path().join("reg");
    make_fifo(&registry).unwrap();

    let config = Config::builder().max_sessions(1).build();
    let store = Arc::new(Store::open(config.clone()).unwrap());
    store.put("a", "1").unwrap();
    let manager = Arc::new(SessionManager::new(Arc::clone(&store), Arc::new(FifoTransport), &config));
    let workers = manager.spawn_workers().unwrap();

    let registrar = {
        let manager = Arc::clone(&manager);
        let registry = registry.clone();
        thread::spawn(move || {
            let mut file = File::open(&registry).unwrap();
            manager.serve_registry(&mut file).unwrap();
        })
    };

    let paths = ClientPaths {
        request: temp_dir.path().join("req1"),
        response: temp_dir.path().join("resp1"),
        notification: temp_dir.path().join("notif1"),
    };
    let (tx, rx) = crossbeam::channel::unbounded();
    let mut client = KvsClient::connect(&registry, paths.clone(), move |key, value| {
        let _ = tx.send((key, value));
    })
    .unwrap();

    assert!(client.subscribe("a").unwrap());
    store.put("a", "2").unwrap();
    assert_eq!(
        rx.recv_timeout(Duration::from_secs(5)).unwrap(),
        ("a".to_string(), "2".to_string())
    );

    client.disconnect().unwrap();
    assert!(!paths.request.exists());

    registrar.join().unwrap();
    manager.shutdown();
    for worker in workers {
        worker.join().unwrap();
    }
}
