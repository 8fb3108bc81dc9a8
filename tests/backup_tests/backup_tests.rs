//! Tests for backups
//!
//! These tests verify:
//! - Backup file format
//! - Snapshots are point-in-time under concurrent writes
//! - Concurrent backups never exceed the configured limit, and a start
//!   beyond it blocks until a worker finishes
//! - A failed backup leaves the store usable

use std::fs;
use std::io::{self, Write};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bucketkv::backup::{BackupCoordinator, Snapshot};
use bucketkv::table::PartitionedTable;
use bucketkv::{Config, KvsError, Store};
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn store_with_backups(max_backups: usize) -> Store {
    let config = Config::builder().max_backups(max_backups).build();
    Store::open(config).unwrap()
}

/// Sink whose writes block until its gate sender is dropped
struct GatedSink {
    gate: Receiver<()>,
    written: Arc<Mutex<Vec<u8>>>,
}

impl Write for GatedSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = self.gate.recv();
        self.written.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn gated_sink() -> (Sender<()>, GatedSink, Arc<Mutex<Vec<u8>>>) {
    let (gate_tx, gate) = bounded(0);
    let written = Arc::new(Mutex::new(Vec::new()));
    let sink = GatedSink {
        gate,
        written: Arc::clone(&written),
    };
    (gate_tx, sink, written)
}

// =============================================================================
// Snapshot Tests
// =============================================================================

#[test]
fn test_snapshot_is_a_copy() {
    let table = PartitionedTable::new();
    table.put("a", "1").unwrap();

    let snapshot = Snapshot::capture(&table);
    table.put("a", "2").unwrap();
    table.put("b", "3").unwrap();

    assert_eq!(snapshot.entries(), &[("a".to_string(), "1".to_string())]);
}

#[test]
fn test_snapshot_write_format() {
    let table = PartitionedTable::new();
    table.put("b", "2").unwrap();
    table.put("a", "1").unwrap();

    let mut out = Vec::new();
    Snapshot::capture(&table).write_to(&mut out).unwrap();
    assert_eq!(String::from_utf8(out).unwrap(), "(a, 1)\n(b, 2)\n");
}

// =============================================================================
// Backup Tests
// =============================================================================

#[test]
fn test_backup_file_contents() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("job-1.bck");
    let store = store_with_backups(1);
    store.batch_write(&[("b", "2"), ("a", "1")]).unwrap();

    store.backup(&path).unwrap();
    store.wait_for_backups();

    assert_eq!(fs::read_to_string(&path).unwrap(), "(a, 1)\n(b, 2)\n");
    assert_eq!(store.backups_in_flight(), 0);
}

#[test]
fn test_backup_is_point_in_time() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(store_with_backups(2));
    store.batch_write(&[("a", "0"), ("z", "0")]).unwrap();

    let writer = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            for i in 1..300 {
                let v = i.to_string();
                store.batch_write(&[("a", v.as_str()), ("z", v.as_str())]).unwrap();
            }
        })
    };

    let paths: Vec<_> = (0..10)
        .map(|n| {
            let path = temp_dir.path().join(format!("snap-{}.bck", n));
            store.backup(&path).unwrap();
            path
        })
        .collect();

    writer.join().unwrap();
    store.wait_for_backups();

    for path in paths {
        let contents = fs::read_to_string(&path).unwrap();
        let values: Vec<&str> = contents
            .lines()
            .map(|line| line.trim_end_matches(')').split(", ").nth(1).unwrap())
            .collect();
        assert_eq!(values.len(), 2);
        assert_eq!(values[0], values[1], "torn snapshot in {}", path.display());
    }
}

#[test]
fn test_coordinator_writes_every_backup() {
    let temp_dir = TempDir::new().unwrap();
    let coordinator = BackupCoordinator::new(2);
    let table = PartitionedTable::new();
    for i in 0..200 {
        table.put(&format!("k{}", i), "value").unwrap();
    }

    assert_eq!(coordinator.limit(), 2);
    for n in 0..8 {
        coordinator
            .start(&table, &temp_dir.path().join(format!("b{}.bck", n)))
            .unwrap();
        assert!(coordinator.in_flight() <= coordinator.limit());
    }
    coordinator.wait_all();

    assert_eq!(coordinator.in_flight(), 0);
    for n in 0..8 {
        let contents = fs::read_to_string(temp_dir.path().join(format!("b{}.bck", n))).unwrap();
        assert_eq!(contents.lines().count(), 200);
    }
}

#[test]
fn test_coordinator_blocks_beyond_limit() {
    let coordinator = BackupCoordinator::new(2);
    let table = PartitionedTable::new();
    table.put("a", "1").unwrap();

    let (gate1, first, first_out) = gated_sink();
    let (gate2, second, _) = gated_sink();
    coordinator.start_with_writer(&table, first, "first").unwrap();
    coordinator.start_with_writer(&table, second, "second").unwrap();
    assert_eq!(coordinator.in_flight(), 2);

    let (done_tx, done_rx) = bounded(1);
    thread::scope(|s| {
        s.spawn(|| {
            coordinator.start_with_writer(&table, Vec::new(), "third").unwrap();
            done_tx.send(()).unwrap();
        });

        let early = done_rx.recv_timeout(Duration::from_millis(200));
        let held = coordinator.in_flight();
        drop(gate1);
        assert_eq!(early, Err(RecvTimeoutError::Timeout));
        assert_eq!(held, 2);

        let admitted = done_rx.recv_timeout(Duration::from_secs(5));
        let held = coordinator.in_flight();
        drop(gate2);
        assert!(admitted.is_ok());
        assert!(held <= coordinator.limit());
    });

    coordinator.wait_all();
    assert_eq!(coordinator.in_flight(), 0);
    assert_eq!(String::from_utf8(first_out.lock().clone()).unwrap(), "(a, 1)\n");
}

#[test]
fn test_failed_backup_is_isolated() {
    let temp_dir = TempDir::new().unwrap();
    let store = store_with_backups(1);
    store.put("a", "1").unwrap();

    let bad = temp_dir.path().join("missing-dir").join("x.bck");
    assert!(matches!(store.backup(&bad), Err(KvsError::Backup(_))));

    // the admission token came back, so the next backup is not blocked
    let good = temp_dir.path().join("ok.bck");
    store.backup(&good).unwrap();
    store.wait_for_backups();

    assert_eq!(fs::read_to_string(&good).unwrap(), "(a, 1)\n");
    assert_eq!(store.get("a").unwrap(), Some("1".to_string()));
}

#[test]
fn test_terminate_waits_for_backups() {
    let temp_dir = TempDir::new().unwrap();
    let store = store_with_backups(1);
    for i in 0..100 {
        store.put(&format!("k{}", i), "v").unwrap();
    }

    let path = temp_dir.path().join("final.bck");
    store.backup(&path).unwrap();
    store.terminate().unwrap();

    assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 100);
}
