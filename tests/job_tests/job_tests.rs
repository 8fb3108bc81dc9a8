//! Tests for batch job execution
//!
//! These tests verify:
//! - `.out` contents for every command
//! - Backup file naming and contents
//! - Invalid lines do not stop a job
//! - Several job files processed by a worker pool

use std::fs;
use std::io::Cursor;
use std::path::Path;

use bucketkv::job::{is_job_file, run_jobs, JobExecutor, JobQueue};
use bucketkv::{Config, Store};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn write_job(dir: &Path, name: &str, script: &str) {
    fs::write(dir.join(name), script).unwrap();
}

fn read(dir: &Path, name: &str) -> String {
    fs::read_to_string(dir.join(name)).unwrap()
}

// =============================================================================
// Executor Tests
// =============================================================================

#[test]
fn test_job_output() {
    let store = Store::open(Config::default()).unwrap();
    let script = "\
WRITE [(b,2)(a,1)]
READ [b,a,c]
# comment
DELETE [a,z]
SHOW
WAIT 0
";
    let mut out = Vec::new();
    let report = JobExecutor::new(&store)
        .run(Cursor::new(script), &mut out, Path::new("inline.job"))
        .unwrap();

    assert_eq!(
        String::from_utf8(out).unwrap(),
        "[(a,1)(b,2)(c,KVSERROR)]\n[(z,KVSMISSING)]\n(b, 2)\n"
    );
    assert_eq!(report.commands, 5);
    assert_eq!(report.failed, 0);
}

#[test]
fn test_wait_prints_waiting() {
    let store = Store::open(Config::default()).unwrap();
    let mut out = Vec::new();
    JobExecutor::new(&store)
        .run(Cursor::new("WAIT 5\n"), &mut out, Path::new("w.job"))
        .unwrap();
    assert_eq!(String::from_utf8(out).unwrap(), "Waiting...\n");
}

#[test]
fn test_invalid_lines_are_skipped() {
    let store = Store::open(Config::default()).unwrap();
    let script = "WRITE [(a,1)]\nFROB\nWRITE [(_x,1)]\nREAD [a]\n";
    let mut out = Vec::new();
    let report = JobExecutor::new(&store)
        .run(Cursor::new(script), &mut out, Path::new("bad.job"))
        .unwrap();

    assert_eq!(String::from_utf8(out).unwrap(), "[(a,1)]\n");
    assert_eq!(report.commands, 4);
    assert_eq!(report.failed, 2);
}

#[test]
fn test_job_file_backups() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    write_job(dir, "test.job", "WRITE [(a,1)]\nBACKUP\nWRITE [(b,2)]\nBACKUP\n");

    let store = Store::open(Config::default()).unwrap();
    let report = JobExecutor::new(&store).run_file(&dir.join("test.job")).unwrap();
    store.wait_for_backups();

    assert_eq!(report.backups, 2);
    assert_eq!(read(dir, "test.out"), "");
    assert_eq!(read(dir, "test-1.bck"), "(a, 1)\n");
    assert_eq!(read(dir, "test-2.bck"), "(a, 1)\n(b, 2)\n");
}

// =============================================================================
// Directory Tests
// =============================================================================

#[test]
fn test_queue_only_yields_job_files() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    write_job(dir, "one.job", "SHOW\n");
    write_job(dir, "notes.txt", "SHOW\n");
    write_job(dir, "two.job", "SHOW\n");

    let queue = JobQueue::open(dir).unwrap();
    let mut jobs = Vec::new();
    while let Some(job) = queue.next_job() {
        assert!(is_job_file(&job));
        jobs.push(job.file_name().unwrap().to_string_lossy().into_owned());
    }
    jobs.sort();
    assert_eq!(jobs, vec!["one.job", "two.job"]);
}

#[test]
fn test_run_jobs_processes_every_file() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    for n in 0..6 {
        let prefix = (b'a' + n) as char;
        write_job(
            dir,
            &format!("job{}.job", n),
            &format!("WRITE [({p}1,x)({p}2,y)]\nREAD [{p}2,{p}1]\n", p = prefix),
        );
    }

    let store = Store::open(Config::default()).unwrap();
    let summary = run_jobs(&store, dir, 3).unwrap();

    assert_eq!(summary.files, 6);
    assert_eq!(summary.failed_files, 0);
    assert_eq!(summary.commands, 12);
    assert_eq!(store.len().unwrap(), 12);
    assert_eq!(read(dir, "job2.out"), "[(c1,x)(c2,y)]\n");
}

#[test]
fn test_run_jobs_missing_directory() {
    let temp_dir = TempDir::new().unwrap();
    let store = Store::open(Config::default()).unwrap();
    assert!(run_jobs(&store, &temp_dir.path().join("nope"), 1).is_err());
}

#[test]
fn test_run_jobs_shared_store() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    write_job(dir, "a.job", "WRITE [(k,1)]\nBACKUP\n");
    write_job(dir, "b.job", "WRITE [(m,2)]\n");

    let store = Store::open(Config::builder().max_backups(2).build()).unwrap();
    let summary = run_jobs(&store, dir, 2).unwrap();
    store.wait_for_backups();

    assert_eq!(summary.backups, 1);
    let backup = read(dir, "a-1.bck");
    assert!(backup.contains("(k, 1)\n"));

    let mut show = Vec::new();
    store.show(&mut show).unwrap();
    assert_eq!(String::from_utf8(show).unwrap(), "(k, 1)\n(m, 2)\n");
}
