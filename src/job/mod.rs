//! Job Module
//!
//! Batch execution of `.job` scripts from a directory.
//!
//! ## Architecture
//! - A shared, mutex-protected directory cursor hands out job files
//! - `worker_threads` threads each pull files until the cursor is empty
//! - Every file is executed by a [`JobExecutor`] against the shared store

mod executor;
mod parser;

pub use executor::{backup_path, output_path, JobExecutor, JobReport};
pub use parser::{parse_line, JobCommand, HELP_TEXT};

use std::fs::ReadDir;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::engine::Store;
use crate::error::Result;

/// Whether a path names a job script
pub fn is_job_file(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext == "job")
}

/// Directory cursor shared by the job workers
pub struct JobQueue {
    entries: Mutex<ReadDir>,
}

impl JobQueue {
    /// Open a job directory
    pub fn open(dir: &Path) -> Result<Self> {
        Ok(Self {
            entries: Mutex::new(std::fs::read_dir(dir)?),
        })
    }

    /// Next `.job` file, or `None` when the directory is exhausted
    pub fn next_job(&self) -> Option<PathBuf> {
        let mut entries = self.entries.lock();
        for entry in entries.by_ref() {
            match entry {
                Ok(entry) => {
                    let path = entry.path();
                    if is_job_file(&path) {
                        return Some(path);
                    }
                }
                Err(e) => tracing::warn!("Failed to read job directory entry: {}", e),
            }
        }
        None
    }
}

/// Totals over a whole batch run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub files: usize,
    pub failed_files: usize,
    pub commands: usize,
    pub failed_commands: usize,
    pub backups: u32,
}

impl BatchSummary {
    fn record(&mut self, report: &JobReport) {
        self.files += 1;
        self.commands += report.commands;
        self.failed_commands += report.failed;
        self.backups += report.backups;
    }
}

/// Run every job in `dir` on `threads` worker threads
///
/// Returns once all job files are processed. Backups started by the jobs
/// may still be running; see [`Store::wait_for_backups`].
pub fn run_jobs(store: &Store, dir: &Path, threads: usize) -> Result<BatchSummary> {
    let queue = JobQueue::open(dir)?;
    let summary = Mutex::new(BatchSummary::default());

    std::thread::scope(|scope| {
        for worker in 0..threads.max(1) {
            let queue = &queue;
            let summary = &summary;
            scope.spawn(move || {
                let executor = JobExecutor::new(store);
                while let Some(job) = queue.next_job() {
                    tracing::debug!("Worker {} running {}", worker, job.display());
                    match executor.run_file(&job) {
                        Ok(report) => summary.lock().record(&report),
                        Err(e) => {
                            tracing::error!("Job {} failed: {}", job.display(), e);
                            let mut summary = summary.lock();
                            summary.files += 1;
                            summary.failed_files += 1;
                        }
                    }
                }
            });
        }
    });

    Ok(summary.into_inner())
}
