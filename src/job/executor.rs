//! Job executor
//!
//! Runs one `.job` file against the store, writing results to the matching
//! `.out` file and backups to `<name>-<n>.bck`.

use std::ffi::OsString;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::engine::Store;
use crate::error::Result;
use super::parser::{parse_line, JobCommand, HELP_TEXT};

/// Output file of a job: `<name>.job` -> `<name>.out`
pub fn output_path(job: &Path) -> PathBuf {
    job.with_extension("out")
}

/// Path of the `n`-th backup of a job: `<name>-<n>.bck`
pub fn backup_path(job: &Path, n: u32) -> PathBuf {
    let mut name: OsString = job.with_extension("").into_os_string();
    name.push(format!("-{}.bck", n));
    PathBuf::from(name)
}

/// Counters for one job run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct JobReport {
    /// Commands executed (blank lines and comments excluded)
    pub commands: usize,

    /// Commands that were invalid or failed
    pub failed: usize,

    /// Backups started
    pub backups: u32,
}

/// Executes job scripts against a store
pub struct JobExecutor<'a> {
    store: &'a Store,
}

impl<'a> JobExecutor<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Run a job file, truncating and writing its `.out` file
    pub fn run_file(&self, job: &Path) -> Result<JobReport> {
        let input = BufReader::new(File::open(job)?);
        let mut out = BufWriter::new(File::create(output_path(job))?);
        let report = self.run(input, &mut out, job)?;
        out.flush()?;
        Ok(report)
    }

    /// Run a script read from `input`
    ///
    /// `job` names the script for backup file naming. A failing command is
    /// logged and counted; the rest of the script still runs.
    pub fn run<R, W>(&self, input: R, out: &mut W, job: &Path) -> Result<JobReport>
    where
        R: BufRead,
        W: Write,
    {
        let mut report = JobReport::default();

        for (number, line) in input.lines().enumerate() {
            let line = line?;
            let command = match parse_line(&line) {
                Ok(Some(command)) => command,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(
                        "{}:{}: Invalid command. See HELP for usage ({})",
                        job.display(),
                        number + 1,
                        e
                    );
                    report.commands += 1;
                    report.failed += 1;
                    continue;
                }
            };

            report.commands += 1;
            if let Err(e) = self.execute(command, out, job, &mut report) {
                tracing::warn!("{}:{}: {}", job.display(), number + 1, e);
                report.failed += 1;
            }
        }

        Ok(report)
    }

    fn execute<W: Write>(&self, command: JobCommand, out: &mut W, job: &Path, report: &mut JobReport) -> Result<()> {
        match command {
            JobCommand::Write(pairs) => self.store.batch_write(&pairs),
            JobCommand::Read(keys) => self.store.batch_read(&keys, out),
            JobCommand::Delete(keys) => self.store.batch_delete(&keys, out),
            JobCommand::Show => self.store.show(out),
            JobCommand::Wait(delay_ms) => {
                if delay_ms > 0 {
                    out.write_all(b"Waiting...\n")?;
                    self.store.wait(delay_ms);
                }
                Ok(())
            }
            JobCommand::Backup => {
                let path = backup_path(job, report.backups + 1);
                self.store.backup(&path)?;
                report.backups += 1;
                Ok(())
            }
            JobCommand::Help => {
                print!("{}", HELP_TEXT);
                Ok(())
            }
        }
    }
}
