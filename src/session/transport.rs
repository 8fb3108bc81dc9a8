//! Channel transport
//!
//! Opens the three per-client byte streams named in a connect message.

use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

/// Opens client channels by path
///
/// The server opens channels in the order notification, request, response,
/// which is the order a client opens its ends in. Named pipes block on open
/// until the peer shows up, so the order matters.
pub trait Transport: Send + Sync {
    /// Open the notification channel for writing
    fn open_notification(&self, path: &str) -> io::Result<Box<dyn Write + Send>>;

    /// Open the request channel for reading
    fn open_request(&self, path: &str) -> io::Result<Box<dyn Read + Send>>;

    /// Open the response channel for writing
    fn open_response(&self, path: &str) -> io::Result<Box<dyn Write + Send>>;
}

/// Named-pipe transport
#[derive(Debug, Default, Clone, Copy)]
pub struct FifoTransport;

impl Transport for FifoTransport {
    fn open_notification(&self, path: &str) -> io::Result<Box<dyn Write + Send>> {
        Ok(Box::new(OpenOptions::new().write(true).open(path)?))
    }

    fn open_request(&self, path: &str) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(File::open(path)?))
    }

    fn open_response(&self, path: &str) -> io::Result<Box<dyn Write + Send>> {
        Ok(Box::new(OpenOptions::new().write(true).open(path)?))
    }
}

/// Create a named pipe at `path`, replacing whatever was there
pub fn make_fifo(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    // SAFETY: c_path is a valid NUL-terminated string for the whole call
    let rc = unsafe { libc::mkfifo(c_path.as_ptr(), 0o640) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Remove a named pipe, ignoring a missing file
pub fn remove_fifo(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
