//! Reset signal
//!
//! `SIGUSR1` asks the server to drop every connected client. The signal is
//! blocked in all threads and consumed synchronously by one waiter thread,
//! so no handler ever runs on a worker.

use std::io;

fn reset_set() -> libc::sigset_t {
    // SAFETY: sigset_t is plain data; sigemptyset initializes it
    unsafe {
        let mut set: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut set);
        libc::sigaddset(&mut set, libc::SIGUSR1);
        set
    }
}

/// Block the reset signal in the calling thread
///
/// Call from `main` before spawning threads; children inherit the mask.
pub fn block_reset_signal() -> io::Result<()> {
    let set = reset_set();
    // SAFETY: set is initialized and the old-mask pointer may be null
    let rc = unsafe { libc::pthread_sigmask(libc::SIG_BLOCK, &set, std::ptr::null_mut()) };
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc));
    }
    Ok(())
}

/// Block until a reset signal is delivered
pub fn wait_reset_signal() -> io::Result<()> {
    let set = reset_set();
    let mut signal: libc::c_int = 0;
    // SAFETY: both pointers are valid for the duration of the call
    let rc = unsafe { libc::sigwait(&set, &mut signal) };
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc));
    }
    Ok(())
}
