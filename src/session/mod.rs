//! Session Module
//!
//! Client sessions over three byte-stream channels each.
//!
//! ## Architecture
//! - A registration reader pushes connect requests into a bounded queue
//! - A fixed pool of session threads, one per slot, serves clients
//! - Requests are routed through the shared [`crate::engine::Store`]
//! - `SIGUSR1` resets every session (see [`signal`])

mod manager;
mod state;
mod transport;
pub mod signal;

pub use manager::SessionManager;
pub use state::{ClientSession, SessionState};
pub use transport::{make_fifo, remove_fifo, FifoTransport, Transport};
