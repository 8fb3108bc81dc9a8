//! Protocol Module
//!
//! Defines the wire protocol spoken over the client channels.
//!
//! Every client owns three one-way byte streams (request, response,
//! notification) and announces them on a shared registration channel.
//! All fields are fixed width and NUL padded.
//!
//! ### Connect (registration channel)
//! ```text
//! ┌──────────┬──────────────┬──────────────┬──────────────┐
//! │ Op (1)   │ req path(40) │ resp path(40)│ notif path(40)│
//! └──────────┴──────────────┴──────────────┴──────────────┘
//! ```
//!
//! ### Request (request channel)
//! ```text
//! ┌──────────┬─────────────────────────────┐
//! │ Op (1)   │ key (41, sub/unsub only)    │
//! └──────────┴─────────────────────────────┘
//! ```
//!
//! ### Response (response channel)
//! ```text
//! ┌──────────┬──────────┐
//! │ Op (1)   │Result (1)│
//! └──────────┴──────────┘
//! ```
//!
//! ### Notification (notification channel, no opcode)
//! ```text
//! ┌─────────────────────┬─────────────────────┐
//! │      key (41)       │ value / DELETE (41) │
//! └─────────────────────┴─────────────────────┘
//! ```
//!
//! ### Opcodes
//! - 0x01: CONNECT
//! - 0x02: DISCONNECT
//! - 0x03: SUBSCRIBE
//! - 0x04: UNSUBSCRIBE

mod command;
mod response;
mod codec;

pub use command::{ConnectRequest, OpCode, Request};
pub use response::{Response, result};
pub use codec::{
    decode_field, encode_connect, encode_notification, encode_request, encode_response,
    read_connect, read_notification, read_request, read_response, write_request,
    write_response,
};

/// Width of a channel path field in the connect message
pub const PIPE_PATH_SIZE: usize = 40;

/// Width of a key (or value) field in requests and notifications
pub const KEY_MESSAGE_SIZE: usize = 41;

/// Size of a full connect message
pub const CONNECT_MESSAGE_SIZE: usize = 1 + 3 * PIPE_PATH_SIZE;

/// Value sent to subscribers when their key is deleted
pub const DELETE_MARKER: &str = "DELETE";
