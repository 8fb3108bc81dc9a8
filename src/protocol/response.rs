//! Response definitions
//!
//! Represents acknowledgments sent back to clients.

use super::OpCode;

/// Result bytes carried by responses
pub mod result {
    /// Connect / disconnect / unsubscribe succeeded
    pub const OK: u8 = 0;

    /// Connect failed or the unsubscribed key had no subscription
    pub const FAILURE: u8 = 1;

    /// Subscribe: the key exists and the client is subscribed
    pub const KEY_EXISTS: u8 = 1;

    /// Subscribe: the key does not exist (or the client is at its cap)
    pub const KEY_MISSING: u8 = 0;
}

/// An acknowledgment for a connect or client request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Response {
    /// Opcode of the request being answered
    pub opcode: OpCode,

    /// Single result byte
    pub result: u8,
}

impl Response {
    pub fn new(opcode: OpCode, result: u8) -> Self {
        Self { opcode, result }
    }

    /// Answer a subscribe request
    pub fn subscribe(existed: bool) -> Self {
        let code = if existed { result::KEY_EXISTS } else { result::KEY_MISSING };
        Self::new(OpCode::Subscribe, code)
    }

    /// Answer an unsubscribe request
    pub fn unsubscribe(removed: bool) -> Self {
        let code = if removed { result::OK } else { result::FAILURE };
        Self::new(OpCode::Unsubscribe, code)
    }
}
