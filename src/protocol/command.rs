//! Request definitions
//!
//! Represents messages sent by clients.

use crate::error::{KvsError, Result};

/// Message opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Connect = 0x01,
    Disconnect = 0x02,
    Subscribe = 0x03,
    Unsubscribe = 0x04,
}

impl TryFrom<u8> for OpCode {
    type Error = KvsError;

    fn try_from(byte: u8) -> Result<Self> {
        match byte {
            0x01 => Ok(OpCode::Connect),
            0x02 => Ok(OpCode::Disconnect),
            0x03 => Ok(OpCode::Subscribe),
            0x04 => Ok(OpCode::Unsubscribe),
            _ => Err(KvsError::Protocol(format!("Unknown opcode: 0x{:02x}", byte))),
        }
    }
}

/// Connect handshake carrying the client's three channel paths
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub request_path: String,
    pub response_path: String,
    pub notification_path: String,
}

/// A request read from a client's request channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// End the session
    Disconnect,

    /// Subscribe to changes of an existing key
    Subscribe { key: String },

    /// Drop a subscription
    Unsubscribe { key: String },
}

impl Request {
    /// Get the opcode of the request
    pub fn opcode(&self) -> OpCode {
        match self {
            Request::Disconnect => OpCode::Disconnect,
            Request::Subscribe { .. } => OpCode::Subscribe,
            Request::Unsubscribe { .. } => OpCode::Unsubscribe,
        }
    }
}
