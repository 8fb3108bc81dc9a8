//! Protocol codec
//!
//! Encoding and decoding functions for the fixed-width wire protocol.
//! Layouts are described in the module docs of [`crate::protocol`].

use std::io::{Read, Write};

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{KvsError, Result};
use super::{
    ConnectRequest, OpCode, Request, Response, CONNECT_MESSAGE_SIZE, KEY_MESSAGE_SIZE,
    PIPE_PATH_SIZE,
};

// =============================================================================
// Field helpers
// =============================================================================

/// Append `value` NUL padded to exactly `width` bytes
fn put_field(buf: &mut BytesMut, value: &str, width: usize) -> Result<()> {
    let bytes = value.as_bytes();
    if bytes.len() > width {
        return Err(KvsError::Protocol(format!(
            "Field too long: {} bytes (max {})",
            bytes.len(),
            width
        )));
    }
    buf.put_slice(bytes);
    buf.put_bytes(0, width - bytes.len());
    Ok(())
}

/// Decode a NUL padded field, stopping at the first NUL
pub fn decode_field(bytes: &[u8]) -> Result<String> {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8(bytes[..end].to_vec())
        .map_err(|e| KvsError::Protocol(format!("Field is not valid UTF-8: {}", e)))
}

fn read_field<R: Read>(reader: &mut R, width: usize) -> Result<String> {
    let mut buf = vec![0u8; width];
    reader.read_exact(&mut buf)?;
    decode_field(&buf)
}

fn read_byte<R: Read>(reader: &mut R) -> Result<u8> {
    let mut byte = [0u8; 1];
    reader.read_exact(&mut byte)?;
    Ok(byte[0])
}

// =============================================================================
// Connect
// =============================================================================

/// Encode a connect message
pub fn encode_connect(request: &ConnectRequest) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(CONNECT_MESSAGE_SIZE);
    buf.put_u8(OpCode::Connect as u8);
    put_field(&mut buf, &request.request_path, PIPE_PATH_SIZE)?;
    put_field(&mut buf, &request.response_path, PIPE_PATH_SIZE)?;
    put_field(&mut buf, &request.notification_path, PIPE_PATH_SIZE)?;
    Ok(buf.freeze())
}

/// Read one connect message from the registration channel
///
/// Any opcode other than CONNECT, or an empty path, is a protocol error.
pub fn read_connect<R: Read>(reader: &mut R) -> Result<ConnectRequest> {
    let mut message = [0u8; CONNECT_MESSAGE_SIZE];
    reader.read_exact(&mut message)?;

    if message[0] != OpCode::Connect as u8 {
        return Err(KvsError::Protocol(format!(
            "Expected CONNECT on registration channel, got 0x{:02x}",
            message[0]
        )));
    }

    let field = |i: usize| decode_field(&message[1 + i * PIPE_PATH_SIZE..1 + (i + 1) * PIPE_PATH_SIZE]);
    let request = ConnectRequest {
        request_path: field(0)?,
        response_path: field(1)?,
        notification_path: field(2)?,
    };

    if request.request_path.is_empty()
        || request.response_path.is_empty()
        || request.notification_path.is_empty()
    {
        return Err(KvsError::Protocol("Connect message with empty channel path".into()));
    }

    Ok(request)
}

// =============================================================================
// Requests
// =============================================================================

/// Encode a request
pub fn encode_request(request: &Request) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(1 + KEY_MESSAGE_SIZE);
    buf.put_u8(request.opcode() as u8);
    match request {
        Request::Disconnect => {}
        Request::Subscribe { key } | Request::Unsubscribe { key } => {
            put_field(&mut buf, key, KEY_MESSAGE_SIZE)?;
        }
    }
    Ok(buf.freeze())
}

/// Read a complete request from a stream
///
/// Blocks until a complete request is received or the channel closes.
pub fn read_request<R: Read>(reader: &mut R) -> Result<Request> {
    match OpCode::try_from(read_byte(reader)?)? {
        OpCode::Disconnect => Ok(Request::Disconnect),
        OpCode::Subscribe => Ok(Request::Subscribe {
            key: read_field(reader, KEY_MESSAGE_SIZE)?,
        }),
        OpCode::Unsubscribe => Ok(Request::Unsubscribe {
            key: read_field(reader, KEY_MESSAGE_SIZE)?,
        }),
        OpCode::Connect => Err(KvsError::Protocol(
            "CONNECT is only valid on the registration channel".into(),
        )),
    }
}

/// Write a request to a stream
pub fn write_request<W: Write>(writer: &mut W, request: &Request) -> Result<()> {
    let bytes = encode_request(request)?;
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}

// =============================================================================
// Responses
// =============================================================================

/// Encode a response: opcode (1) + result (1)
pub fn encode_response(response: &Response) -> [u8; 2] {
    [response.opcode as u8, response.result]
}

/// Read a response from a stream
pub fn read_response<R: Read>(reader: &mut R) -> Result<Response> {
    let opcode = OpCode::try_from(read_byte(reader)?)?;
    let result = read_byte(reader)?;
    Ok(Response { opcode, result })
}

/// Write a response to a stream
pub fn write_response<W: Write>(writer: &mut W, response: &Response) -> Result<()> {
    writer.write_all(&encode_response(response))?;
    writer.flush()?;
    Ok(())
}

// =============================================================================
// Notifications
// =============================================================================

/// Encode a notification: key (41) + value (41)
pub fn encode_notification(key: &str, value: &str) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(2 * KEY_MESSAGE_SIZE);
    put_field(&mut buf, key, KEY_MESSAGE_SIZE)?;
    put_field(&mut buf, value, KEY_MESSAGE_SIZE)?;
    Ok(buf.freeze())
}

/// Read one (key, value) notification
pub fn read_notification<R: Read>(reader: &mut R) -> Result<(String, String)> {
    let mut frame = [0u8; 2 * KEY_MESSAGE_SIZE];
    reader.read_exact(&mut frame)?;
    let key = decode_field(&frame[..KEY_MESSAGE_SIZE])?;
    let value = decode_field(&frame[KEY_MESSAGE_SIZE..])?;
    Ok((key, value))
}
