//! Client command parsing
//!
//! Commands read by the interactive client:
//! `SUBSCRIBE [key]`, `UNSUBSCRIBE [key]`, `DELAY <ms>`, `DISCONNECT`.

use crate::error::{KvsError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    Subscribe(String),
    Unsubscribe(String),
    Delay(u64),
    Disconnect,
}

impl ClientCommand {
    /// Parse one line. `Ok(None)` for blank lines and comments.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }

        let split = line
            .find(|c: char| c.is_whitespace() || c == '[')
            .unwrap_or(line.len());
        let (word, rest) = (&line[..split], line[split..].trim());

        let command = match word {
            "SUBSCRIBE" => ClientCommand::Subscribe(single_key(rest)?),
            "UNSUBSCRIBE" => ClientCommand::Unsubscribe(single_key(rest)?),
            "DELAY" => ClientCommand::Delay(
                rest.parse()
                    .map_err(|_| KvsError::Parse(format!("DELAY expects ms, got {:?}", rest)))?,
            ),
            "DISCONNECT" if rest.is_empty() => ClientCommand::Disconnect,
            _ => return Err(KvsError::Parse(format!("Invalid command {:?}", line))),
        };
        Ok(Some(command))
    }
}

fn single_key(rest: &str) -> Result<String> {
    let key = rest
        .strip_prefix('[')
        .and_then(|r| r.strip_suffix(']'))
        .map(str::trim)
        .ok_or_else(|| KvsError::Parse(format!("Expected [key], got {:?}", rest)))?;
    if key.is_empty() || key.contains(',') {
        return Err(KvsError::Parse(format!("Expected exactly one key, got {:?}", key)));
    }
    Ok(key.to_string())
}
