//! Job script parser
//!
//! One command per line:
//!
//! ```text
//! WRITE [(key,value)(key2,value2)]
//! READ [key,key2]
//! DELETE [key,key2]
//! SHOW
//! WAIT <delay_ms>
//! BACKUP
//! HELP
//! ```
//!
//! Blank lines and lines starting with `#` are skipped.

use crate::error::{KvsError, Result};

/// A parsed job command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobCommand {
    Write(Vec<(String, String)>),
    Read(Vec<String>),
    Delete(Vec<String>),
    Show,
    Wait(u64),
    Backup,
    Help,
}

/// Usage printed by HELP
pub const HELP_TEXT: &str = "Available commands:\n  \
    WRITE [(key,value)(key2,value2),...]\n  \
    READ [key,key2,...]\n  \
    DELETE [key,key2,...]\n  \
    SHOW\n  \
    WAIT <delay_ms>\n  \
    BACKUP\n  \
    HELP\n";

fn invalid(msg: impl Into<String>) -> KvsError {
    KvsError::Parse(msg.into())
}

/// Parse one line. `Ok(None)` for blank lines and comments.
pub fn parse_line(line: &str) -> Result<Option<JobCommand>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let split = line
        .find(|c: char| c.is_whitespace() || c == '[')
        .unwrap_or(line.len());
    let (word, rest) = (&line[..split], line[split..].trim());

    let command = match word {
        "WRITE" => JobCommand::Write(parse_pairs(rest)?),
        "READ" => JobCommand::Read(parse_keys(rest)?),
        "DELETE" => JobCommand::Delete(parse_keys(rest)?),
        "SHOW" => no_args(rest, JobCommand::Show)?,
        "BACKUP" => no_args(rest, JobCommand::Backup)?,
        "HELP" => no_args(rest, JobCommand::Help)?,
        "WAIT" => JobCommand::Wait(
            rest.parse()
                .map_err(|_| invalid(format!("WAIT expects a delay in ms, got {:?}", rest)))?,
        ),
        other => return Err(invalid(format!("Unknown command {:?}", other))),
    };

    Ok(Some(command))
}

fn no_args(rest: &str, command: JobCommand) -> Result<JobCommand> {
    if rest.is_empty() {
        Ok(command)
    } else {
        Err(invalid(format!("Unexpected arguments {:?}", rest)))
    }
}

/// Strip the surrounding `[` `]`
fn bracketed(rest: &str) -> Result<&str> {
    rest.strip_prefix('[')
        .and_then(|r| r.strip_suffix(']'))
        .map(str::trim)
        .ok_or_else(|| invalid(format!("Expected a [...] list, got {:?}", rest)))
}

fn parse_keys(rest: &str) -> Result<Vec<String>> {
    let inner = bracketed(rest)?;
    if inner.is_empty() {
        return Err(invalid("Empty key list"));
    }

    inner
        .split(',')
        .map(|key| {
            let key = key.trim();
            if key.is_empty() {
                Err(invalid("Empty key in list"))
            } else {
                Ok(key.to_string())
            }
        })
        .collect()
}

fn parse_pairs(rest: &str) -> Result<Vec<(String, String)>> {
    let mut inner = bracketed(rest)?;
    let mut pairs = Vec::new();

    loop {
        inner = inner.trim_start_matches(|c: char| c.is_whitespace() || c == ',');
        if inner.is_empty() {
            break;
        }

        let body = inner
            .strip_prefix('(')
            .ok_or_else(|| invalid(format!("Expected '(' at {:?}", inner)))?;
        let close = body
            .find(')')
            .ok_or_else(|| invalid("Unterminated pair"))?;
        let (key, value) = body[..close]
            .split_once(',')
            .ok_or_else(|| invalid(format!("Pair without value: {:?}", &body[..close])))?;

        let (key, value) = (key.trim(), value.trim());
        if key.is_empty() || value.is_empty() {
            return Err(invalid("Empty key or value in pair"));
        }
        pairs.push((key.to_string(), value.to_string()));
        inner = &body[close + 1..];
    }

    if pairs.is_empty() {
        return Err(invalid("Empty pair list"));
    }
    Ok(pairs)
}
