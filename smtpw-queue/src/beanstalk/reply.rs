//! beanstalkd reply parsing.

use std::str::{FromStr, SplitAsciiWhitespace};

use crate::{Job, JobId, QueueError, Result};

/// Longest reply line accepted before giving up on finding its CRLF.
const MAX_LINE: usize = 1024;

/// A single reply from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Using(String),
    Watching(usize),
    NotIgnored,
    Inserted(JobId),
    /// `BURIED` after bury/release, `BURIED <id>` after put.
    Buried(Option<JobId>),
    Reserved(Job),
    /// `OK <bytes>` followed by a YAML body (stats commands).
    Ok(Vec<u8>),
    Deleted,
    Released,
    Kicked(u32),
    TimedOut,
    DeadlineSoon,
    NotFound,
    /// One of the server's error replies (`OUT_OF_MEMORY`, `BAD_FORMAT`, ...).
    Error(String),
}

impl Reply {
    /// Parses a complete reply from the start of a buffer.
    ///
    /// Returns the reply and the number of bytes consumed, or `None` if the
    /// buffer does not yet hold the whole reply (including any job body).
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Parse` if the reply is malformed.
    pub fn parse(buffer: &[u8]) -> Result<Option<(Self, usize)>> {
        let Some(end) = buffer.windows(2).position(|w| w == b"\r\n") else {
            if buffer.len() > MAX_LINE {
                return Err(QueueError::Parse("Reply line too long".to_string()));
            }
            return Ok(None);
        };

        let line = std::str::from_utf8(&buffer[..end])
            .map_err(|e| QueueError::Parse(format!("Reply is not UTF-8: {e}")))?;
        let header_len = end + 2;

        let mut words = line.split_ascii_whitespace();
        let word = words
            .next()
            .ok_or_else(|| QueueError::Parse("Empty reply line".to_string()))?;

        let reply = match word {
            "USING" => Self::Using(field::<String>(&mut words, line)?),
            "WATCHING" => Self::Watching(field(&mut words, line)?),
            "NOT_IGNORED" => Self::NotIgnored,
            "INSERTED" => Self::Inserted(JobId(field(&mut words, line)?)),
            "BURIED" => Self::Buried(match words.next() {
                Some(id) => Some(JobId(parse_number(id, line)?)),
                None => None,
            }),
            "RESERVED" => {
                let id: u64 = field(&mut words, line)?;
                let len: usize = field(&mut words, line)?;
                return Ok(body(buffer, header_len, len)?
                    .map(|(data, consumed)| (Self::Reserved(Job::new(id, data)), consumed)));
            }
            "OK" => {
                let len: usize = field(&mut words, line)?;
                return Ok(body(buffer, header_len, len)?
                    .map(|(data, consumed)| (Self::Ok(data), consumed)));
            }
            "DELETED" => Self::Deleted,
            "RELEASED" => Self::Released,
            "KICKED" => Self::Kicked(field(&mut words, line)?),
            "TIMED_OUT" => Self::TimedOut,
            "DEADLINE_SOON" => Self::DeadlineSoon,
            "NOT_FOUND" => Self::NotFound,
            "OUT_OF_MEMORY" | "INTERNAL_ERROR" | "BAD_FORMAT" | "UNKNOWN_COMMAND"
            | "EXPECTED_CRLF" | "JOB_TOO_BIG" | "DRAINING" => Self::Error(word.to_string()),
            _ => return Err(QueueError::Parse(format!("Unknown reply: '{line}'"))),
        };

        Ok(Some((reply, header_len)))
    }
}

/// Extracts a `<bytes>`-long body that follows the reply line.
fn body(buffer: &[u8], start: usize, len: usize) -> Result<Option<(Vec<u8>, usize)>> {
    let end = start + len;
    if buffer.len() < end + 2 {
        return Ok(None);
    }

    if &buffer[end..end + 2] != b"\r\n" {
        return Err(QueueError::Parse(
            "Body is not terminated by CRLF".to_string(),
        ));
    }

    Ok(Some((buffer[start..end].to_vec(), end + 2)))
}

fn field<T: FromStr>(words: &mut SplitAsciiWhitespace<'_>, line: &str) -> Result<T> {
    let word = words
        .next()
        .ok_or_else(|| QueueError::Parse(format!("Missing argument in '{line}'")))?;
    parse_number(word, line)
}

fn parse_number<T: FromStr>(word: &str, line: &str) -> Result<T> {
    word.parse()
        .map_err(|_| QueueError::Parse(format!("Invalid argument '{word}' in '{line}'")))
}
