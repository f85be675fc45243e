//! Error types for the smtpw-queue crate.
//!
//! The consumer loop never inspects error text directly. It asks the error
//! whether it is a reserve timeout (an idle poll, not a failure) or a severed
//! transport (reconnect before the next reserve).

use std::io;

use thiserror::Error;

use crate::JobId;

/// Top-level queue error type.
#[derive(Debug, Error)]
pub enum QueueError {
    /// `reserve` waited for its full timeout without a job becoming ready.
    #[error("timed out")]
    TimedOut,

    /// A job reserved by this connection is about to exceed its TTR.
    #[error("deadline soon")]
    DeadlineSoon,

    /// I/O operation on the queue connection failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The server closed the connection.
    #[error("Connection closed unexpectedly")]
    ConnectionClosed,

    /// The job does not exist or is not reserved by this connection.
    #[error("Job not found: {0}")]
    NotFound(JobId),

    /// Ignoring the tube would leave the connection watching nothing.
    #[error("Cannot ignore {0}: it is the only watched tube")]
    NotIgnored(String),

    /// The tube name contains characters the protocol does not allow.
    #[error("Invalid tube name: {0:?}")]
    InvalidTube(String),

    /// The server reported an error (`OUT_OF_MEMORY`, `BAD_FORMAT`, ...).
    #[error("Server error: {0}")]
    Server(String),

    /// The server answered with a reply that does not fit the command.
    #[error("Unexpected reply to {command}: {reply}")]
    UnexpectedReply {
        command: &'static str,
        reply: String,
    },

    /// A reply could not be parsed.
    #[error("Failed to parse reply: {0}")]
    Parse(String),
}

impl QueueError {
    /// Returns `true` if a reserve waited out its timeout without a job and
    /// should simply be issued again.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut)
    }

    /// Returns `true` if the server refused to wait because a job this
    /// connection holds is about to exceed its TTR. The server answers every
    /// reserve this way until the job is acknowledged or released.
    #[must_use]
    pub const fn is_deadline_soon(&self) -> bool {
        matches!(self, Self::DeadlineSoon)
    }

    /// Returns `true` if the connection is unusable and must be re-established.
    ///
    /// I/O error kinds are checked first; the `broken pipe` text match only
    /// covers platforms that report the condition as an uncategorised error.
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::ConnectionClosed => true,
            Self::Io(err) => {
                matches!(
                    err.kind(),
                    io::ErrorKind::BrokenPipe
                        | io::ErrorKind::ConnectionReset
                        | io::ErrorKind::ConnectionAborted
                        | io::ErrorKind::NotConnected
                        | io::ErrorKind::UnexpectedEof
                ) || err.to_string().to_ascii_lowercase().ends_with("broken pipe")
            }
            _ => false,
        }
    }
}

/// Specialized `Result` type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeouts_are_not_disconnects() {
        assert!(QueueError::TimedOut.is_timeout());
        assert!(!QueueError::DeadlineSoon.is_timeout());
        assert!(QueueError::DeadlineSoon.is_deadline_soon());
        assert!(!QueueError::TimedOut.is_disconnect());
        assert!(!QueueError::DeadlineSoon.is_disconnect());
    }

    #[test]
    fn test_disconnect_by_kind() {
        let err = QueueError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "write failed"));
        assert!(err.is_disconnect());
        assert!(!err.is_timeout());

        let err = QueueError::Io(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        assert!(err.is_disconnect());

        assert!(QueueError::ConnectionClosed.is_disconnect());
    }

    #[test]
    fn test_disconnect_by_message_fallback() {
        let err = QueueError::Io(io::Error::other("write tcp 127.0.0.1:11300: broken pipe"));
        assert!(err.is_disconnect());

        let err = QueueError::Io(io::Error::other("permission denied"));
        assert!(!err.is_disconnect());
    }

    #[test]
    fn test_server_errors_keep_connection() {
        assert!(!QueueError::Server("OUT_OF_MEMORY".to_string()).is_disconnect());
        assert!(!QueueError::NotFound(JobId(7)).is_disconnect());
        assert_eq!(QueueError::NotFound(JobId(7)).to_string(), "Job not found: 7");
    }
}
