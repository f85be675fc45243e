//! Delivery outcome classification

use crate::{
    error::{ComposeError, SendError},
    processor::InvalidContentPolicy,
};

/// What a delivery attempt means for the job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The relay accepted the message; delete the job.
    Success,
    /// Retrying cannot help; bury the job.
    Permanent,
    /// Might work later; release the job for another attempt.
    Transient,
    /// Log and leave the job reserved; it returns to ready when its TTR
    /// expires.
    Ignore,
}

impl Disposition {
    /// Classify the result of handing a message to the transport.
    #[must_use]
    pub const fn of_send(result: &Result<(), SendError>) -> Self {
        match result {
            Ok(()) => Self::Success,
            Err(error) if error.is_permanent() => Self::Permanent,
            Err(_) => Self::Transient,
        }
    }

    /// Classify a job that could not be composed.
    #[must_use]
    pub const fn of_compose(error: &ComposeError, policy: InvalidContentPolicy) -> Self {
        match policy {
            InvalidContentPolicy::Warn if error.is_invalid_content() => Self::Ignore,
            _ => Self::Permanent,
        }
    }
}
