//! Typed errors for the dispatch pipeline.
//!
//! Each stage has its own error so the consumer loop can decide how to
//! acknowledge a job without looking at error text:
//! - [`DecodeError`]: the payload is malformed (skip-flag policy)
//! - [`ComposeError`]: the job cannot become a message (bury, or leave under
//!   the `Warn` content policy)
//! - [`SendError`]: the SMTP hand-off failed (bury on recipient syntax,
//!   otherwise retry)

use smtpw_queue::QueueError;
use thiserror::Error;

/// SMTP reply code for "syntax error in parameters or arguments".
pub const SMTP_SYNTAX_ERROR: u16 = 501;

/// The queue payload could not be decoded into an email job.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Empty payload")]
    Empty,

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// A decoded job could not be turned into a deliverable message.
#[derive(Debug, Error)]
pub enum ComposeError {
    /// The job's `From` does not name a configured sender.
    #[error("From does not exist: {0}")]
    UnknownSender(String),

    /// A configured sender address does not parse.
    #[error("Invalid sender address {address:?}: {reason}")]
    InvalidSender { address: String, reason: String },

    #[error("No recipients")]
    NoRecipients,

    /// A `To` or `BCC` entry does not parse as an address.
    #[error("Invalid recipient address {address:?}: {reason}")]
    InvalidRecipient { address: String, reason: String },

    #[error("HtmlEmbed: {0} is not base64")]
    EmbedNotBase64(String),

    #[error("HtmlEmbed: {0} is not used in the HTML")]
    EmbedNotReferenced(String),

    #[error("Attachment: {0} is not base64")]
    AttachmentNotBase64(String),

    #[error("Unsupported content type for {name}: {reason}")]
    ContentType { name: String, reason: String },

    #[error("Unable to build message: {0}")]
    Build(#[from] lettre::error::Error),
}

impl ComposeError {
    /// Returns `true` if inline content or an attachment is invalid; the
    /// configured content policy decides what happens to the job.
    #[must_use]
    pub const fn is_invalid_content(&self) -> bool {
        matches!(
            self,
            Self::EmbedNotBase64(_) | Self::EmbedNotReferenced(_) | Self::AttachmentNotBase64(_)
        )
    }
}

/// The SMTP hand-off failed.
#[derive(Debug, Error)]
pub enum SendError {
    /// The server answered with an error reply.
    #[error("{code} {message}")]
    Rejected { code: u16, message: String },

    /// Connection, TLS or protocol failure without a reply code.
    #[error("SMTP transport error: {0}")]
    Transport(String),

    #[error("TLS configuration error: {0}")]
    Tls(String),
}

impl SendError {
    /// Returns `true` if the server rejected a recipient's syntax (501).
    #[must_use]
    pub const fn is_recipient_syntax(&self) -> bool {
        matches!(
            self,
            Self::Rejected {
                code: SMTP_SYNTAX_ERROR,
                ..
            }
        )
    }

    /// Returns `true` if sending the same message again cannot succeed.
    ///
    /// Only a recipient syntax rejection qualifies; other 5xx replies are
    /// retried until the attempt limit.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        self.is_recipient_syntax()
    }

    /// Build an error from the text of a failure that carries no structured
    /// code. A leading three digit code followed by a space is honoured.
    #[must_use]
    pub fn from_text(text: &str) -> Self {
        let code = text
            .get(..4)
            .filter(|prefix| prefix.ends_with(' '))
            .and_then(|prefix| prefix[..3].parse::<u16>().ok())
            .filter(|code| (200..600).contains(code));

        match code {
            Some(code) => Self::Rejected {
                code,
                message: text[4..].to_string(),
            },
            None => Self::Transport(text.to_string()),
        }
    }
}

/// Convert from the lettre SMTP error.
///
/// The reply code comes from the error's status when present; the text is
/// only inspected when the error carries no status.
impl From<lettre::transport::smtp::Error> for SendError {
    fn from(error: lettre::transport::smtp::Error) -> Self {
        let code = error
            .status()
            .and_then(|status| status.to_string().parse::<u16>().ok());

        match code {
            Some(code) => Self::Rejected {
                code,
                message: error.to_string(),
            },
            None => Self::from_text(&error.to_string()),
        }
    }
}

/// The worker could not start.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Unable to connect to queue at {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: QueueError,
    },

    #[error("Unable to subscribe to tube {tube}: {source}")]
    Subscribe {
        tube: String,
        #[source]
        source: QueueError,
    },
}
