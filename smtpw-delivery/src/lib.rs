//! Job decoding, composition and delivery for the dispatch worker
//!
//! This crate provides the pipeline a reserved job runs through:
//! - Decode the queue payload into an [`EmailJob`]
//! - Resolve the sender and compose a MIME message ([`Composer`])
//! - Hand the message to SMTP ([`Mailer`], [`SmtpMailer`])
//! - Classify the outcome and acknowledge the job ([`Worker`])

mod classify;
mod compose;
mod error;
mod job;
mod processor;
mod transport;

pub use classify::Disposition;
pub use compose::{Composed, ComposedMessage, Composer, Part, XMailer, XPriority};
pub use error::{ComposeError, DecodeError, SMTP_SYNTAX_ERROR, SendError, WorkerError};
pub use job::EmailJob;
pub use processor::{InvalidContentPolicy, Outcome, Worker, WorkerBuilder, WorkerConfig};
pub use transport::{Mailer, SmtpMailer};
