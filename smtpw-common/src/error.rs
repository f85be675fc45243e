//! Error types for the smtpw-common crate.

use thiserror::Error;

/// Errors raised while validating the static configuration at startup.
///
/// Every variant is fatal: the worker refuses to start with a configuration
/// it could not deliver with.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required field is missing or empty.
    #[error("Sender {sender}: missing required field {field}")]
    MissingField { sender: String, field: &'static str },

    /// An address field does not parse as a single mailbox.
    #[error("Sender {sender}: invalid address in {field}: {value:?}")]
    InvalidAddress {
        sender: String,
        field: &'static str,
        value: String,
    },

    /// The bounce address equals the origin address, which would send
    /// bounces and replies to the same mailbox.
    #[error("Sender {0}: bounce address must differ from the origin address")]
    BounceIsOrigin(String),

    /// No sender identities are configured at all.
    #[error("No sender identities configured")]
    Empty,
}
