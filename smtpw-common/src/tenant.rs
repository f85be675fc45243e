//! Per-sender delivery configuration
//!
//! Every job names a sender identity (e.g. `"noreply"`). The identity selects
//! the SMTP account the mail is relayed through and the addresses that end up
//! in the headers:
//! - SMTP credentials and endpoint
//! - Display name and origin address
//! - Optional bounce address (From) with the origin moved to Reply-To
//! - BCC recipients added to every message
//!
//! Field aliases accept the legacy `config.json` spelling (`User`, `Pass`, ...).

use std::{collections::HashMap, fmt};

use lettre::{Address, message::Mailbox};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

const fn default_port() -> u16 {
    587
}

/// Delivery configuration for a single sender identity
#[derive(Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct TenantConfig {
    /// SMTP AUTH user; authentication is skipped when empty
    #[serde(default, alias = "User")]
    pub user: String,

    #[serde(default, alias = "Pass")]
    pub pass: String,

    /// SMTP relay host
    #[serde(default, alias = "Host")]
    pub host: String,

    /// SMTP relay port; 465 means implicit TLS, anything else STARTTLS
    #[serde(default = "default_port", alias = "Port")]
    pub port: u16,

    /// Origin address; receives human replies
    #[serde(default, alias = "From")]
    pub from: String,

    /// Display name used for both From and Reply-To
    #[serde(default, alias = "Display")]
    pub display: String,

    /// Recipients blind-copied on every message from this sender
    #[serde(default, alias = "Bcc")]
    pub bcc: Vec<String>,

    /// Bounce address; when set it becomes the From address and `from` moves
    /// to Reply-To
    #[serde(default, alias = "Bounce", skip_serializing_if = "Option::is_none")]
    pub bounce: Option<String>,

    /// Hostname used in the Message-ID instead of the machine's own name
    #[serde(default, alias = "Hostname", skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    /// Skip TLS certificate verification for this relay
    #[serde(default, alias = "Insecure")]
    pub insecure: bool,

    /// Honour the `BCC` list carried by the job itself
    #[serde(default, alias = "AllowBCC")]
    pub allow_bcc: bool,
}

impl TenantConfig {
    /// Hostname override, ignoring an empty string
    #[must_use]
    pub fn hostname_override(&self) -> Option<&str> {
        self.hostname.as_deref().filter(|host| !host.is_empty())
    }

    /// Bounce address, ignoring an empty string
    #[must_use]
    pub fn bounce_address(&self) -> Option<&str> {
        self.bounce.as_deref().filter(|bounce| !bounce.is_empty())
    }

    /// Whether the relay expects implicit TLS rather than STARTTLS
    #[must_use]
    pub const fn implicit_tls(&self) -> bool {
        self.port == 465
    }

    /// Whether SMTP AUTH should be attempted
    #[must_use]
    pub const fn authenticates(&self) -> bool {
        !self.user.is_empty()
    }

    fn validate(&self, sender: &str) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::MissingField {
                sender: sender.to_string(),
                field: "host",
            });
        }

        if self.from.is_empty() {
            return Err(ConfigError::MissingField {
                sender: sender.to_string(),
                field: "from",
            });
        }
        check_address(sender, "from", &self.from)?;

        if let Some(bounce) = self.bounce_address() {
            check_address(sender, "bounce", bounce)?;
            if bounce.eq_ignore_ascii_case(&self.from) {
                return Err(ConfigError::BounceIsOrigin(sender.to_string()));
            }
        }

        for bcc in &self.bcc {
            check_mailbox(sender, "bcc", bcc)?;
        }

        Ok(())
    }
}

impl fmt::Debug for TenantConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantConfig")
            .field("user", &self.user)
            .field("pass", &if self.pass.is_empty() { "" } else { "***" })
            .field("host", &self.host)
            .field("port", &self.port)
            .field("from", &self.from)
            .field("display", &self.display)
            .field("bcc", &self.bcc)
            .field("bounce", &self.bounce)
            .field("hostname", &self.hostname)
            .field("insecure", &self.insecure)
            .field("allow_bcc", &self.allow_bcc)
            .finish()
    }
}

/// `from` and `bounce` go into headers as bare addresses next to the
/// display name, so a `Name <addr>` form is rejected here.
fn check_address(sender: &str, field: &'static str, value: &str) -> Result<(), ConfigError> {
    value
        .parse::<Address>()
        .map(drop)
        .map_err(|_| invalid(sender, field, value))
}

fn check_mailbox(sender: &str, field: &'static str, value: &str) -> Result<(), ConfigError> {
    value
        .trim()
        .parse::<Mailbox>()
        .map(drop)
        .map_err(|_| invalid(sender, field, value))
}

fn invalid(sender: &str, field: &'static str, value: &str) -> ConfigError {
    ConfigError::InvalidAddress {
        sender: sender.to_string(),
        field,
        value: value.to_string(),
    }
}

/// Registry of sender identities, built once at startup and read-only after
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct TenantRegistry {
    tenants: HashMap<String, TenantConfig>,
}

impl TenantRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tenants: HashMap::new(),
        }
    }

    /// Look up the configuration for a sender identity
    #[must_use]
    pub fn get(&self, sender: &str) -> Option<&TenantConfig> {
        self.tenants.get(sender)
    }

    /// Add or replace a sender identity
    pub fn insert(&mut self, sender: impl Into<String>, config: TenantConfig) {
        self.tenants.insert(sender.into(), config);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tenants.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }

    /// Sender identities in a stable order
    #[must_use]
    pub fn senders(&self) -> Vec<&str> {
        let mut senders = self.tenants.keys().map(String::as_str).collect::<Vec<_>>();
        senders.sort_unstable();
        senders
    }

    /// Check every sender identity, reporting the first problem found
    ///
    /// # Errors
    ///
    /// Returns an error if the registry is empty, a sender lacks a relay
    /// host or origin address, or any configured address does not parse.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.is_empty() {
            return Err(ConfigError::Empty);
        }

        for sender in self.senders() {
            if let Some(config) = self.get(sender) {
                config.validate(sender)?;
            }
        }

        Ok(())
    }
}
