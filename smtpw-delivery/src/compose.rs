//! Message composition
//!
//! Resolves a job's sender against the tenant registry and assembles the MIME
//! structure handed to the transport:
//!
//! ```text
//! multipart/mixed                  (only with attachments)
//! ├── multipart/alternative
//! │   ├── text/plain
//! │   └── multipart/related        (only with inline content)
//! │       ├── text/html
//! │       └── inline parts, Content-ID <name>
//! └── attachments
//! ```

use std::sync::Arc;

use base64::{Engine, engine::general_purpose::STANDARD};
use lettre::{
    Address, Message,
    message::{
        Attachment, Mailbox, MultiPart, SinglePart,
        header::{ContentType, Header, HeaderName, HeaderValue},
    },
};
use rand::{Rng, distr::Alphanumeric};
use smtpw_common::{TenantConfig, TenantRegistry, internal};

use crate::{error::ComposeError, job::EmailJob};

/// Length of the random part of a Message-ID.
const MESSAGE_ID_TOKEN_LEN: usize = 32;

/// `X-Mailer` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XMailer(String);

impl Default for XMailer {
    fn default() -> Self {
        Self("smtpw".to_string())
    }
}

impl Header for XMailer {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("X-Mailer")
    }

    fn parse(s: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Self(s.to_string()))
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), self.0.clone())
    }
}

/// `X-Priority` header; 3 is normal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XPriority(u8);

impl Default for XPriority {
    fn default() -> Self {
        Self(3)
    }
}

impl Header for XPriority {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("X-Priority")
    }

    fn parse(s: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Self(s.trim().parse()?))
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), self.0.to_string())
    }
}

/// A decoded binary part: inline content or an attachment.
#[derive(Debug, Clone, PartialEq)]
pub struct Part {
    pub name: String,
    pub content_type: ContentType,
    pub data: Vec<u8>,
}

/// A message ready for the transport.
///
/// The header fields are kept alongside the built [`Message`] so callers can
/// log or inspect them without re-parsing the formatted output.
#[derive(Debug, Clone)]
pub struct ComposedMessage {
    pub message_id: String,
    pub from: Mailbox,
    pub reply_to: Option<Mailbox>,
    pub to: Vec<Mailbox>,
    pub bcc: Vec<Mailbox>,
    pub subject: String,
    pub text: String,
    pub html: Option<String>,
    pub embeds: Vec<Part>,
    pub attachments: Vec<Part>,
    message: Message,
}

impl ComposedMessage {
    /// The lettre message, envelope included.
    #[must_use]
    pub const fn message(&self) -> &Message {
        &self.message
    }

    /// The message as sent on the wire (Bcc stripped).
    #[must_use]
    pub fn formatted(&self) -> Vec<u8> {
        self.message.formatted()
    }
}

/// A composed message together with the tenant it is sent as.
#[derive(Debug)]
pub struct Composed<'a> {
    pub tenant: &'a TenantConfig,
    pub message: ComposedMessage,
}

/// Builds messages for every configured sender
#[derive(Debug, Clone)]
pub struct Composer {
    registry: Arc<TenantRegistry>,
    hostname: String,
}

impl Composer {
    /// `hostname` is used in Message-IDs for tenants without an override.
    pub fn new(registry: Arc<TenantRegistry>, hostname: impl Into<String>) -> Self {
        Self {
            registry,
            hostname: hostname.into(),
        }
    }

    /// Resolve the job's sender and build its message.
    ///
    /// # Errors
    ///
    /// Returns [`ComposeError`] if the sender is unknown, an address does not
    /// parse, inline content or an attachment is invalid, or the message
    /// cannot be assembled.
    pub fn compose(&self, job: &EmailJob) -> Result<Composed<'_>, ComposeError> {
        let tenant = self
            .registry
            .get(&job.from)
            .ok_or_else(|| ComposeError::UnknownSender(job.from.clone()))?;

        let hostname = tenant.hostname_override().unwrap_or(&self.hostname);
        let message_id = format!("<{}@{hostname}>", random_token());

        let (from, reply_to) = match tenant.bounce_address() {
            None => (sender(&tenant.display, &tenant.from)?, None),
            Some(bounce) => (
                sender(&tenant.display, bounce)?,
                Some(sender(&tenant.display, &tenant.from)?),
            ),
        };

        if job.to.is_empty() {
            return Err(ComposeError::NoRecipients);
        }
        let to = job
            .to
            .iter()
            .map(|address| recipient(address))
            .collect::<Result<Vec<_>, _>>()?;

        let mut bcc = tenant
            .bcc
            .iter()
            .map(|address| recipient(address))
            .collect::<Result<Vec<_>, _>>()?;
        if tenant.allow_bcc {
            for address in &job.bcc {
                bcc.push(recipient(address)?);
            }
        } else if !job.bcc.is_empty() {
            internal!(
                level = WARN,
                "Ignoring {} BCC recipient(s): sender {} does not allow them",
                job.bcc.len(),
                job.from
            );
        }

        let html = (!job.html.is_empty()).then(|| job.html.clone());

        let mut embeds = Vec::with_capacity(job.html_embed.len());
        for (name, encoded) in &job.html_embed {
            let data =
                decode_base64(encoded).ok_or_else(|| ComposeError::EmbedNotBase64(name.clone()))?;
            if !job.html.contains(&format!("cid:{name}")) {
                return Err(ComposeError::EmbedNotReferenced(name.clone()));
            }
            embeds.push(Part {
                name: name.clone(),
                content_type: content_type(name)?,
                data,
            });
        }

        let mut attachments = Vec::with_capacity(job.attachments.len());
        for (name, encoded) in &job.attachments {
            let data = decode_base64(encoded)
                .ok_or_else(|| ComposeError::AttachmentNotBase64(name.clone()))?;
            attachments.push(Part {
                name: name.clone(),
                content_type: content_type(name)?,
                data,
            });
        }

        let mut builder = Message::builder()
            .message_id(Some(message_id.clone()))
            .header(XMailer::default())
            .header(XPriority::default())
            .from(from.clone())
            .subject(job.subject.clone());
        if let Some(reply_to) = &reply_to {
            builder = builder.reply_to(reply_to.clone());
        }
        for mailbox in &to {
            builder = builder.to(mailbox.clone());
        }
        for mailbox in &bcc {
            builder = builder.bcc(mailbox.clone());
        }

        let message = builder.multipart(body(
            &job.text,
            html.as_deref(),
            &embeds,
            &attachments,
        ))?;

        Ok(Composed {
            tenant,
            message: ComposedMessage {
                message_id,
                from,
                reply_to,
                to,
                bcc,
                subject: job.subject.clone(),
                text: job.text.clone(),
                html,
                embeds,
                attachments,
                message,
            },
        })
    }
}

fn body(text: &str, html: Option<&str>, embeds: &[Part], attachments: &[Part]) -> MultiPart {
    let plain = SinglePart::plain(text.to_string());

    let alternative = match html {
        None => MultiPart::alternative().singlepart(plain),
        Some(html) if embeds.is_empty() => MultiPart::alternative()
            .singlepart(plain)
            .singlepart(SinglePart::html(html.to_string())),
        Some(html) => {
            let related = embeds.iter().fold(
                MultiPart::related().singlepart(SinglePart::html(html.to_string())),
                |related, part| {
                    related.singlepart(
                        Attachment::new_inline(part.name.clone())
                            .body(part.data.clone(), part.content_type.clone()),
                    )
                },
            );
            MultiPart::alternative().singlepart(plain).multipart(related)
        }
    };

    if attachments.is_empty() {
        return alternative;
    }

    attachments
        .iter()
        .fold(MultiPart::mixed().multipart(alternative), |mixed, part| {
            mixed.singlepart(
                Attachment::new(part.name.clone())
                    .body(part.data.clone(), part.content_type.clone()),
            )
        })
}

fn sender(display: &str, address: &str) -> Result<Mailbox, ComposeError> {
    let parsed = address
        .parse::<Address>()
        .map_err(|e| ComposeError::InvalidSender {
            address: address.to_string(),
            reason: e.to_string(),
        })?;

    let name = (!display.is_empty()).then(|| display.to_string());
    Ok(Mailbox::new(name, parsed))
}

fn recipient(address: &str) -> Result<Mailbox, ComposeError> {
    address
        .trim()
        .parse::<Mailbox>()
        .map_err(|e| ComposeError::InvalidRecipient {
            address: address.to_string(),
            reason: e.to_string(),
        })
}

/// Line breaks inside the encoded text are tolerated.
fn decode_base64(encoded: &str) -> Option<Vec<u8>> {
    let compact: String = encoded.chars().filter(|c| *c != '\r' && *c != '\n').collect();
    STANDARD.decode(compact).ok()
}

fn random_token() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(MESSAGE_ID_TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// Content type from the part's file extension, octet-stream when unknown.
fn content_type(name: &str) -> Result<ContentType, ComposeError> {
    let guessed = mime_guess::from_path(name).first_or_octet_stream();

    ContentType::parse(guessed.essence_str()).map_err(|e| ComposeError::ContentType {
        name: name.to_string(),
        reason: e.to_string(),
    })
}
