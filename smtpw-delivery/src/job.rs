//! Queue payload codec
//!
//! Producers publish a JSON object per email. Field names are PascalCase
//! (`From`, `To`, `BCC`, `HtmlEmbed`, ...); lower-case spellings are accepted
//! as well, and `null` is read as an empty value.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::DecodeError;

/// Read `null` as the type's empty value.
fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// A single email request as published on the queue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailJob {
    /// Sender identity, resolved against the tenant registry
    #[serde(rename = "From", alias = "from", default, deserialize_with = "nullable")]
    pub from: String,

    #[serde(rename = "To", alias = "to", default, deserialize_with = "nullable")]
    pub to: Vec<String>,

    /// Extra blind copies, honoured only for tenants that allow it
    #[serde(rename = "BCC", alias = "bcc", alias = "Bcc", default, deserialize_with = "nullable")]
    pub bcc: Vec<String>,

    #[serde(rename = "Subject", alias = "subject", default, deserialize_with = "nullable")]
    pub subject: String,

    #[serde(rename = "Html", alias = "html", default, deserialize_with = "nullable")]
    pub html: String,

    #[serde(rename = "Text", alias = "text", default, deserialize_with = "nullable")]
    pub text: String,

    /// Inline content: name -> base64 bytes, referenced as `cid:<name>` in `html`
    #[serde(
        rename = "HtmlEmbed",
        alias = "html_embed",
        default,
        deserialize_with = "nullable"
    )]
    pub html_embed: BTreeMap<String, String>,

    /// Attachments: file name -> base64 bytes
    #[serde(
        rename = "Attachments",
        alias = "attachments",
        default,
        deserialize_with = "nullable"
    )]
    pub attachments: BTreeMap<String, String>,
}

impl EmailJob {
    /// Decode a raw queue payload.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if the payload is empty or is not a JSON object
    /// of the expected shape.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        if payload.iter().all(u8::is_ascii_whitespace) {
            return Err(DecodeError::Empty);
        }

        Ok(serde_json::from_slice(payload)?)
    }

    /// Encode into the queue wire format.
    ///
    /// # Errors
    ///
    /// Only fails if serialization itself fails, which cannot happen for
    /// string keyed maps.
    pub fn encode(&self) -> Result<Vec<u8>, DecodeError> {
        Ok(serde_json::to_vec(self)?)
    }
}
