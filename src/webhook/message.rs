//! Outbound message types.
//!
//! The wire shape follows the Discord webhook embed object:
//! <https://discord.com/developers/docs/resources/channel#embed-object>.
//! Any endpoint accepting that shape works; the pipeline treats the
//! payload as opaque once built.

use serde::{Deserialize, Serialize};

/// A message POSTed to the webhook endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub embeds: Vec<Embed>,
}

impl WebhookMessage {
    /// A plain-text message with no embeds.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            embeds: Vec::new(),
        }
    }

    /// A message carrying a single embed.
    pub fn embed(embed: Embed) -> Self {
        Self {
            content: None,
            embeds: vec![embed],
        }
    }
}

/// A rich-content block within a message.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<EmbedAuthor>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
}

/// Attribution line shown above an embed.
#[derive(Debug, Clone, Serialize)]
pub struct EmbedAuthor {
    pub name: String,
}

/// A named key/value pair rendered inside an embed.
#[derive(Debug, Clone, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    /// Render compactly, side by side with neighboring inline fields.
    #[serde(skip_serializing_if = "is_false")]
    pub inline: bool,
}

impl EmbedField {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            inline: false,
        }
    }
}

fn is_false(value: &bool) -> bool {
    !value
}

/// Body of a 429 response from the endpoint.
#[derive(Debug, Deserialize)]
pub struct RateLimitResponse {
    #[serde(default)]
    pub global: bool,
    #[serde(default)]
    pub message: String,
    /// Nominally seconds per the API docs; observed values say otherwise.
    /// Interpreted according to the configured unit.
    pub retry_after: f64,
}
