use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::delivery::DeliveryError;

/// Platform user identifier, e.g. a Discord snowflake.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields pulled out of one inbound change event. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FieldSet {
    pub title: Option<String>,
    pub person_name: Option<String>,
    pub date_iso: Option<String>,
    pub category_label: Option<String>,
    pub source_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundNotification {
    pub content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub embeds: Vec<Embed>,
    pub allowed_mentions: AllowedMentions,
}

impl OutboundNotification {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            embeds: Vec::new(),
            allowed_mentions: AllowedMentions::default(),
        }
    }

    pub fn mentioned_users(&self) -> &BTreeSet<UserId> {
        &self.allowed_mentions.users
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Embed {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub color: u32,
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

/// Users the platform is allowed to ping. Always sent: an empty `parse` list
/// keeps `@everyone`, role and user mentions in the content from pinging.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AllowedMentions {
    pub parse: Vec<String>,
    pub users: BTreeSet<UserId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryTarget {
    /// Incoming-webhook post, optionally pinging a resolved user.
    Channel {
        webhook_url: String,
        mention: Option<UserId>,
    },
    DirectMessage(UserId),
}

impl DeliveryTarget {
    pub fn recipient(&self) -> Option<&UserId> {
        match self {
            DeliveryTarget::Channel { mention, .. } => mention.as_ref(),
            DeliveryTarget::DirectMessage(user_id) => Some(user_id),
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            DeliveryTarget::Channel { .. } => "channel",
            DeliveryTarget::DirectMessage(_) => "direct_message",
        }
    }
}

#[derive(Debug)]
pub enum DeliveryOutcome {
    Delivered,
    Skipped(String),
    Failed(DeliveryError),
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
