//! Closed field allow-lists for every object kind found in a capture document.
//!
//! Absent fields are never an error here; only fields outside the allow-list are.

use serde_json::{Map, Value};
use std::fmt;

use crate::error::{LoadError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    ServerInfo,
    ChannelInfo,
    Author,
    Message,
    Attachment,
    Embed,
    Reaction,
    ReactionUser,
}

const SERVER_INFO_FIELDS: &[&str] = &[
    "id",
    "name",
    "member_count",
    "created_at",
    "fetch_timestamp",
    "days_back",
    "max_messages_per_channel",
];
const CHANNEL_INFO_FIELDS: &[&str] = &[
    "id",
    "name",
    "type",
    "category",
    "position",
    "topic",
    "created_at",
];
const AUTHOR_FIELDS: &[&str] = &["id", "username", "display_name", "bot", "system"];
const MESSAGE_FIELDS: &[&str] = &[
    "id",
    "author",
    "content",
    "timestamp",
    "edited_timestamp",
    "attachments",
    "embeds",
    "reactions",
    "mentions",
    "role_mentions",
    "pinned",
    "mention_everyone",
    "message_type",
    "flags",
];
const ATTACHMENT_FIELDS: &[&str] = &["id", "filename", "url", "size", "content_type"];
const EMBED_FIELDS: &[&str] = &["title", "description", "url", "color", "timestamp"];
const REACTION_FIELDS: &[&str] = &["emoji", "count", "users"];
const REACTION_USER_FIELDS: &[&str] = &["id", "username", "bot"];

impl ObjectKind {
    pub fn name(self) -> &'static str {
        match self {
            ObjectKind::ServerInfo => "server_info",
            ObjectKind::ChannelInfo => "channel_info",
            ObjectKind::Author => "author",
            ObjectKind::Message => "message",
            ObjectKind::Attachment => "attachment",
            ObjectKind::Embed => "embed",
            ObjectKind::Reaction => "reaction",
            ObjectKind::ReactionUser => "reaction_user",
        }
    }

    pub fn allowed_fields(self) -> &'static [&'static str] {
        match self {
            ObjectKind::ServerInfo => SERVER_INFO_FIELDS,
            ObjectKind::ChannelInfo => CHANNEL_INFO_FIELDS,
            ObjectKind::Author => AUTHOR_FIELDS,
            ObjectKind::Message => MESSAGE_FIELDS,
            ObjectKind::Attachment => ATTACHMENT_FIELDS,
            ObjectKind::Embed => EMBED_FIELDS,
            ObjectKind::Reaction => REACTION_FIELDS,
            ObjectKind::ReactionUser => REACTION_USER_FIELDS,
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Rejects `value` if it is not an object or carries a field outside `kind`'s allow-list.
pub fn validate<'a>(value: &'a Value, kind: ObjectKind) -> Result<&'a Map<String, Value>> {
    let obj = value.as_object().ok_or_else(|| {
        LoadError::MalformedDocument(format!("expected {} to be a JSON object", kind))
    })?;

    let allowed = kind.allowed_fields();
    let mut extra_fields: Vec<String> = obj
        .keys()
        .filter(|key| !allowed.contains(&key.as_str()))
        .cloned()
        .collect();

    if extra_fields.is_empty() {
        return Ok(obj);
    }

    extra_fields.sort();
    Err(LoadError::SchemaViolation {
        kind,
        extra_fields,
        payload: serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string()),
    })
}
