//! Flat rows for the eleven tables, as produced by the normalizer.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq)]
pub struct ServerRow {
    pub id: i64,
    pub name: String,
    pub member_count: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub fetch_timestamp: Option<DateTime<Utc>>,
    pub days_back: i64,
    pub max_messages_per_channel: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelRow {
    pub id: i64,
    pub server_id: i64,
    pub name: Option<String>,
    pub channel_type: Option<String>,
    pub category: Option<String>,
    pub position: Option<i64>,
    pub topic: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

/// A user with full detail. Users known only by id are written as skeletons
/// from the closure set and never appear here.
#[derive(Debug, Clone, PartialEq)]
pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub display_name: Option<String>,
    pub bot: bool,
    pub system: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageRow {
    pub id: i64,
    pub channel_id: i64,
    pub author_id: i64,
    pub content: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub edited_timestamp: Option<DateTime<Utc>>,
    pub pinned: bool,
    pub mention_everyone: bool,
    pub message_type: String,
    pub flags: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentRow {
    pub id: i64,
    pub message_id: i64,
    pub filename: String,
    pub url: String,
    pub size: i64,
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmbedRow {
    pub message_id: i64,
    pub title: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub color: Option<i64>,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReactionRow {
    pub message_id: i64,
    pub emoji: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReactionUserRow {
    pub message_id: i64,
    pub emoji: String,
    pub user_id: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MentionRow {
    pub message_id: i64,
    pub user_id: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoleMentionRow {
    pub message_id: i64,
    pub role_id: i64,
}
