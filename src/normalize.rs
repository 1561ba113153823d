//! Flattens one capture document into typed rows plus the closure sets of
//! every user and role id it references.
//!
//! All bookkeeping (seen ids, which users already have detail) lives in a
//! [`Normalizer`] created for one document and dropped with it.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashSet};

use crate::error::{LoadError, Result};
use crate::model::{
    AttachmentRow, ChannelRow, EmbedRow, MentionRow, MessageRow, ReactionRow, ReactionUserRow,
    RoleMentionRow, ServerRow, UserRow,
};
use crate::validate::{validate, ObjectKind};

#[derive(Debug, Clone)]
pub struct NormalizedDocument {
    pub server: ServerRow,
    pub channels: Vec<ChannelRow>,
    /// Users with full detail, in first-seen order.
    pub users: Vec<UserRow>,
    pub messages: Vec<MessageRow>,
    pub attachments: Vec<AttachmentRow>,
    pub embeds: Vec<EmbedRow>,
    pub reactions: Vec<ReactionRow>,
    pub reaction_users: Vec<ReactionUserRow>,
    pub mentions: Vec<MentionRow>,
    pub role_mentions: Vec<RoleMentionRow>,
    /// Every user id referenced anywhere; a superset of `users`.
    pub user_ids: BTreeSet<i64>,
    pub role_ids: BTreeSet<i64>,
}

impl NormalizedDocument {
    /// Rows this document writes per table, parents first. Users and roles
    /// count every referenced id, skeleton or detailed.
    pub fn row_counts(&self) -> Vec<(&'static str, usize)> {
        vec![
            ("servers", 1),
            ("channels", self.channels.len()),
            ("users", self.user_ids.len()),
            ("roles", self.role_ids.len()),
            ("messages", self.messages.len()),
            ("attachments", self.attachments.len()),
            ("embeds", self.embeds.len()),
            ("reactions", self.reactions.len()),
            ("reaction_users", self.reaction_users.len()),
            ("mentions", self.mentions.len()),
            ("role_mentions", self.role_mentions.len()),
        ]
    }
}

/// Parses raw document bytes; syntax errors are reported as malformed documents.
pub fn parse_document(bytes: &[u8]) -> Result<Value> {
    serde_json::from_slice(bytes).map_err(|e| LoadError::MalformedDocument(e.to_string()))
}

pub fn normalize(doc: &Value) -> Result<NormalizedDocument> {
    let root = doc
        .as_object()
        .ok_or_else(|| LoadError::MalformedDocument("document root is not an object".into()))?;

    let server_info = root
        .get("server_info")
        .ok_or_else(|| LoadError::MalformedDocument("missing `server_info`".into()))?;
    let server = server_row(server_info)?;

    let channels = match root.get("channels") {
        Some(Value::Object(map)) => map,
        Some(Value::Null) | None => {
            return Err(LoadError::MalformedDocument("missing `channels`".into()))
        }
        Some(_) => {
            return Err(LoadError::MalformedDocument(
                "`channels` is not an object".into(),
            ))
        }
    };

    let mut normalizer = Normalizer::new(server);
    for (channel_key, channel) in channels {
        normalizer.channel(channel_key, channel)?;
    }
    Ok(normalizer.finish())
}

struct Normalizer {
    doc: NormalizedDocument,
    detailed: HashSet<i64>,
}

impl Normalizer {
    fn new(server: ServerRow) -> Self {
        Self {
            doc: NormalizedDocument {
                server,
                channels: Vec::new(),
                users: Vec::new(),
                messages: Vec::new(),
                attachments: Vec::new(),
                embeds: Vec::new(),
                reactions: Vec::new(),
                reaction_users: Vec::new(),
                mentions: Vec::new(),
                role_mentions: Vec::new(),
                user_ids: BTreeSet::new(),
                role_ids: BTreeSet::new(),
            },
            detailed: HashSet::new(),
        }
    }

    fn finish(self) -> NormalizedDocument {
        self.doc
    }

    fn channel(&mut self, channel_key: &str, channel: &Value) -> Result<()> {
        let channel_id = channel_key.trim().parse::<i64>().map_err(|_| {
            LoadError::MalformedDocument(format!("channel key `{}` is not an integer id", channel_key))
        })?;
        let entry = channel.as_object().ok_or_else(|| {
            LoadError::MalformedDocument(format!("channel `{}` is not an object", channel_key))
        })?;

        let info = entry.get("channel_info").ok_or_else(|| {
            LoadError::MalformedDocument(format!("channel `{}` has no `channel_info`", channel_key))
        })?;
        let kind = ObjectKind::ChannelInfo;
        let info = validate(info, kind)?;
        self.doc.channels.push(ChannelRow {
            id: req_id(info, kind, "id")?,
            server_id: self.doc.server.id,
            name: opt_str(info, kind, "name")?,
            channel_type: opt_str(info, kind, "type")?,
            category: opt_str(info, kind, "category")?,
            position: opt_i64(info, kind, "position")?,
            topic: opt_str(info, kind, "topic")?,
            created_at: opt_timestamp(info, kind, "created_at")?,
        });

        for message in array(entry.get("messages"), "messages")? {
            self.message(channel_id, message)?;
        }
        Ok(())
    }

    fn message(&mut self, channel_id: i64, message: &Value) -> Result<()> {
        let kind = ObjectKind::Message;
        let msg = validate(message, kind)?;
        let message_id = req_id(msg, kind, "id")?;

        let author = required(msg, kind, "author")?;
        let author_id = self.author(author)?;

        self.doc.messages.push(MessageRow {
            id: message_id,
            channel_id,
            author_id,
            content: req_str(msg, kind, "content")?,
            timestamp: opt_timestamp(msg, kind, "timestamp")?,
            edited_timestamp: opt_timestamp(msg, kind, "edited_timestamp")?,
            pinned: req_bool(msg, kind, "pinned")?,
            mention_everyone: req_bool(msg, kind, "mention_everyone")?,
            message_type: req_str(msg, kind, "message_type")?,
            flags: req_i64(msg, kind, "flags")?,
        });

        for attachment in array(msg.get("attachments"), "attachments")? {
            let kind = ObjectKind::Attachment;
            let att = validate(attachment, kind)?;
            self.doc.attachments.push(AttachmentRow {
                id: req_id(att, kind, "id")?,
                message_id,
                filename: req_str(att, kind, "filename")?,
                url: req_str(att, kind, "url")?,
                size: req_i64(att, kind, "size")?,
                content_type: opt_str(att, kind, "content_type")?,
            });
        }

        for embed in array(msg.get("embeds"), "embeds")? {
            let kind = ObjectKind::Embed;
            let emb = validate(embed, kind)?;
            self.doc.embeds.push(EmbedRow {
                message_id,
                title: opt_str(emb, kind, "title")?,
                description: opt_str(emb, kind, "description")?,
                url: opt_str(emb, kind, "url")?,
                color: opt_i64(emb, kind, "color")?,
                timestamp: opt_timestamp(emb, kind, "timestamp")?,
            });
        }

        for reaction in array(msg.get("reactions"), "reactions")? {
            self.reaction(message_id, reaction)?;
        }

        for mention in array(msg.get("mentions"), "mentions")? {
            let user_id = parse_id(mention, kind, "mentions")?;
            self.doc.user_ids.insert(user_id);
            self.doc.mentions.push(MentionRow {
                message_id,
                user_id,
            });
        }

        for role_mention in array(msg.get("role_mentions"), "role_mentions")? {
            let role_id = parse_id(role_mention, kind, "role_mentions")?;
            self.doc.role_ids.insert(role_id);
            self.doc.role_mentions.push(RoleMentionRow {
                message_id,
                role_id,
            });
        }

        Ok(())
    }

    fn author(&mut self, author: &Value) -> Result<i64> {
        let kind = ObjectKind::Author;
        let obj = validate(author, kind)?;
        let id = req_id(obj, kind, "id")?;
        self.doc.user_ids.insert(id);

        if self.detailed.insert(id) {
            self.doc.users.push(UserRow {
                id,
                username: req_str(obj, kind, "username")?,
                display_name: opt_str(obj, kind, "display_name")?,
                bot: opt_bool(obj, kind, "bot")?.unwrap_or(false),
                system: opt_bool(obj, kind, "system")?.unwrap_or(false),
            });
        }
        Ok(id)
    }

    fn reaction(&mut self, message_id: i64, reaction: &Value) -> Result<()> {
        let kind = ObjectKind::Reaction;
        let obj = validate(reaction, kind)?;
        let emoji = req_str(obj, kind, "emoji")?;

        self.doc.reactions.push(ReactionRow {
            message_id,
            emoji: emoji.clone(),
            count: req_i64(obj, kind, "count")?,
        });

        let users = required(obj, kind, "users")?;
        for user in array(Some(users), "users")? {
            let kind = ObjectKind::ReactionUser;
            let user = validate(user, kind)?;
            let user_id = req_id(user, kind, "id")?;
            self.doc.user_ids.insert(user_id);

            if self.detailed.insert(user_id) {
                self.doc.users.push(UserRow {
                    id: user_id,
                    username: req_str(user, kind, "username")?,
                    display_name: None,
                    bot: opt_bool(user, kind, "bot")?.unwrap_or(false),
                    system: false,
                });
            }

            self.doc.reaction_users.push(ReactionUserRow {
                message_id,
                emoji: emoji.clone(),
                user_id,
            });
        }
        Ok(())
    }
}

fn server_row(value: &Value) -> Result<ServerRow> {
    let kind = ObjectKind::ServerInfo;
    let info = validate(value, kind)?;
    Ok(ServerRow {
        id: req_id(info, kind, "id")?,
        name: req_str(info, kind, "name")?,
        member_count: req_i64(info, kind, "member_count")?,
        created_at: opt_timestamp(info, kind, "created_at")?,
        fetch_timestamp: opt_timestamp(info, kind, "fetch_timestamp")?,
        days_back: req_i64(info, kind, "days_back")?,
        max_messages_per_channel: req_i64(info, kind, "max_messages_per_channel")?,
    })
}

// --- Field extraction ---

fn array<'a>(value: Option<&'a Value>, field: &str) -> Result<&'a [Value]> {
    match value {
        None | Some(Value::Null) => Ok(&[]),
        Some(Value::Array(items)) => Ok(items),
        Some(_) => Err(LoadError::MalformedDocument(format!(
            "`{}` is not an array",
            field
        ))),
    }
}

fn field<'a>(obj: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    obj.get(name).filter(|v| !v.is_null())
}

fn required<'a>(
    obj: &'a Map<String, Value>,
    kind: ObjectKind,
    name: &'static str,
) -> Result<&'a Value> {
    field(obj, name).ok_or(LoadError::MissingField { kind, field: name })
}

fn invalid(kind: ObjectKind, field: &'static str, value: &Value) -> LoadError {
    LoadError::InvalidValue {
        kind,
        field,
        value: value.to_string(),
    }
}

/// Ids travel as decimal strings; bare JSON integers are tolerated.
fn parse_id(value: &Value, kind: ObjectKind, name: &'static str) -> Result<i64> {
    match value {
        Value::String(s) => s.trim().parse().map_err(|_| invalid(kind, name, value)),
        Value::Number(n) => n.as_i64().ok_or_else(|| invalid(kind, name, value)),
        _ => Err(invalid(kind, name, value)),
    }
}

fn req_id(obj: &Map<String, Value>, kind: ObjectKind, name: &'static str) -> Result<i64> {
    parse_id(required(obj, kind, name)?, kind, name)
}

fn req_i64(obj: &Map<String, Value>, kind: ObjectKind, name: &'static str) -> Result<i64> {
    parse_id(required(obj, kind, name)?, kind, name)
}

fn opt_i64(obj: &Map<String, Value>, kind: ObjectKind, name: &'static str) -> Result<Option<i64>> {
    field(obj, name)
        .map(|v| parse_id(v, kind, name))
        .transpose()
}

fn opt_str(
    obj: &Map<String, Value>,
    kind: ObjectKind,
    name: &'static str,
) -> Result<Option<String>> {
    match field(obj, name) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(invalid(kind, name, other)),
    }
}

fn req_str(obj: &Map<String, Value>, kind: ObjectKind, name: &'static str) -> Result<String> {
    opt_str(obj, kind, name)?.ok_or(LoadError::MissingField { kind, field: name })
}

fn opt_bool(obj: &Map<String, Value>, kind: ObjectKind, name: &'static str) -> Result<Option<bool>> {
    match field(obj, name) {
        None => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(other) => Err(invalid(kind, name, other)),
    }
}

fn req_bool(obj: &Map<String, Value>, kind: ObjectKind, name: &'static str) -> Result<bool> {
    opt_bool(obj, kind, name)?.ok_or(LoadError::MissingField { kind, field: name })
}

fn opt_timestamp(
    obj: &Map<String, Value>,
    kind: ObjectKind,
    name: &'static str,
) -> Result<Option<DateTime<Utc>>> {
    let Some(value) = field(obj, name) else {
        return Ok(None);
    };
    value
        .as_str()
        .and_then(parse_timestamp)
        .map(Some)
        .ok_or_else(|| invalid(kind, name, value))
}

const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M%:z",
    "%Y-%m-%dT%H:%M%z",
];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// ISO-8601 with an offset, or a naive timestamp taken as UTC. A bare date
/// is midnight UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Some(dt) = OFFSET_FORMATS
        .iter()
        .find_map(|fmt| DateTime::parse_from_str(s, fmt).ok())
    {
        return Some(dt.with_timezone(&Utc));
    }
    if let Some(naive) = NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
    {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
