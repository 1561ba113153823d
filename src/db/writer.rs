//! Dependency-ordered batch writes for one normalized document.
//!
//! Steps run strictly in [`WriteStep`] order and every chunk of a step is
//! flushed before the next step starts. Callers own the transaction.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, Statement};
use tracing::{debug, info};

use crate::error::{LoadError, Result};
use crate::normalize::NormalizedDocument;

pub const DEFAULT_BATCH_SIZE: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteStep {
    Server,
    UserSkeletons,
    RoleSkeletons,
    Users,
    Channels,
    EmbedCleanup,
    Messages,
    Attachments,
    Embeds,
    Reactions,
    ReactionUsers,
    Mentions,
    RoleMentions,
}

impl WriteStep {
    pub fn table(self) -> &'static str {
        match self {
            WriteStep::Server => "servers",
            WriteStep::UserSkeletons | WriteStep::Users => "users",
            WriteStep::RoleSkeletons => "roles",
            WriteStep::Channels => "channels",
            WriteStep::EmbedCleanup | WriteStep::Embeds => "embeds",
            WriteStep::Messages => "messages",
            WriteStep::Attachments => "attachments",
            WriteStep::Reactions => "reactions",
            WriteStep::ReactionUsers => "reaction_users",
            WriteStep::Mentions => "mentions",
            WriteStep::RoleMentions => "role_mentions",
        }
    }

    fn summary(self) -> &'static str {
        match self {
            WriteStep::Server => "Inserted/updated server",
            WriteStep::UserSkeletons => "Ensured user IDs exist",
            WriteStep::RoleSkeletons => "Ensured role IDs exist",
            WriteStep::Users => "Inserted/updated users with details",
            WriteStep::Channels => "Inserted/updated channels",
            WriteStep::EmbedCleanup => "Cleared embeds for messages",
            WriteStep::Messages => "Inserted/updated messages",
            WriteStep::Attachments => "Inserted/updated attachments",
            WriteStep::Embeds => "Inserted embeds",
            WriteStep::Reactions => "Inserted/updated reactions",
            WriteStep::ReactionUsers => "Inserted reaction users",
            WriteStep::Mentions => "Inserted mentions",
            WriteStep::RoleMentions => "Inserted role mentions",
        }
    }
}

/// One flushed chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRecord {
    pub step: WriteStep,
    pub rows: usize,
}

/// Every batch flushed for a document, in issue order.
#[derive(Debug, Clone, Default)]
pub struct WriteReport {
    pub batches: Vec<BatchRecord>,
}

impl WriteReport {
    pub fn batch_sizes(&self, step: WriteStep) -> Vec<usize> {
        self.batches
            .iter()
            .filter(|b| b.step == step)
            .map(|b| b.rows)
            .collect()
    }

    pub fn rows(&self, step: WriteStep) -> usize {
        self.batch_sizes(step).iter().sum()
    }

    /// Steps in the order their first batch was issued.
    pub fn steps(&self) -> Vec<WriteStep> {
        let mut steps: Vec<WriteStep> = Vec::new();
        for batch in &self.batches {
            if steps.last() != Some(&batch.step) {
                steps.push(batch.step);
            }
        }
        steps
    }
}

fn ts(value: &Option<DateTime<Utc>>) -> Option<String> {
    value
        .as_ref()
        .map(|t| t.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

const UPSERT_SERVER: &str = "
    INSERT INTO servers
        (id, name, member_count, created_at, fetch_timestamp, days_back, max_messages_per_channel)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
    ON CONFLICT(id) DO UPDATE SET
        name = excluded.name,
        member_count = excluded.member_count,
        created_at = excluded.created_at,
        fetch_timestamp = excluded.fetch_timestamp,
        days_back = excluded.days_back,
        max_messages_per_channel = excluded.max_messages_per_channel";

const ENSURE_USER: &str = "INSERT INTO users (id) VALUES (?1) ON CONFLICT(id) DO NOTHING";

const ENSURE_ROLE: &str = "INSERT INTO roles (id) VALUES (?1) ON CONFLICT(id) DO NOTHING";

const UPSERT_USER: &str = "
    INSERT INTO users (id, username, display_name, bot, system)
    VALUES (?1, ?2, ?3, ?4, ?5)
    ON CONFLICT(id) DO UPDATE SET
        username = excluded.username,
        display_name = excluded.display_name,
        bot = excluded.bot,
        system = excluded.system";

const UPSERT_CHANNEL: &str = "
    INSERT INTO channels (id, server_id, name, type, category, position, topic, created_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
    ON CONFLICT(id) DO UPDATE SET
        server_id = excluded.server_id,
        name = excluded.name,
        type = excluded.type,
        category = excluded.category,
        position = excluded.position,
        topic = excluded.topic,
        created_at = excluded.created_at";

const DELETE_EMBEDS: &str = "DELETE FROM embeds WHERE message_id = ?1";

const UPSERT_MESSAGE: &str = "
    INSERT INTO messages
        (id, channel_id, author_id, content, timestamp, edited_timestamp,
         pinned, mention_everyone, message_type, flags)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
    ON CONFLICT(id) DO UPDATE SET
        channel_id = excluded.channel_id,
        author_id = excluded.author_id,
        content = excluded.content,
        timestamp = excluded.timestamp,
        edited_timestamp = excluded.edited_timestamp,
        pinned = excluded.pinned,
        mention_everyone = excluded.mention_everyone,
        message_type = excluded.message_type,
        flags = excluded.flags";

const UPSERT_ATTACHMENT: &str = "
    INSERT INTO attachments (id, message_id, filename, url, size, content_type)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
    ON CONFLICT(id) DO UPDATE SET
        message_id = excluded.message_id,
        filename = excluded.filename,
        url = excluded.url,
        size = excluded.size,
        content_type = excluded.content_type";

const INSERT_EMBED: &str = "
    INSERT INTO embeds (message_id, title, description, url, color, timestamp)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6)";

const UPSERT_REACTION: &str = "
    INSERT INTO reactions (message_id, emoji, count)
    VALUES (?1, ?2, ?3)
    ON CONFLICT(message_id, emoji) DO UPDATE SET count = excluded.count";

const INSERT_REACTION_USER: &str = "
    INSERT INTO reaction_users (message_id, emoji, user_id)
    VALUES (?1, ?2, ?3)
    ON CONFLICT(message_id, emoji, user_id) DO NOTHING";

const INSERT_MENTION: &str = "
    INSERT INTO mentions (message_id, user_id)
    VALUES (?1, ?2)
    ON CONFLICT(message_id, user_id) DO NOTHING";

const INSERT_ROLE_MENTION: &str = "
    INSERT INTO role_mentions (message_id, role_id)
    VALUES (?1, ?2)
    ON CONFLICT(message_id, role_id) DO NOTHING";

pub struct BatchWriter<'c> {
    conn: &'c Connection,
    batch_size: usize,
    report: WriteReport,
}

impl<'c> BatchWriter<'c> {
    pub fn new(conn: &'c Connection, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(LoadError::Config("batch size must be greater than zero".into()));
        }
        Ok(Self {
            conn,
            batch_size,
            report: WriteReport::default(),
        })
    }

    pub fn into_report(self) -> WriteReport {
        self.report
    }

    /// Executes `sql` once per row, `batch_size` rows per flushed batch.
    fn flush<T, F>(&mut self, step: WriteStep, sql: &str, rows: &[T], mut bind: F) -> Result<usize>
    where
        F: FnMut(&mut Statement<'_>, &T) -> rusqlite::Result<usize>,
    {
        if rows.is_empty() {
            return Ok(0);
        }

        let conn = self.conn;
        let mut stmt = conn.prepare_cached(sql)?;
        let mut affected = 0usize;
        for chunk in rows.chunks(self.batch_size) {
            debug!(
                "SQL ({}, {} rows): {}",
                step.table(),
                chunk.len(),
                sql.split_whitespace().collect::<Vec<_>>().join(" ")
            );
            for row in chunk {
                affected += bind(&mut *stmt, row)?;
            }
            self.report.batches.push(BatchRecord {
                step,
                rows: chunk.len(),
            });
        }

        info!("  {}: {}", step.summary(), rows.len());
        Ok(affected)
    }

    pub fn upsert_server(&mut self, doc: &NormalizedDocument) -> Result<()> {
        let server = std::slice::from_ref(&doc.server);
        self.flush(WriteStep::Server, UPSERT_SERVER, server, |stmt, s| {
            stmt.execute(params![
                s.id,
                s.name,
                s.member_count,
                ts(&s.created_at),
                ts(&s.fetch_timestamp),
                s.days_back,
                s.max_messages_per_channel,
            ])
        })?;
        Ok(())
    }

    // --- Referential skeletons ---

    /// Inserts an id-only row for every referenced user and role not yet
    /// present. Existing rows, skeleton or detailed, are left untouched.
    pub fn ensure_skeletons(&mut self, doc: &NormalizedDocument) -> Result<()> {
        let user_ids: Vec<i64> = doc.user_ids.iter().copied().collect();
        let created = self.flush(WriteStep::UserSkeletons, ENSURE_USER, &user_ids, |stmt, id| {
            stmt.execute([id])
        })?;
        debug!("  {} new user skeletons", created);

        let role_ids: Vec<i64> = doc.role_ids.iter().copied().collect();
        let created = self.flush(WriteStep::RoleSkeletons, ENSURE_ROLE, &role_ids, |stmt, id| {
            stmt.execute([id])
        })?;
        debug!("  {} new role skeletons", created);
        Ok(())
    }

    // --- Detailed rows ---

    pub fn upsert_users(&mut self, doc: &NormalizedDocument) -> Result<()> {
        self.flush(WriteStep::Users, UPSERT_USER, &doc.users, |stmt, u| {
            stmt.execute(params![u.id, u.username, u.display_name, u.bot, u.system])
        })?;
        Ok(())
    }

    pub fn upsert_channels(&mut self, doc: &NormalizedDocument) -> Result<()> {
        self.flush(WriteStep::Channels, UPSERT_CHANNEL, &doc.channels, |stmt, c| {
            stmt.execute(params![
                c.id,
                c.server_id,
                c.name,
                c.channel_type,
                c.category,
                c.position,
                c.topic,
                ts(&c.created_at),
            ])
        })?;
        Ok(())
    }

    /// Embeds have no natural key, so every message being written loses its
    /// old embeds before the current set is inserted.
    pub fn clear_embeds(&mut self, doc: &NormalizedDocument) -> Result<()> {
        let message_ids: Vec<i64> = doc.messages.iter().map(|m| m.id).collect();
        let deleted = self.flush(WriteStep::EmbedCleanup, DELETE_EMBEDS, &message_ids, |stmt, id| {
            stmt.execute([id])
        })?;
        debug!("  Deleted {} stale embeds", deleted);
        Ok(())
    }

    pub fn upsert_messages(&mut self, doc: &NormalizedDocument) -> Result<()> {
        self.flush(WriteStep::Messages, UPSERT_MESSAGE, &doc.messages, |stmt, m| {
            stmt.execute(params![
                m.id,
                m.channel_id,
                m.author_id,
                m.content,
                ts(&m.timestamp),
                ts(&m.edited_timestamp),
                m.pinned,
                m.mention_everyone,
                m.message_type,
                m.flags,
            ])
        })?;
        Ok(())
    }

    pub fn upsert_attachments(&mut self, doc: &NormalizedDocument) -> Result<()> {
        self.flush(WriteStep::Attachments, UPSERT_ATTACHMENT, &doc.attachments, |stmt, a| {
            stmt.execute(params![a.id, a.message_id, a.filename, a.url, a.size, a.content_type])
        })?;
        Ok(())
    }

    pub fn insert_embeds(&mut self, doc: &NormalizedDocument) -> Result<()> {
        self.flush(WriteStep::Embeds, INSERT_EMBED, &doc.embeds, |stmt, e| {
            stmt.execute(params![
                e.message_id,
                e.title,
                e.description,
                e.url,
                e.color,
                ts(&e.timestamp),
            ])
        })?;
        Ok(())
    }

    pub fn upsert_reactions(&mut self, doc: &NormalizedDocument) -> Result<()> {
        self.flush(WriteStep::Reactions, UPSERT_REACTION, &doc.reactions, |stmt, r| {
            stmt.execute(params![r.message_id, r.emoji, r.count])
        })?;
        Ok(())
    }

    pub fn insert_facts(&mut self, doc: &NormalizedDocument) -> Result<()> {
        self.flush(
            WriteStep::ReactionUsers,
            INSERT_REACTION_USER,
            &doc.reaction_users,
            |stmt, r| stmt.execute(params![r.message_id, r.emoji, r.user_id]),
        )?;
        self.flush(WriteStep::Mentions, INSERT_MENTION, &doc.mentions, |stmt, m| {
            stmt.execute(params![m.message_id, m.user_id])
        })?;
        self.flush(
            WriteStep::RoleMentions,
            INSERT_ROLE_MENTION,
            &doc.role_mentions,
            |stmt, m| stmt.execute(params![m.message_id, m.role_id]),
        )?;
        Ok(())
    }
}

/// Writes every row of `doc` in foreign-key order. Any error stops the
/// sequence; the enclosing transaction decides what persists.
pub fn write_document(
    conn: &Connection,
    doc: &NormalizedDocument,
    batch_size: usize,
) -> Result<WriteReport> {
    let mut writer = BatchWriter::new(conn, batch_size)?;
    writer.upsert_server(doc)?;
    writer.ensure_skeletons(doc)?;
    writer.upsert_users(doc)?;
    writer.upsert_channels(doc)?;
    writer.clear_embeds(doc)?;
    writer.upsert_messages(doc)?;
    writer.upsert_attachments(doc)?;
    writer.insert_embeds(doc)?;
    writer.upsert_reactions(doc)?;
    writer.insert_facts(doc)?;
    Ok(writer.into_report())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::normalize::normalize;
    use crate::testing::{author, document, message};
    use serde_json::{json, Value};

    fn test_db() -> Database {
        let db = Database::in_memory().unwrap();
        db.execute_init().unwrap();
        db
    }

    fn load(db: &Database, doc: &Value) -> WriteReport {
        let doc = normalize(doc).unwrap();
        db.load_document(&doc, DEFAULT_BATCH_SIZE).unwrap()
    }

    fn snapshot(db: &Database, sql: &str) -> Vec<Vec<String>> {
        let conn = db.conn();
        let mut stmt = conn.prepare(sql).unwrap();
        let columns = stmt.column_count();
        stmt.query_map([], |row| {
            (0..columns)
                .map(|i| {
                    let value: rusqlite::types::Value = row.get(i)?;
                    Ok(format!("{:?}", value))
                })
                .collect::<rusqlite::Result<Vec<_>>>()
        })
        .unwrap()
        .map(|r| r.unwrap())
        .collect()
    }

    fn rich_document() -> Value {
        let mut first = message(10, 1);
        first["mentions"] = json!(["3"]);
        first["role_mentions"] = json!(["77"]);
        first["attachments"] = json!([
            {"id": "500", "filename": "log.txt", "url": "https://cdn/log.txt", "size": 12, "content_type": "text/plain"}
        ]);
        first["embeds"] = json!([
            {"title": "one", "description": null, "url": null, "color": 1, "timestamp": null},
            {"title": "two", "description": "d", "url": "https://x", "color": null, "timestamp": "2024-05-01T12:00:00+00:00"}
        ]);
        first["reactions"] = json!([
            {"emoji": "🎉", "count": 2, "users": [
                {"id": "2", "username": "user2", "bot": false},
                {"id": "1", "username": "user1", "bot": false}
            ]}
        ]);
        let second = message(11, 2);
        document(1, vec![(5, vec![first, second])])
    }

    #[test]
    fn test_steps_run_in_dependency_order() {
        let db = test_db();
        let report = load(&db, &rich_document());
        assert_eq!(
            report.steps(),
            vec![
                WriteStep::Server,
                WriteStep::UserSkeletons,
                WriteStep::RoleSkeletons,
                WriteStep::Users,
                WriteStep::Channels,
                WriteStep::EmbedCleanup,
                WriteStep::Messages,
                WriteStep::Attachments,
                WriteStep::Embeds,
                WriteStep::Reactions,
                WriteStep::ReactionUsers,
                WriteStep::Mentions,
                WriteStep::RoleMentions,
            ]
        );
        assert_eq!(report.rows(WriteStep::UserSkeletons), 3);
        assert_eq!(report.rows(WriteStep::Users), 2);
    }

    #[test]
    fn test_referential_integrity_after_load() {
        let db = test_db();
        load(&db, &rich_document());

        let orphans = snapshot(
            &db,
            "SELECT 'message', id FROM messages
                 WHERE author_id NOT IN (SELECT id FROM users)
                    OR channel_id NOT IN (SELECT id FROM channels)
             UNION ALL SELECT 'mention', message_id FROM mentions
                 WHERE user_id NOT IN (SELECT id FROM users)
                    OR message_id NOT IN (SELECT id FROM messages)
             UNION ALL SELECT 'role_mention', message_id FROM role_mentions
                 WHERE role_id NOT IN (SELECT id FROM roles)
             UNION ALL SELECT 'reaction_user', message_id FROM reaction_users
                 WHERE user_id NOT IN (SELECT id FROM users)",
        );
        assert!(orphans.is_empty(), "orphans: {:?}", orphans);

        let conn = db.conn();
        let violations: i64 = conn
            .query_row("SELECT COUNT(*) FROM pragma_foreign_key_check()", [], |row| row.get(0))
            .unwrap();
        assert_eq!(violations, 0);
    }

    #[test]
    fn test_loading_twice_is_idempotent() {
        let db = test_db();
        let doc = rich_document();
        load(&db, &doc);
        let counts = db.table_counts().unwrap();
        let users = snapshot(&db, "SELECT * FROM users ORDER BY id");
        let messages = snapshot(&db, "SELECT * FROM messages ORDER BY id");
        let embeds = snapshot(
            &db,
            "SELECT message_id, title, description, url, color, timestamp FROM embeds ORDER BY title",
        );

        load(&db, &doc);
        assert_eq!(db.table_counts().unwrap(), counts);
        assert_eq!(snapshot(&db, "SELECT * FROM users ORDER BY id"), users);
        assert_eq!(snapshot(&db, "SELECT * FROM messages ORDER BY id"), messages);
        assert_eq!(
            snapshot(
                &db,
                "SELECT message_id, title, description, url, color, timestamp FROM embeds ORDER BY title",
            ),
            embeds
        );
        assert_eq!(db.row_count("embeds").unwrap(), 2);
    }

    #[test]
    fn test_mentioned_only_user_is_skeleton_then_detailed() {
        let db = test_db();
        load(&db, &rich_document());

        let row = snapshot(&db, "SELECT username, display_name, bot, system FROM users WHERE id = 3");
        assert_eq!(row, vec![vec!["Null".to_string(); 4]]);

        // A later document in which user 3 authors a message.
        load(&db, &document(1, vec![(5, vec![message(12, 3)])]));
        let row = snapshot(&db, "SELECT username, display_name FROM users WHERE id = 3");
        assert_eq!(
            row,
            vec![vec!["Text(\"user3\")".to_string(), "Text(\"User 3\")".to_string()]]
        );
        assert_eq!(
            snapshot(&db, "SELECT COUNT(*) FROM users WHERE id = 3"),
            vec![vec!["Integer(1)".to_string()]]
        );
    }

    #[test]
    fn test_detail_never_regresses_to_skeleton() {
        let db = test_db();
        load(&db, &rich_document());

        // User 1 appears only as a mention in this document.
        let mut msg = message(20, 2);
        msg["mentions"] = json!(["1"]);
        load(&db, &document(1, vec![(5, vec![msg])]));

        let row = snapshot(&db, "SELECT username FROM users WHERE id = 1");
        assert_eq!(row, vec![vec!["Text(\"user1\")".to_string()]]);
    }

    #[test]
    fn test_later_detail_overwrites_earlier() {
        let db = test_db();
        load(&db, &rich_document());

        let mut msg = message(21, 2);
        msg["author"] = author(2);
        msg["author"]["username"] = json!("renamed");
        msg["author"]["bot"] = json!(true);
        load(&db, &document(1, vec![(5, vec![msg])]));

        let row = snapshot(&db, "SELECT username, bot FROM users WHERE id = 2");
        assert_eq!(
            row,
            vec![vec!["Text(\"renamed\")".to_string(), "Integer(1)".to_string()]]
        );
    }

    #[test]
    fn test_shrinking_embed_list_replaces_embeds() {
        let db = test_db();
        let mut doc = rich_document();
        load(&db, &doc);
        assert_eq!(db.row_count("embeds").unwrap(), 2);

        doc["channels"]["5"]["messages"][0]["embeds"] =
            json!([{"title": "only", "description": null, "url": null, "color": null, "timestamp": null}]);
        load(&db, &doc);

        let rows = snapshot(&db, "SELECT message_id, title FROM embeds");
        assert_eq!(
            rows,
            vec![vec!["Integer(10)".to_string(), "Text(\"only\")".to_string()]]
        );
    }

    #[test]
    fn test_reaction_count_updates_on_reload() {
        let db = test_db();
        let mut doc = rich_document();
        load(&db, &doc);

        doc["channels"]["5"]["messages"][0]["reactions"][0]["count"] = json!(5);
        load(&db, &doc);

        let rows = snapshot(&db, "SELECT count FROM reactions WHERE message_id = 10");
        assert_eq!(rows, vec![vec!["Integer(5)".to_string()]]);
        assert_eq!(db.row_count("reaction_users").unwrap(), 2);
    }

    #[test]
    fn test_messages_are_chunked_into_batches() {
        let db = test_db();
        let messages: Vec<Value> = (0..2500).map(|i| message(10_000 + i, 1 + i % 7)).collect();
        let report = load(&db, &document(1, vec![(5, messages)]));

        assert_eq!(report.batch_sizes(WriteStep::Messages), vec![1000, 1000, 500]);
        assert_eq!(report.batch_sizes(WriteStep::EmbedCleanup), vec![1000, 1000, 500]);
        assert_eq!(db.row_count("messages").unwrap(), 2500);

        // Every message batch lands after all skeleton and channel batches.
        let first_message = report
            .batches
            .iter()
            .position(|b| b.step == WriteStep::Messages)
            .unwrap();
        assert!(report.batches[first_message..]
            .iter()
            .all(|b| !matches!(b.step, WriteStep::UserSkeletons | WriteStep::Channels)));
    }

    #[test]
    fn test_custom_batch_size() {
        let db = test_db();
        let messages: Vec<Value> = (0..5).map(|i| message(100 + i, 1)).collect();
        let doc = normalize(&document(1, vec![(5, messages)])).unwrap();
        let report = db.load_document(&doc, 2).unwrap();
        assert_eq!(report.batch_sizes(WriteStep::Messages), vec![2, 2, 1]);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let db = test_db();
        let doc = normalize(&rich_document()).unwrap();
        assert!(matches!(
            db.load_document(&doc, 0),
            Err(LoadError::Config(_))
        ));
        assert_eq!(db.row_count("servers").unwrap(), 0);
    }
}
