//! Relational layout for loaded capture documents.
//!
//! Natural ids come from the source platform. Embeds are the only table with
//! a surrogate key, since an embed has no identity of its own.

pub const SCHEMA_VERSION: i32 = 1;

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS servers (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    member_count INTEGER NOT NULL,
    created_at TEXT,
    fetch_timestamp TEXT,
    days_back INTEGER NOT NULL,
    max_messages_per_channel INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS channels (
    id INTEGER PRIMARY KEY,
    server_id INTEGER NOT NULL REFERENCES servers(id),
    name TEXT,
    type TEXT,
    category TEXT,
    position INTEGER,
    topic TEXT,
    created_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_channels_server ON channels (server_id);

-- Skeleton rows carry only the id.
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY,
    username TEXT,
    display_name TEXT,
    bot BOOLEAN,
    system BOOLEAN
);

CREATE TABLE IF NOT EXISTS roles (
    id INTEGER PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY,
    channel_id INTEGER NOT NULL REFERENCES channels(id),
    author_id INTEGER NOT NULL REFERENCES users(id),
    content TEXT NOT NULL,
    timestamp TEXT,
    edited_timestamp TEXT,
    pinned BOOLEAN NOT NULL,
    mention_everyone BOOLEAN NOT NULL,
    message_type TEXT NOT NULL,
    flags INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_channel_date ON messages (channel_id, timestamp);
CREATE INDEX IF NOT EXISTS idx_messages_author ON messages (author_id);

CREATE TABLE IF NOT EXISTS attachments (
    id INTEGER PRIMARY KEY,
    message_id INTEGER NOT NULL REFERENCES messages(id),
    filename TEXT NOT NULL,
    url TEXT NOT NULL,
    size INTEGER NOT NULL,
    content_type TEXT
);
CREATE INDEX IF NOT EXISTS idx_attachments_message ON attachments (message_id);

CREATE TABLE IF NOT EXISTS embeds (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    message_id INTEGER NOT NULL REFERENCES messages(id),
    title TEXT,
    description TEXT,
    url TEXT,
    color INTEGER,
    timestamp TEXT
);
CREATE INDEX IF NOT EXISTS idx_embeds_message ON embeds (message_id);

CREATE TABLE IF NOT EXISTS reactions (
    message_id INTEGER NOT NULL REFERENCES messages(id),
    emoji TEXT NOT NULL,
    count INTEGER NOT NULL,
    PRIMARY KEY (message_id, emoji)
);

CREATE TABLE IF NOT EXISTS reaction_users (
    message_id INTEGER NOT NULL,
    emoji TEXT NOT NULL,
    user_id INTEGER NOT NULL REFERENCES users(id),
    PRIMARY KEY (message_id, emoji, user_id),
    FOREIGN KEY (message_id, emoji) REFERENCES reactions(message_id, emoji)
);

CREATE TABLE IF NOT EXISTS mentions (
    message_id INTEGER NOT NULL REFERENCES messages(id),
    user_id INTEGER NOT NULL REFERENCES users(id),
    PRIMARY KEY (message_id, user_id)
);

CREATE TABLE IF NOT EXISTS role_mentions (
    message_id INTEGER NOT NULL REFERENCES messages(id),
    role_id INTEGER NOT NULL REFERENCES roles(id),
    PRIMARY KEY (message_id, role_id)
);
";

/// Every table, parents before children.
pub const TABLES: [&str; 11] = [
    "servers",
    "channels",
    "users",
    "roles",
    "messages",
    "attachments",
    "embeds",
    "reactions",
    "reaction_users",
    "mentions",
    "role_mentions",
];
