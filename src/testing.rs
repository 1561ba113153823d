//! Document builders shared by unit tests.

use serde_json::{json, Map, Value};

pub fn server_info(id: i64) -> Value {
    json!({
        "id": id.to_string(),
        "name": format!("server-{}", id),
        "member_count": 10,
        "created_at": "2021-06-01T00:00:00+00:00",
        "fetch_timestamp": "2024-06-01T00:00:00+00:00",
        "days_back": 30,
        "max_messages_per_channel": 5000
    })
}

pub fn author(id: i64) -> Value {
    json!({
        "id": id.to_string(),
        "username": format!("user{}", id),
        "display_name": format!("User {}", id),
        "bot": false,
        "system": false
    })
}

pub fn message(id: i64, author_id: i64) -> Value {
    json!({
        "id": id.to_string(),
        "author": author(author_id),
        "content": format!("message {}", id),
        "timestamp": "2024-05-01T12:00:00+00:00",
        "edited_timestamp": null,
        "attachments": [],
        "embeds": [],
        "reactions": [],
        "mentions": [],
        "role_mentions": [],
        "pinned": false,
        "mention_everyone": false,
        "message_type": "MessageType.default",
        "flags": 0
    })
}

pub fn document(server_id: i64, channels: Vec<(i64, Vec<Value>)>) -> Value {
    let mut map = Map::new();
    for (channel_id, messages) in channels {
        map.insert(
            channel_id.to_string(),
            json!({
                "channel_info": {
                    "id": channel_id.to_string(),
                    "name": format!("channel-{}", channel_id),
                    "type": "text",
                    "category": null,
                    "position": 0,
                    "topic": null,
                    "created_at": "2021-06-02T00:00:00+00:00"
                },
                "messages": messages
            }),
        );
    }
    json!({
        "server_info": server_info(server_id),
        "channels": Value::Object(map)
    })
}
