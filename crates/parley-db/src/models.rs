//! Database row types. These map directly to SQLite rows.
//! Distinct from parley-types models to keep the DB layer independent.

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::warn;

use parley_types::models::{Message, Reactions, User};

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub connection_id: String,
    pub connected_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub sender: String,
    pub sender_id: String,
    pub message: Option<String>,
    pub file: Option<String>,
    pub timestamp: String,
    pub is_private: bool,
    pub read: bool,
}

pub struct ReactionRow {
    pub message_id: String,
    pub reaction: String,
    pub count: u64,
}

/// Fixed-width RFC 3339 with milliseconds, so text order is time order.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(raw: &str, row_id: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}' on row '{}': {}", raw, row_id, e);
            DateTime::default()
        })
}

impl UserRow {
    pub fn into_user(self) -> User {
        User {
            connected_at: parse_timestamp(&self.connected_at, &self.id),
            username: self.username,
            connection_id: self.connection_id.into(),
        }
    }
}

impl MessageRow {
    pub fn into_message(self, reactions: Reactions) -> Message {
        let file = self.file.as_deref().and_then(|raw| {
            serde_json::from_str(raw)
                .map_err(|e| warn!("Corrupt file payload on message '{}': {}", self.id, e))
                .ok()
        });

        Message {
            id: self.id.parse().unwrap_or_else(|e| {
                warn!("Corrupt message id '{}': {}", self.id, e);
                uuid::Uuid::default()
            }),
            timestamp: parse_timestamp(&self.timestamp, &self.id),
            sender: self.sender,
            sender_id: self.sender_id.into(),
            message: self.message,
            file,
            is_private: self.is_private,
            read: self.read,
            reactions,
        }
    }
}
