use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identity of a single gateway socket. Assigned on connect,
/// meaningless after disconnect.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ConnectionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who sent a message, as far as the presence registry knows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sender {
    /// The connection had joined under this username.
    Known(String),
    /// The connection never joined (or already left).
    Unknown,
}

impl Sender {
    pub const ANONYMOUS: &'static str = "Anonymous";

    pub fn display_name(&self) -> &str {
        match self {
            Self::Known(name) => name.as_str(),
            Self::Unknown => Self::ANONYMOUS,
        }
    }
}

/// Roster entry broadcast in `user_list`, `user_joined` and `user_left`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceEntry {
    pub username: String,
    pub id: ConnectionId,
}

/// Persisted record of a joined connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub username: String,
    pub connection_id: ConnectionId,
    pub connected_at: DateTime<Utc>,
}

/// Reaction label -> count. Ordered so serialized output is stable.
pub type Reactions = BTreeMap<String, u64>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub sender: String,
    pub sender_id: ConnectionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Attachment metadata, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub reactions: Reactions,
}

impl Message {
    /// A new unread message stamped with the current time. Timestamps are kept
    /// at millisecond precision, which is what the store round-trips.
    pub fn new(sender: &Sender, sender_id: ConnectionId) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender: sender.display_name().to_string(),
            sender_id,
            message: None,
            file: None,
            timestamp: Utc::now().trunc_subsecs(3),
            is_private: false,
            read: false,
            reactions: Reactions::new(),
        }
    }

    pub fn with_body(mut self, body: Option<String>) -> Self {
        self.message = body;
        self
    }

    pub fn with_file(mut self, file: Option<serde_json::Value>) -> Self {
        self.file = file;
        self
    }

    pub fn private(mut self) -> Self {
        self.is_private = true;
        self
    }
}
