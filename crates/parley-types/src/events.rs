use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ConnectionId, Message, PresenceEntry, Reactions};

/// Events sent FROM server TO clients over the WebSocket gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// Full presence roster
    UserList(Vec<PresenceEntry>),

    /// Someone joined the chat
    UserJoined(PresenceEntry),

    /// A public message or file was posted
    ReceiveMessage(Message),

    /// Usernames of everyone currently composing
    TypingUsers(Vec<String>),

    /// A private message, delivered to its target and echoed to its sender
    PrivateMessage(Message),

    /// The message with this id was read by someone
    MessageReadReceipt(Uuid),

    /// Reaction counts of a message changed
    MessageReacted {
        #[serde(rename = "messageId")]
        message_id: Uuid,
        reactions: Reactions,
    },

    /// Someone left the chat
    UserLeft(PresenceEntry),
}

impl GatewayEvent {
    /// Wire name of the event, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UserList(_) => "user_list",
            Self::UserJoined(_) => "user_joined",
            Self::ReceiveMessage(_) => "receive_message",
            Self::TypingUsers(_) => "typing_users",
            Self::PrivateMessage(_) => "private_message",
            Self::MessageReadReceipt(_) => "message_read_receipt",
            Self::MessageReacted { .. } => "message_reacted",
            Self::UserLeft(_) => "user_left",
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum GatewayCommand {
    /// Join the chat under a username
    UserJoin(String),

    /// Post a public message
    SendMessage(SendMessagePayload),

    /// Post a file; the payload is stored and relayed as-is
    SendFile(serde_json::Value),

    /// Start or stop composing
    Typing(bool),

    /// Send a message to one connection only
    PrivateMessage(PrivateMessagePayload),

    /// Mark a message as read
    MessageRead(Uuid),

    /// Add one to a reaction on a message
    ReactToMessage(ReactionPayload),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SendMessagePayload {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub file: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrivateMessagePayload {
    pub to: ConnectionId,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionPayload {
    pub message_id: Uuid,
    pub reaction: String,
}
