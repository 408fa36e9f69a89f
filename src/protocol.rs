use crate::types::*;
use serde::{Deserialize, Serialize};

/// Frames sent by a client. `ack` is an optional client-chosen id echoed back
/// in the matching [`ServerMessage::Ack`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ClientMessage {
    Join {
        name: String,
        room: String,
        #[serde(default)]
        ack: Option<u64>,
    },
    #[serde(rename = "sendMessage", alias = "send_message")]
    SendMessage {
        text: String,
        #[serde(default)]
        ack: Option<u64>,
    },
    /// Leave the current room without closing the connection
    Leave {
        #[serde(default)]
        ack: Option<u64>,
    },
}

impl ClientMessage {
    pub fn ack_id(&self) -> Option<u64> {
        match self {
            ClientMessage::Join { ack, .. }
            | ClientMessage::SendMessage { ack, .. }
            | ClientMessage::Leave { ack } => *ack,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ServerMessage {
    /// A chat line, authored by a user, "admin" or "bot"
    Message { user: String, text: String },
    /// Full roster snapshot of a room
    #[serde(rename = "roomData")]
    RoomData { room: String, users: Vec<User> },
    /// Per-call acknowledgment; `error` is None on success
    Ack {
        ack: Option<u64>,
        error: Option<String>,
    },
    Error { code: String, msg: String },
}

impl ServerMessage {
    pub fn message(user: impl Into<String>, text: impl Into<String>) -> Self {
        ServerMessage::Message {
            user: user.into(),
            text: text.into(),
        }
    }

    pub fn admin(text: impl Into<String>) -> Self {
        Self::message(ADMIN_AUTHOR, text)
    }

    pub fn bot(text: impl Into<String>) -> Self {
        Self::message(BOT_AUTHOR, text)
    }
}
