use serde::{Deserialize, Serialize};

/// Opaque connection identity, assigned by the gateway on upgrade
pub type ConnectionId = String;

/// Author shown on system notices (welcome, joined, left)
pub const ADMIN_AUTHOR: &str = "admin";

/// Author shown on automated replies
pub const BOT_AUTHOR: &str = "bot";

/// An active participant. `name` and `room` are always stored normalized.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: ConnectionId,
    pub name: String,
    pub room: String,
}

/// Normalize a user-supplied name or room: trimmed and lower-cased
pub fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Create a fresh connection identity
pub fn new_connection_id() -> ConnectionId {
    ulid::Ulid::new().to_string()
}
