//! Presence directory
//!
//! The authoritative registry of active users, keyed by connection identity.
//! Every mutation goes through one write lock so the (room, name) uniqueness
//! check and the insert are a single atomic step.

use crate::types::{normalize, ConnectionId, User};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PresenceError {
    #[error("Username is taken in this room")]
    NameTaken,

    #[error("Username and room are required")]
    MissingNameOrRoom,

    #[error("Already joined a room")]
    AlreadyJoined,
}

#[derive(Debug, Default)]
pub struct PresenceDirectory {
    users: RwLock<HashMap<ConnectionId, User>>,
}

impl PresenceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a user unless the connection already has an entry or the
    /// normalized (room, name) pair is held by someone else
    pub async fn add_user(
        &self,
        id: &str,
        name: &str,
        room: &str,
    ) -> Result<User, PresenceError> {
        let name = normalize(name);
        let room = normalize(room);
        if name.is_empty() || room.is_empty() {
            return Err(PresenceError::MissingNameOrRoom);
        }

        let mut users = self.users.write().await;

        if users.contains_key(id) {
            return Err(PresenceError::AlreadyJoined);
        }
        if users.values().any(|u| u.room == room && u.name == name) {
            return Err(PresenceError::NameTaken);
        }

        let user = User {
            id: id.to_string(),
            name,
            room,
        };
        users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    pub async fn remove_user(&self, id: &str) -> Option<User> {
        self.users.write().await.remove(id)
    }

    pub async fn get_user(&self, id: &str) -> Option<User> {
        self.users.read().await.get(id).cloned()
    }

    /// All users of a room, sorted by name
    pub async fn users_in_room(&self, room: &str) -> Vec<User> {
        let room = normalize(room);
        let mut members: Vec<User> = self
            .users
            .read()
            .await
            .values()
            .filter(|u| u.room == room)
            .cloned()
            .collect();
        members.sort_by(|a, b| a.name.cmp(&b.name));
        members
    }

    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.users.read().await.is_empty()
    }
}
