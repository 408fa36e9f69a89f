use crate::protocol::ServerMessage;
use crate::types::{normalize, ConnectionId};
use std::collections::HashMap;
use tokio::sync::{mpsc, RwLock};

/// Outbound queue of a single connection, drained by its socket writer task
pub type Outbox = mpsc::UnboundedSender<ServerMessage>;

/// Room-scoped fan-out. Rooms exist only while they have subscribers.
#[derive(Debug, Default)]
pub struct RoomBroadcaster {
    rooms: RwLock<HashMap<String, HashMap<ConnectionId, Outbox>>>,
}

impl RoomBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, room: &str, id: &str, outbox: Outbox) {
        self.rooms
            .write()
            .await
            .entry(normalize(room))
            .or_default()
            .insert(id.to_string(), outbox);
    }

    /// Returns whether the connection was subscribed
    pub async fn unsubscribe(&self, room: &str, id: &str) -> bool {
        let room = normalize(room);
        let mut rooms = self.rooms.write().await;

        let Some(members) = rooms.get_mut(&room) else {
            return false;
        };
        let removed = members.remove(id).is_some();
        if members.is_empty() {
            rooms.remove(&room);
        }
        removed
    }

    /// Deliver to every connection in the room; returns how many queues accepted it
    pub async fn send_to_room(&self, room: &str, msg: ServerMessage) -> usize {
        self.fan_out(room, None, msg).await
    }

    pub async fn send_to_room_except(
        &self,
        room: &str,
        except: &str,
        msg: ServerMessage,
    ) -> usize {
        self.fan_out(room, Some(except), msg).await
    }

    pub async fn subscribers(&self, room: &str) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self
            .rooms
            .read()
            .await
            .get(&normalize(room))
            .map(|members| members.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    async fn fan_out(&self, room: &str, except: Option<&str>, msg: ServerMessage) -> usize {
        let rooms = self.rooms.read().await;
        let Some(members) = rooms.get(&normalize(room)) else {
            return 0;
        };

        let mut delivered = 0;
        for (id, outbox) in members {
            if Some(id.as_str()) == except {
                continue;
            }
            // A closed queue means the connection is going away; its
            // unsubscribe is already on the way
            if outbox.send(msg.clone()).is_ok() {
                delivered += 1;
            } else {
                tracing::debug!("Dropping message for closed connection {}", id);
            }
        }
        delivered
    }
}
