//! Room membership protocol
//!
//! Join and leave keep the presence directory and the broadcaster in lockstep:
//! the directory changes first, then the subscription, then the notices and
//! the roster snapshot, all under the membership guard.

use super::{AppState, ChatError};
use crate::bot::BotReply;
use crate::broadcast::Outbox;
use crate::protocol::ServerMessage;
use crate::types::User;
use tokio::task::JoinHandle;

impl AppState {
    /// Add a connection to a room, greet it and update everyone's roster
    pub async fn join_room(
        &self,
        id: &str,
        name: &str,
        room: &str,
        outbox: &Outbox,
    ) -> Result<User, ChatError> {
        let _guard = self.membership.lock().await;

        let user = self.directory.add_user(id, name, room).await?;
        self.broadcaster
            .subscribe(&user.room, &user.id, outbox.clone())
            .await;

        // Private welcome, straight to the joiner
        let _ = outbox.send(ServerMessage::admin(format!(
            "{}, welcome to room {}",
            user.name, user.room
        )));

        self.broadcaster
            .send_to_room_except(
                &user.room,
                &user.id,
                ServerMessage::admin(format!("{} has joined!", user.name)),
            )
            .await;

        self.push_roster(&user.room).await;

        tracing::info!("{} joined room {} ({})", user.name, user.room, user.id);
        Ok(user)
    }

    /// Remove a connection from its room. Unknown connections are a no-op.
    pub async fn leave_room(&self, id: &str) -> Option<User> {
        let _guard = self.membership.lock().await;

        let user = self.directory.remove_user(id).await?;
        self.broadcaster.unsubscribe(&user.room, &user.id).await;

        self.broadcaster
            .send_to_room(
                &user.room,
                ServerMessage::admin(format!("{} has left.", user.name)),
            )
            .await;

        self.push_roster(&user.room).await;

        tracing::info!("{} left room {} ({})", user.name, user.room, user.id);
        Some(user)
    }

    /// Echo a message to the sender's room and schedule the bot reply.
    ///
    /// The echo is delivered before this returns; the reply is detached.
    pub async fn post_message(
        &self,
        id: &str,
        text: String,
    ) -> Result<JoinHandle<BotReply>, ChatError> {
        let user = self
            .directory
            .get_user(id)
            .await
            .ok_or(ChatError::UserNotFound)?;

        self.broadcaster
            .send_to_room(&user.room, ServerMessage::message(&user.name, text.clone()))
            .await;

        Ok(self.bot.spawn_reply(user.room, user.name, text))
    }

    async fn push_roster(&self, room: &str) {
        let users = self.directory.users_in_room(room).await;
        self.broadcaster
            .send_to_room(
                room,
                ServerMessage::RoomData {
                    room: room.to_string(),
                    users,
                },
            )
            .await;
    }
}
