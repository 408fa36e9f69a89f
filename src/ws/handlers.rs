//! WebSocket message dispatch
//!
//! Maps each client frame onto a state operation and builds its
//! acknowledgment. Everything else a client sees goes through its outbox.

use crate::broadcast::Outbox;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::state::{AppState, ChatError};
use std::sync::Arc;

fn ack(id: Option<u64>, result: Result<(), ChatError>) -> ServerMessage {
    ServerMessage::Ack {
        ack: id,
        error: result.err().map(|e| e.to_string()),
    }
}

/// Handle one client message for connection `conn_id` and return its ack
pub async fn handle_message(
    msg: ClientMessage,
    conn_id: &str,
    outbox: &Outbox,
    state: &Arc<AppState>,
) -> ServerMessage {
    let ack_id = msg.ack_id();

    let result = match msg {
        ClientMessage::Join { name, room, .. } => {
            tracing::info!("Join request from {}: name={:?} room={:?}", conn_id, name, room);
            match state.join_room(conn_id, &name, &room, outbox).await {
                Ok(_) => Ok(()),
                Err(e) => {
                    tracing::info!("Join rejected for {}: {}", conn_id, e);
                    Err(e)
                }
            }
        }

        ClientMessage::SendMessage { text, .. } => {
            // The reply task is detached; the ack never waits on it
            state.post_message(conn_id, text).await.map(|_reply| ())
        }

        ClientMessage::Leave { .. } => state
            .leave_room(conn_id)
            .await
            .map(|_| ())
            .ok_or(ChatError::UserNotFound),
    };

    ack(ack_id, result)
}

/// Transport-level disconnect; a no-op for connections that never joined
pub async fn handle_disconnect(conn_id: &str, state: &Arc<AppState>) {
    if state.leave_room(conn_id).await.is_none() {
        tracing::debug!("Disconnect of {} without a room", conn_id);
    }
}
