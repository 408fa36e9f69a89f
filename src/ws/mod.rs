pub mod handlers;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{
    sink::{Sink, SinkExt},
    stream::StreamExt,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::broadcast::Outbox;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::state::AppState;
use crate::types::new_connection_id;

/// How long a closing connection may take to flush its queued frames
const WRITER_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Drain a connection's outbox into its socket until the outbox closes or
/// the socket stops accepting frames
async fn write_frames<S>(
    mut sink: S,
    mut frames: mpsc::UnboundedReceiver<ServerMessage>,
    conn_id: String,
) where
    S: Sink<Message> + Unpin,
{
    while let Some(msg) = frames.recv().await {
        let json = match serde_json::to_string(&msg) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!("Failed to serialize message for {}: {}", conn_id, e);
                continue;
            }
        };
        if sink.send(Message::Text(json.into())).await.is_err() {
            break;
        }
    }
}

/// Close the outbox and let the writer deliver what is already queued.
///
/// The writer only ends once every sender is gone, so the connection must be
/// unsubscribed from its room before this is called.
async fn flush_writer(outbox: Outbox, mut writer: JoinHandle<()>, conn_id: &str) {
    drop(outbox);
    if tokio::time::timeout(WRITER_FLUSH_TIMEOUT, &mut writer)
        .await
        .is_err()
    {
        tracing::warn!("Writer for {} did not flush in time", conn_id);
        writer.abort();
    }
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let conn_id = new_connection_id();
    let (sender, mut receiver) = socket.split();
    tracing::info!("New connection: {}", conn_id);

    // Every frame for this connection goes through one queue so notices,
    // room broadcasts and acks arrive in the order they were produced
    let (outbox, outbox_rx) = mpsc::unbounded_channel::<ServerMessage>();
    let mut writer = tokio::spawn(write_frames(sender, outbox_rx, conn_id.clone()));
    let mut writer_finished = false;

    loop {
        tokio::select! {
            // Writer ends when the socket can no longer be written to
            _ = &mut writer => {
                writer_finished = true;
                break;
            }

            ws_msg = receiver.next() => {
                match ws_msg {
                    Some(Ok(Message::Text(text))) => {
                        tracing::debug!("Received message from {}: {}", conn_id, text);

                        let response = match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(client_msg) => {
                                handlers::handle_message(client_msg, &conn_id, &outbox, &state).await
                            }
                            Err(e) => {
                                tracing::warn!("Failed to parse client message: {}", e);
                                ServerMessage::Error {
                                    code: "PARSE_ERROR".to_string(),
                                    msg: format!("Invalid message format: {}", e),
                                }
                            }
                        };
                        if outbox.send(response).is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        tracing::debug!("Close frame from {}", conn_id);
                        break;
                    }
                    // Pings are answered by axum
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!("WebSocket error on {}: {}", conn_id, e);
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    handlers::handle_disconnect(&conn_id, &state).await;
    if !writer_finished {
        flush_writer(outbox, writer, &conn_id).await;
    }

    tracing::info!("Connection closed: {}", conn_id);
}
