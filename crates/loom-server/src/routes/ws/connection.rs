//! WebSocket connection lifecycle.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt, stream::SplitSink};
use loom_types::{Access, ServerEvent, SocketId, event_channel};

use super::handlers::{ConnectionContext, handle_message};
use super::protocol::ClientEnvelope;
use crate::state::AppState;

/// Handle a WebSocket connection for `workspace_id`.
///
/// Everything bound for the client, replies included, goes through the
/// socket's event channel and a single writer task, so replies and room
/// broadcasts are delivered in the order they were produced. Messages from
/// the client are processed one at a time.
pub async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    workspace_id: String,
    access: Access,
) {
    let socket_id = SocketId::new();
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = event_channel();

    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if send_message(&mut sender, &event).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    tracing::debug!(
        socket_id = %socket_id,
        workspace_id = %workspace_id,
        ?access,
        "WebSocket connection established"
    );

    let workspace = match state
        .sessions()
        .connect(&workspace_id, socket_id, access, tx.clone())
        .await
    {
        Ok(workspace) => workspace,
        Err(e) => {
            tracing::warn!(workspace_id = %workspace_id, error = %e, "Failed to open workspace");
            let _ = tx.send(ServerEvent::error("session_unavailable", e.to_string()));
            drop(tx);
            let _ = writer.await;
            return;
        }
    };

    let ctx = ConnectionContext {
        socket: socket_id,
        workspace,
        access,
        tx,
    };

    while let Some(msg) = receiver.next().await {
        // Binary frames are accepted when they carry UTF-8 JSON.
        let text = match msg {
            Ok(Message::Text(text)) => text.to_string(),
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    let _ = ctx.tx.send(ServerEvent::error(
                        "invalid_message",
                        "Binary data must be UTF-8",
                    ));
                    continue;
                }
            },
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::warn!(socket_id = %socket_id, "WebSocket error: {}", e);
                break;
            }
        };

        let envelope: ClientEnvelope = match serde_json::from_str(&text) {
            Ok(envelope) => envelope,
            Err(e) => {
                let _ = ctx.tx.send(ServerEvent::error(
                    "parse_error",
                    format!("Invalid message: {}", e),
                ));
                continue;
            }
        };

        if let Some(reply) = handle_message(envelope, &ctx).await
            && ctx.tx.send(reply).is_err()
        {
            break;
        }
    }

    state.sessions().disconnect(&workspace_id, socket_id).await;
    drop(ctx);
    writer.abort();

    tracing::debug!(socket_id = %socket_id, workspace_id = %workspace_id, "WebSocket connection closed");
}

/// Send a server event over the WebSocket.
async fn send_message(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
) -> Result<(), axum::Error> {
    let json = match serde_json::to_string(event) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!("Failed to serialize event: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(json.into())).await
}
