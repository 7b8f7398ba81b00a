//! Translation of client messages into workspace calls.

use std::sync::Arc;

use loom_session::Workspace;
use loom_terminal::{DEFAULT_PROBE_TIMEOUT, TerminalError, check_port};
use loom_types::{Access, EventSender, OpResult, ServerEvent, SocketId};
use serde_json::{Value, json};
use tracing::debug;

use super::protocol::{ClientEnvelope, ClientMessage};

/// Everything a handler needs to know about the socket it serves.
#[derive(Clone)]
pub struct ConnectionContext {
    pub socket: SocketId,
    pub workspace: Arc<Workspace>,
    pub access: Access,
    /// The socket's own outbound channel.
    pub tx: EventSender,
}

/// A failed request, reported to the client as an `error` event.
#[derive(Debug)]
struct Failure {
    code: &'static str,
    message: String,
}

impl Failure {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<TerminalError> for Failure {
    fn from(e: TerminalError) -> Self {
        let code = match &e {
            TerminalError::UnsupportedLanguage(_) => "unsupported_language",
            TerminalError::NoTerminal => "no_terminal",
            TerminalError::InvalidEntry(_) => "invalid_entry",
            TerminalError::Pty(_) | TerminalError::Io(_) => "terminal_error",
        };
        Self::new(code, e.to_string())
    }
}

fn op_result(result: OpResult) -> Value {
    serde_json::to_value(result).unwrap_or(Value::Null)
}

/// Handle one client message.
///
/// Returns the event to send back, if any. Successful requests are answered
/// with a `response` event carrying the request id; failures become `error`
/// events. CRUD operations report their own failures in-band as
/// `{success, error}`.
pub async fn handle_message(
    envelope: ClientEnvelope,
    ctx: &ConnectionContext,
) -> Option<ServerEvent> {
    let ClientEnvelope { id, message } = envelope;

    if message.requires_write() && !ctx.access.can_write() {
        debug!(socket_id = %ctx.socket, message = message.name(), "Rejected write from read-only socket");
        return Some(ServerEvent::error(
            "forbidden",
            format!("{} requires write access", message.name()),
        ));
    }

    match dispatch(message, ctx).await {
        Ok(None) => None,
        Ok(Some(body)) => Some(ServerEvent::Response {
            request_id: id,
            body,
        }),
        Err(failure) => Some(ServerEvent::error(failure.code, failure.message)),
    }
}

async fn dispatch(
    message: ClientMessage,
    ctx: &ConnectionContext,
) -> Result<Option<Value>, Failure> {
    let files = ctx.workspace.files();
    let terminals = ctx.workspace.terminals();
    let origin = Some(ctx.socket);

    let body = match message {
        ClientMessage::FetchDir { path } => {
            let nodes = files
                .fetch_directory(&path)
                .await
                .map_err(|e| Failure::new("fetch_failed", e.to_string()))?;
            json!({ "path": path, "nodes": nodes })
        }
        ClientMessage::FetchContent { path } => {
            let content = files
                .fetch_file_content(&path)
                .await
                .map_err(|e| Failure::new("fetch_failed", e.to_string()))?;
            json!({ "path": path, "content": content })
        }
        ClientMessage::CreateItem {
            path,
            kind,
            content,
        } => op_result(
            files
                .create_item(&path, kind, content.as_deref(), origin)
                .await,
        ),
        ClientMessage::DeleteItem { path, kind } => {
            json!({ "success": files.delete_item(&path, kind, origin).await })
        }
        ClientMessage::RenameItem {
            old_path,
            new_path,
            kind,
        } => op_result(files.rename_item(&old_path, &new_path, kind, origin).await),
        ClientMessage::UpdateContent { path, content } => {
            op_result(match files.update_content(&path, &content, origin).await {
                Ok(()) => OpResult::ok(),
                Err(e) => OpResult::failed(e.to_string()),
            })
        }
        ClientMessage::RequestTerminal => {
            terminals
                .request_terminal(ctx.socket, ctx.tx.clone())
                .await?;
            op_result(OpResult::ok())
        }
        ClientMessage::TerminalData { data } => {
            terminals.terminal_data(ctx.socket, data.as_bytes())?;
            return Ok(None);
        }
        ClientMessage::ResizeTerminal { cols, rows } => {
            terminals.resize(ctx.socket, rows, cols)?;
            op_result(OpResult::ok())
        }
        ClientMessage::ProcessRun { language, path } => {
            terminals.process_run(&language, path.as_deref()).await?;
            op_result(OpResult::ok())
        }
        ClientMessage::ProcessStop => {
            json!({ "stopped": terminals.process_stop().await })
        }
        ClientMessage::CheckPort { port } => {
            serde_json::to_value(check_port(port, DEFAULT_PROBE_TIMEOUT).await)
                .unwrap_or(Value::Null)
        }
        ClientMessage::Ping => json!({ "pong": true }),
    };
    Ok(Some(body))
}
