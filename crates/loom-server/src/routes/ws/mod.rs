//! WebSocket gateway.
//!
//! One socket belongs to exactly one workspace for its whole life. The
//! upgrade request names the workspace and optionally carries a token that
//! decides the socket's [`Access`](loom_types::Access).
//!
//! ## Module Structure
//!
//! - `protocol` - inbound message types
//! - `connection` - socket lifecycle and the outbound writer
//! - `handlers` - translation of client messages into workspace calls

mod connection;
mod handlers;
mod protocol;

use axum::{
    extract::{Query, State, ws::WebSocketUpgrade},
    http::{HeaderMap, header::AUTHORIZATION},
    response::Response,
};
use serde::Deserialize;

use crate::auth::{AccessRequest, bearer_token};
use crate::error::{Result, ServerError};
use crate::state::AppState;

pub use handlers::{ConnectionContext, handle_message};
pub use protocol::{ClientEnvelope, ClientMessage};

/// Query parameters accepted on the upgrade request.
#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    /// Workspace to join. Falls back to the server's default workspace.
    pub workspace: Option<String>,
    /// Token for clients that cannot set an `Authorization` header.
    pub token: Option<String>,
}

/// Pick the workspace a socket joins.
///
/// A server started with a default workspace serves only that workspace; a
/// request naming a different one is rejected. Without a default, the
/// request must name one.
fn select_workspace(requested: Option<String>, default: Option<&str>) -> Result<String> {
    let requested = requested.filter(|w| !w.is_empty());
    let workspace_id = match (requested, default) {
        (Some(requested), Some(default)) if requested != default => {
            return Err(ServerError::BadRequest(format!(
                "this runner serves workspace {}",
                default
            )));
        }
        (Some(requested), _) => requested,
        (None, Some(default)) => default.to_string(),
        (None, None) => {
            return Err(ServerError::BadRequest(
                "missing workspace parameter".to_string(),
            ));
        }
    };
    loom_session::validate_workspace_id(&workspace_id)?;
    Ok(workspace_id)
}

/// GET /ws - WebSocket upgrade handler.
///
/// The workspace id is validated before upgrading so a bad id fails with a
/// plain HTTP 400 instead of a socket that closes immediately.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Response> {
    let workspace_id = select_workspace(
        params.workspace,
        state.config().default_workspace.as_deref(),
    )?;

    let header_token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token)
        .map(str::to_string);
    let request = AccessRequest {
        workspace_id,
        token: header_token.or(params.token),
    };
    let access = state.access().resolve(&request);

    tracing::debug!(workspace_id = %request.workspace_id, ?access, "Upgrading websocket");

    let max_size = state.config().max_ws_message_size;
    Ok(ws
        .max_message_size(max_size)
        .on_upgrade(move |socket| {
            connection::handle_socket(socket, state, request.workspace_id, access)
        }))
}
