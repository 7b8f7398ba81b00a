//! WebSocket gateway for the Loom workspace runner.
//!
//! A thin transport layer: it upgrades `GET /ws?workspace=<id>` requests,
//! resolves each socket's access flag, and translates client messages into
//! calls on the workspace's file sync and terminal multiplexer. Workspace
//! lifetime (open, idle teardown) belongs to
//! [`loom_session::SessionLifecycleManager`].
//!
//! # Example
//!
//! ```rust,ignore
//! use loom_server::{AppState, Server, ServerConfig};
//!
//! let state = AppState::new(ServerConfig::default(), sessions);
//! Server::new(state).run().await?;
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use auth::{AccessRequest, AccessResolver, FixedAccess, StaticTokenResolver};
pub use config::{DEFAULT_MAX_WS_MESSAGE_SIZE, ServerConfig};
pub use error::{ErrorResponse, Result, ServerError};
pub use routes::{ClientEnvelope, ClientMessage, HealthResponse};
pub use state::AppState;

use std::future::Future;
use std::net::SocketAddr;

use axum::{Router, http::HeaderValue, routing::get};
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// The gateway server.
pub struct Server {
    state: AppState,
}

impl Server {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Build the router with all routes and layers.
    pub fn router(&self) -> Router {
        Router::new()
            .merge(routes::health_routes())
            .route("/ws", get(routes::ws_handler))
            .layer(self.cors_layer())
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    fn cors_layer(&self) -> CorsLayer {
        let origins = &self.state.config().cors_origins;
        if origins.is_empty() {
            return CorsLayer::permissive();
        }
        let allowed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| match origin.parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(origin = %origin, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        CorsLayer::new().allow_origin(AllowOrigin::list(allowed))
    }

    /// Run on the configured bind address until the process exits.
    pub async fn run(self) -> Result<()> {
        let addr = self.state.config().bind_address;
        self.run_on(addr).await
    }

    pub async fn run_on(self, addr: SocketAddr) -> Result<()> {
        let listener = bind(addr).await?;
        self.serve(listener, std::future::pending()).await
    }

    /// Serve on an already bound listener until `shutdown` resolves, then
    /// close every open workspace.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let router = self.router();
        if let Ok(addr) = listener.local_addr() {
            info!("Starting server on {}", addr);
        }

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| ServerError::Internal(format!("Server error: {}", e)))?;

        info!("Server stopped, closing workspaces");
        self.state.sessions().shutdown().await;
        Ok(())
    }

    pub fn bind_address(&self) -> SocketAddr {
        self.state.config().bind_address
    }
}

async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::Internal(format!("Failed to bind: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use loom_files::{MemoryObjectStore, ObjectStore};
    use loom_session::{LocalWorkspaceFactory, SessionConfig, SessionLifecycleManager};
    use tower::ServiceExt;

    fn test_server(config: ServerConfig) -> (Server, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
        let factory = LocalWorkspaceFactory::new(dir.path(), store).with_watcher(None);
        let sessions = SessionLifecycleManager::new(SessionConfig::default(), Arc::new(factory));
        (Server::new(AppState::new(config, sessions)), dir)
    }

    #[tokio::test]
    async fn test_server_health_endpoint() {
        let (server, _dir) = test_server(ServerConfig::default());

        let response = server
            .router()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_bind_address_from_config() {
        let config = ServerConfig::default().with_bind_address("0.0.0.0:9000".parse().unwrap());
        let (server, _dir) = test_server(config);
        assert_eq!(server.bind_address().port(), 9000);
    }
}
