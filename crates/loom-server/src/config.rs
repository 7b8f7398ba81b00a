//! Server configuration.

use std::net::SocketAddr;

/// Default max message size for WebSocket (8 MB, file contents travel inline).
pub const DEFAULT_MAX_WS_MESSAGE_SIZE: usize = 8 * 1024 * 1024;

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to.
    pub bind_address: SocketAddr,

    /// Token granting write access. `None` means every socket may write.
    pub auth_token: Option<String>,

    /// Maximum WebSocket message size in bytes.
    pub max_ws_message_size: usize,

    /// CORS allowed origins (empty = any origin).
    pub cors_origins: Vec<String>,

    /// Workspace used when the upgrade request does not name one.
    pub default_workspace: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 3001)),
            auth_token: None,
            max_ws_message_size: DEFAULT_MAX_WS_MESSAGE_SIZE,
            cors_origins: Vec::new(),
            default_workspace: None,
        }
    }
}

impl ServerConfig {
    pub fn new(auth_token: Option<String>) -> Self {
        Self {
            auth_token,
            ..Self::default()
        }
    }

    pub fn with_bind_address(mut self, addr: SocketAddr) -> Self {
        self.bind_address = addr;
        self
    }

    pub fn with_max_ws_message_size(mut self, size: usize) -> Self {
        self.max_ws_message_size = size;
        self
    }

    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = origins;
        self
    }

    pub fn with_default_workspace(mut self, workspace: impl Into<String>) -> Self {
        self.default_workspace = Some(workspace.into());
        self
    }
}
