//! Shared application state.

use std::sync::Arc;

use loom_session::SessionLifecycleManager;

use crate::auth::{AccessResolver, StaticTokenResolver};
use crate::config::ServerConfig;

/// State handed to every route.
#[derive(Clone)]
pub struct AppState {
    config: Arc<ServerConfig>,
    sessions: SessionLifecycleManager,
    access: Arc<dyn AccessResolver>,
}

impl AppState {
    /// Access is resolved against `config.auth_token`.
    pub fn new(config: ServerConfig, sessions: SessionLifecycleManager) -> Self {
        let access = Arc::new(StaticTokenResolver::new(config.auth_token.clone()));
        Self {
            config: Arc::new(config),
            sessions,
            access,
        }
    }

    pub fn with_access_resolver(mut self, access: Arc<dyn AccessResolver>) -> Self {
        self.access = access;
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionLifecycleManager {
        &self.sessions
    }

    pub fn access(&self) -> &dyn AccessResolver {
        self.access.as_ref()
    }
}
