//! Configuration types mapping to the TOML schema.
//!
//! ```toml
//! [server]      # gateway bind address and auth
//! [workspace]   # which workspace this runner serves, and where on disk
//! [storage]     # object-store backend
//! [compute]     # orchestration API and idle teardown
//! [terminal]    # PTY defaults
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, Result};

pub mod defaults {
    pub const PORT: u16 = 3001;
    pub const BIND: &str = "0.0.0.0";
    pub const MAX_WS_MESSAGE_SIZE: usize = 8 * 1024 * 1024;
    pub const STORAGE_PREFIX: &str = "code";
    pub const NAMESPACE: &str = "default";
    pub const CONTAINER_PORT: u16 = 3001;
    pub const IDLE_TIMEOUT_SECS: u64 = 30 * 60;
    pub const SHELL: &str = "/bin/bash";
    pub const SCROLLBACK_BYTES: usize = 256 * 1024;
    pub const ROWS: u16 = 24;
    pub const COLS: u16 = 80;
    pub const DEBOUNCE_MS: u64 = 500;
    pub const WORKSPACE_ROOT: &str = "/workspace";

    /// Environment variable consulted when `compute.token` is unset.
    pub const COMPUTE_TOKEN_ENV: &str = "LOOM_COMPUTE_TOKEN";
}

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so that partial configs (e.g. a project-local
/// override of just `[server]`) can be loaded and merged. Use the accessor
/// methods to read a section with defaults filled in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoomConfig {
    pub server: Option<ServerConfig>,
    pub workspace: Option<WorkspaceConfig>,
    pub storage: Option<StorageConfig>,
    pub compute: Option<ComputeConfig>,
    pub terminal: Option<TerminalConfig>,
}

impl LoomConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    ///
    /// Merging is per section: a section present in `other` replaces ours
    /// wholesale.
    pub fn merge(&mut self, other: LoomConfig) {
        if other.server.is_some() {
            self.server = other.server;
        }
        if other.workspace.is_some() {
            self.workspace = other.workspace;
        }
        if other.storage.is_some() {
            self.storage = other.storage;
        }
        if other.compute.is_some() {
            self.compute = other.compute;
        }
        if other.terminal.is_some() {
            self.terminal = other.terminal;
        }
    }

    /// Fill every missing section with its defaults.
    pub fn effective(&self) -> LoomConfig {
        LoomConfig {
            server: Some(self.server()),
            workspace: Some(self.workspace()),
            storage: Some(self.storage()),
            compute: Some(self.compute()),
            terminal: Some(self.terminal()),
        }
    }

    pub fn server(&self) -> ServerConfig {
        self.server.clone().unwrap_or_default()
    }

    pub fn workspace(&self) -> WorkspaceConfig {
        self.workspace.clone().unwrap_or_default()
    }

    pub fn storage(&self) -> StorageConfig {
        self.storage.clone().unwrap_or_default()
    }

    pub fn compute(&self) -> ComputeConfig {
        self.compute.clone().unwrap_or_default()
    }

    pub fn terminal(&self) -> TerminalConfig {
        self.terminal.clone().unwrap_or_default()
    }

    /// Check cross-field requirements that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let storage = self.storage();
        if storage.backend == StorageBackend::Local && storage.path.is_none() {
            return Err(ConfigError::MissingField {
                field: "path".to_string(),
                context: "[storage] with backend = \"local\"".to_string(),
            });
        }

        let compute = self.compute();
        if compute.enabled {
            if compute.api_url.is_none() {
                return Err(ConfigError::MissingField {
                    field: "api_url".to_string(),
                    context: "[compute]".to_string(),
                });
            }
            if compute.image.is_empty() {
                return Err(ConfigError::MissingField {
                    field: "image".to_string(),
                    context: "[compute]".to_string(),
                });
            }
        }
        if compute.idle_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "compute.idle_timeout_secs".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        let terminal = self.terminal();
        if terminal.rows == 0 || terminal.cols == 0 {
            return Err(ConfigError::InvalidValue {
                field: "terminal.rows/cols".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Server
// ─────────────────────────────────────────────────────────────────────────────

/// Websocket gateway settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Largest accepted websocket frame, in bytes.
    pub max_ws_message_size: usize,
    /// Token granting write access. Unset means every socket may write.
    pub auth_token: Option<String>,
    /// Allowed CORS origins. Empty allows any origin.
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: defaults::BIND.to_string(),
            port: defaults::PORT,
            max_ws_message_size: defaults::MAX_WS_MESSAGE_SIZE,
            auth_token: None,
            cors_origins: Vec::new(),
        }
    }
}

impl ServerConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Workspace
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Workspace served by default when a client does not name one.
    pub id: Option<String>,
    /// Directory under which each workspace gets `<root>/<id>`.
    pub root: PathBuf,
    /// Extra directory names the watcher skips.
    pub ignore: Vec<String>,
    pub watch: bool,
    pub debounce_ms: u64,
    /// Download the stored tree onto disk when a workspace opens.
    pub restore: bool,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            id: None,
            root: PathBuf::from(defaults::WORKSPACE_ROOT),
            ignore: Vec::new(),
            watch: true,
            debounce_ms: defaults::DEBOUNCE_MS,
            restore: true,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Storage
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process-local; contents vanish on exit.
    #[default]
    Memory,
    /// A directory standing in for a bucket.
    Local,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Base directory for the `local` backend.
    pub path: Option<PathBuf>,
    /// Key prefix above the workspace id.
    pub prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            path: None,
            prefix: defaults::STORAGE_PREFIX.to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Compute
// ─────────────────────────────────────────────────────────────────────────────

/// Orchestration API access and idle teardown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputeConfig {
    /// Provision on open and tear down on idle. Off for local development.
    pub enabled: bool,
    pub api_url: Option<String>,
    pub namespace: String,
    /// Bearer token. Falls back to `LOOM_COMPUTE_TOKEN`.
    pub token: Option<String>,
    pub image: String,
    /// Ingress host suffix: workspaces are served at `<id>.<domain>`.
    pub domain: String,
    pub container_port: u16,
    pub idle_timeout_secs: u64,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_url: None,
            namespace: defaults::NAMESPACE.to_string(),
            token: None,
            image: String::new(),
            domain: "localhost".to_string(),
            container_port: defaults::CONTAINER_PORT,
            idle_timeout_secs: defaults::IDLE_TIMEOUT_SECS,
        }
    }
}

impl ComputeConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Config value first, then the environment.
    pub fn resolve_token(&self) -> Option<String> {
        self.token
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| {
                std::env::var(defaults::COMPUTE_TOKEN_ENV)
                    .ok()
                    .filter(|t| !t.is_empty())
            })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Terminal
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    /// Program started for each private shell.
    pub shell: String,
    /// Run output kept for late joiners, in bytes.
    pub scrollback_bytes: usize,
    pub rows: u16,
    pub cols: u16,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            shell: defaults::SHELL.to_string(),
            scrollback_bytes: defaults::SCROLLBACK_BYTES,
            rows: defaults::ROWS,
            cols: defaults::COLS,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
