//! Serve command - runs the websocket gateway.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result, bail};
use clap::Args;
use tokio::net::TcpListener;
use tracing::info;

use loom_config::{LoomConfig, StorageBackend};
use loom_files::{LocalObjectStore, MemoryObjectStore, ObjectStore, WatcherConfig};
use loom_server::{AppState, Server, ServerConfig};
use loom_session::{LocalWorkspaceFactory, SessionConfig, SessionLifecycleManager};
use loom_terminal::TerminalConfig;

use super::{Context, build_provisioner};

/// Arguments for the serve command.
///
/// CLI arguments override config file values.
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Port to listen on (overrides config)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Address to bind to (overrides config)
    #[arg(short, long)]
    pub bind: Option<String>,

    /// Default workspace for sockets that do not name one
    #[arg(long, env = "WORKSPACE_ID")]
    pub workspace: Option<String>,

    /// Directory holding workspace trees (overrides config)
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Token granting write access (or set LOOM_AUTH_TOKEN env var)
    #[arg(long, env = "LOOM_AUTH_TOKEN")]
    pub token: Option<String>,

    /// Disable the filesystem watcher
    #[arg(long)]
    pub no_watch: bool,
}

/// Run the serve command.
pub async fn run(args: ServeArgs, ctx: &Context) -> Result<()> {
    let loaded = ctx.load_config()?;
    let config = apply_overrides(loaded.config, &args);
    config.validate()?;

    let server_cfg = config.server();
    let workspace_cfg = config.workspace();
    let storage_cfg = config.storage();
    let compute_cfg = config.compute();
    let terminal_cfg = config.terminal();

    let addr: SocketAddr = server_cfg
        .addr()
        .parse()
        .with_context(|| format!("invalid bind address '{}'", server_cfg.addr()))?;

    // ── Object store ────────────────────────────────────────────────────

    let store: Arc<dyn ObjectStore> = match storage_cfg.backend {
        StorageBackend::Memory => Arc::new(MemoryObjectStore::new()),
        StorageBackend::Local => {
            let Some(path) = storage_cfg.path.clone() else {
                bail!("storage.path is required for the local backend");
            };
            std::fs::create_dir_all(&path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            Arc::new(LocalObjectStore::new(path))
        }
    };

    // ── Workspaces ──────────────────────────────────────────────────────

    let terminal = TerminalConfig::default()
        .with_shell(&terminal_cfg.shell)
        .with_scrollback_bytes(terminal_cfg.scrollback_bytes)
        .with_size(terminal_cfg.rows, terminal_cfg.cols);
    let watcher = workspace_cfg.watch.then(|| WatcherConfig {
        debounce_ms: workspace_cfg.debounce_ms,
        ignore: workspace_cfg.ignore.clone(),
        ..WatcherConfig::default()
    });

    std::fs::create_dir_all(&workspace_cfg.root)
        .with_context(|| format!("failed to create {}", workspace_cfg.root.display()))?;
    let factory = LocalWorkspaceFactory::new(&workspace_cfg.root, store)
        .with_storage_prefix(&storage_cfg.prefix)
        .with_terminal_config(terminal)
        .with_watcher(watcher)
        .with_restore(workspace_cfg.restore);

    // ── Session lifecycle ───────────────────────────────────────────────

    let session_config = SessionConfig::default()
        .with_idle_timeout(compute_cfg.idle_timeout())
        .with_provision_on_open(compute_cfg.enabled)
        .with_teardown_on_idle(compute_cfg.enabled);
    let sessions = if compute_cfg.enabled {
        let provisioner = build_provisioner(&compute_cfg)?;
        SessionLifecycleManager::with_provisioner(
            session_config,
            Arc::new(factory),
            Arc::new(provisioner),
        )
    } else {
        SessionLifecycleManager::new(session_config, Arc::new(factory))
    };

    // ── Server ──────────────────────────────────────────────────────────

    let mut server_config = ServerConfig::new(server_cfg.auth_token.clone())
        .with_bind_address(addr)
        .with_max_ws_message_size(server_cfg.max_ws_message_size)
        .with_cors_origins(server_cfg.cors_origins.clone());
    if let Some(id) = &workspace_cfg.id {
        server_config = server_config.with_default_workspace(id);
    }

    if ctx.verbose {
        println!("Bind address: {}", addr);
        println!("Workspace root: {}", workspace_cfg.root.display());
        println!("Storage: {:?} (prefix '{}')", storage_cfg.backend, storage_cfg.prefix);
        println!(
            "Compute: {}",
            if compute_cfg.enabled { "enabled" } else { "disabled" }
        );
        match &server_config.auth_token {
            Some(_) => println!("Auth: token required for write access"),
            None => println!("Auth: disabled (every socket may write)"),
        }
    }

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(%addr, "Loom gateway listening");

    let server = Server::new(AppState::new(server_config, sessions));
    server.serve(listener, shutdown_signal()).await?;
    Ok(())
}

/// Fold CLI flags into the loaded config.
fn apply_overrides(mut config: LoomConfig, args: &ServeArgs) -> LoomConfig {
    let mut server = config.server();
    if let Some(port) = args.port {
        server.port = port;
    }
    if let Some(bind) = &args.bind {
        server.bind = bind.clone();
    }
    if let Some(token) = &args.token {
        server.auth_token = Some(token.clone());
    }
    config.server = Some(server);

    let mut workspace = config.workspace();
    if let Some(id) = &args.workspace {
        workspace.id = Some(id.clone());
    }
    if let Some(root) = &args.root {
        workspace.root = root.clone();
    }
    if args.no_watch {
        workspace.watch = false;
    }
    config.workspace = Some(workspace);

    config
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
