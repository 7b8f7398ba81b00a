//! Common test utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use futures::{SinkExt, StreamExt};
use reqwest::Client;
use serde_json::Value;
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use loom_files::{MemoryObjectStore, ObjectStore};
use loom_server::{AppState, Server, ServerConfig};
use loom_session::{LocalWorkspaceFactory, Provisioner, SessionConfig, SessionLifecycleManager};

/// A test server that runs in the background.
pub struct TestServer {
    /// The server's address.
    pub addr: SocketAddr,
    /// HTTP client configured for this server.
    pub client: Client,
    /// Shared object store backing every workspace.
    pub store: Arc<MemoryObjectStore>,
    /// Handle to the server task.
    _handle: JoinHandle<()>,
    /// Workspace directories live here.
    pub temp_dir: TempDir,
}

impl TestServer {
    /// Start a server where every socket may write.
    pub async fn start() -> Result<Self> {
        Self::start_with_token(None).await
    }

    /// Start a server that only grants write access to `token` holders.
    pub async fn start_with_token(token: Option<&str>) -> Result<Self> {
        Self::start_with(ServerConfig::new(token.map(str::to_string)), None).await
    }

    /// Start a server that provisions compute through `provisioner` when a
    /// workspace is first opened by a socket with write access.
    pub async fn start_with_provisioner(
        token: Option<&str>,
        provisioner: Arc<Provisioner>,
    ) -> Result<Self> {
        Self::start_with(ServerConfig::new(token.map(str::to_string)), Some(provisioner)).await
    }

    /// Start a server that only serves `workspace`.
    pub async fn start_pinned(workspace: &str) -> Result<Self> {
        Self::start_with(ServerConfig::new(None).with_default_workspace(workspace), None).await
    }

    async fn start_with(config: ServerConfig, provisioner: Option<Arc<Provisioner>>) -> Result<Self> {
        let temp_dir = TempDir::new()?;
        let addr = find_available_port().await?;

        let store = Arc::new(MemoryObjectStore::new());
        let shared: Arc<dyn ObjectStore> = store.clone();
        let factory = LocalWorkspaceFactory::new(temp_dir.path(), shared).with_watcher(None);
        let sessions = match provisioner {
            Some(provisioner) => SessionLifecycleManager::with_provisioner(
                SessionConfig::default(),
                Arc::new(factory),
                provisioner,
            ),
            None => SessionLifecycleManager::new(SessionConfig::default(), Arc::new(factory)),
        };

        let config = config.with_bind_address(addr);
        let server = Server::new(AppState::new(config, sessions));
        let handle = tokio::spawn(async move {
            let _ = server.run_on(addr).await;
        });

        let client = Client::new();
        wait_for_server(&client, addr).await?;

        Ok(Self {
            addr,
            client,
            store,
            _handle: handle,
            temp_dir,
        })
    }

    /// Get the base URL for the server.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// WebSocket URL for `query` (e.g. `workspace=demo`).
    pub fn ws_url(&self, query: &str) -> String {
        format!("ws://{}/ws?{}", self.addr, query)
    }

    /// Open a socket on `workspace` and consume the connect preamble.
    pub async fn connect(&self, workspace: &str) -> Result<WsClient> {
        self.connect_with(&format!("workspace={}", workspace)).await
    }

    pub async fn connect_with(&self, query: &str) -> Result<WsClient> {
        let mut client = self.connect_raw(query).await?;
        client.expect_type("process:status").await?;
        client.expect_type("tree-snapshot").await?;
        Ok(client)
    }

    /// Open a socket without reading anything from it.
    pub async fn connect_raw(&self, query: &str) -> Result<WsClient> {
        let (stream, _) = connect_async(self.ws_url(query)).await?;
        Ok(WsClient { stream })
    }

    /// Check if server is healthy.
    pub async fn health(&self) -> Result<bool> {
        let resp = self
            .client
            .get(format!("{}/health", self.base_url()))
            .send()
            .await?;
        Ok(resp.status().is_success())
    }
}

/// A connected websocket speaking JSON.
pub struct WsClient {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsClient {
    pub async fn send(&mut self, message: Value) -> Result<()> {
        self.stream
            .send(Message::Text(message.to_string().into()))
            .await?;
        Ok(())
    }

    /// Next JSON event, failing after two seconds.
    pub async fn recv(&mut self) -> Result<Value> {
        loop {
            let frame = timeout(Duration::from_secs(2), self.stream.next())
                .await
                .map_err(|_| anyhow!("timed out waiting for an event"))?
                .ok_or_else(|| anyhow!("socket closed"))??;
            match frame {
                Message::Text(text) => return Ok(serde_json::from_str(text.as_str())?),
                Message::Close(_) => return Err(anyhow!("socket closed")),
                _ => continue,
            }
        }
    }

    /// Read until an event of `kind` arrives.
    pub async fn expect_type(&mut self, kind: &str) -> Result<Value> {
        loop {
            let event = self.recv().await?;
            if event["type"] == kind {
                return Ok(event);
            }
        }
    }

    /// Assert nothing arrives within `window`.
    pub async fn expect_silence(&mut self, window: Duration) -> Result<()> {
        match timeout(window, self.stream.next()).await {
            Err(_) => Ok(()),
            Ok(frame) => Err(anyhow!("unexpected frame: {:?}", frame)),
        }
    }

    pub async fn close(mut self) -> Result<()> {
        self.stream.close(None).await?;
        Ok(())
    }
}

/// Find an available port for testing.
async fn find_available_port() -> Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(addr)
}

/// Wait for the server to become ready.
async fn wait_for_server(client: &Client, addr: SocketAddr) -> Result<()> {
    let url = format!("http://{}/health", addr);

    let result = timeout(Duration::from_secs(5), async {
        loop {
            match client.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                _ => tokio::time::sleep(Duration::from_millis(50)).await,
            }
        }
    })
    .await;

    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e),
        Err(_) => anyhow::bail!("Timeout waiting for server to start"),
    }
}
