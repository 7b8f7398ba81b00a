//! Connection tracking, idle teardown and provisioning per workspace.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use loom_types::{Access, EventSender, SocketId};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::idle::IdleTimers;
use crate::provisioner::{Provisioner, TeardownReport};
use crate::workspace::{Workspace, WorkspaceFactory};

/// One active workspace and the sockets connected to it.
struct WorkspaceSession {
    workspace: Arc<Workspace>,
    sockets: HashSet<SocketId>,
    /// Compute has been ensured since the workspace was opened.
    provisioned: bool,
}

/// Gate held by an idle expiry from the moment the session is removed until
/// teardown has finished. Connects for the same workspace wait on it.
type ClosingGate = Arc<Mutex<()>>;

struct ManagerInner {
    config: SessionConfig,
    factory: Arc<dyn WorkspaceFactory>,
    provisioner: Option<Arc<Provisioner>>,
    sessions: Mutex<HashMap<String, WorkspaceSession>>,
    closing: parking_lot::Mutex<HashMap<String, ClosingGate>>,
    timers: IdleTimers,
}

/// Composes file sync and terminals under one workspace identity and
/// reclaims compute once nobody is connected.
#[derive(Clone)]
pub struct SessionLifecycleManager {
    inner: Arc<ManagerInner>,
}

impl std::fmt::Debug for SessionLifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLifecycleManager")
            .field("config", &self.inner.config)
            .field("timers", &self.inner.timers)
            .finish()
    }
}

impl SessionLifecycleManager {
    pub fn new(config: SessionConfig, factory: Arc<dyn WorkspaceFactory>) -> Self {
        Self::build(config, factory, None)
    }

    pub fn with_provisioner(
        config: SessionConfig,
        factory: Arc<dyn WorkspaceFactory>,
        provisioner: Arc<Provisioner>,
    ) -> Self {
        Self::build(config, factory, Some(provisioner))
    }

    fn build(
        config: SessionConfig,
        factory: Arc<dyn WorkspaceFactory>,
        provisioner: Option<Arc<Provisioner>>,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                config,
                factory,
                provisioner,
                sessions: Mutex::new(HashMap::new()),
                closing: parking_lot::Mutex::new(HashMap::new()),
                timers: IdleTimers::new(),
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Connections
    // ─────────────────────────────────────────────────────────────────────────

    /// Register `socket` with workspace `workspace_id`, opening the workspace
    /// on first use.
    ///
    /// Compute is ensured by the first socket with write access; read-only
    /// sockets can browse a workspace but never provision one. If the
    /// workspace is being torn down after an idle timeout, this waits for
    /// the teardown to finish and then opens it afresh.
    ///
    /// The socket joins the room, receives the run status (and scrollback if
    /// a run is live), then the root tree snapshot. Any pending idle timer is
    /// cancelled.
    pub async fn connect(
        &self,
        workspace_id: &str,
        socket: SocketId,
        access: Access,
        tx: EventSender,
    ) -> Result<Arc<Workspace>> {
        let mut sessions = self.inner.lock_open(workspace_id).await;
        let provision = access.can_write() && self.inner.provisions();

        match sessions.get_mut(workspace_id) {
            Some(session) => {
                if provision && !session.provisioned {
                    self.inner.ensure(workspace_id).await?;
                    session.provisioned = true;
                }
            }
            None => {
                if provision {
                    self.inner.ensure(workspace_id).await?;
                }
                let workspace = self.inner.factory.open(workspace_id).await?;
                sessions.insert(
                    workspace_id.to_string(),
                    WorkspaceSession {
                        workspace: Arc::new(workspace),
                        sockets: HashSet::new(),
                        provisioned: provision,
                    },
                );
            }
        }

        if self.inner.timers.cancel(workspace_id) {
            info!(workspace_id, "Reconnected before idle timeout");
        }

        let Some(session) = sessions.get_mut(workspace_id) else {
            return Err(SessionError::Workspace(format!(
                "session for {} vanished",
                workspace_id
            )));
        };
        session.sockets.insert(socket);
        let workspace = session.workspace.clone();
        let connections = session.sockets.len();

        workspace.terminals().attach(socket, tx.clone()).await;
        drop(sessions);

        match workspace.files().tree_snapshot().await {
            Ok(snapshot) => {
                let _ = tx.send(snapshot);
            }
            Err(e) => warn!(workspace_id, error = %e, "Failed to build tree snapshot"),
        }

        info!(workspace_id, socket_id = %socket, connections, "Socket connected");
        Ok(workspace)
    }

    /// Release everything `socket` held. The last socket out arms the idle
    /// timer.
    pub async fn disconnect(&self, workspace_id: &str, socket: SocketId) {
        let mut sessions = self.inner.sessions.lock().await;
        let Some(session) = sessions.get_mut(workspace_id) else {
            return;
        };
        if !session.sockets.remove(&socket) {
            return;
        }

        session.workspace.terminals().detach(socket).await;
        let remaining = session.sockets.len();
        info!(workspace_id, socket_id = %socket, remaining, "Socket disconnected");

        if remaining == 0 {
            self.arm_idle_timer(workspace_id);
        }
    }

    fn arm_idle_timer(&self, workspace_id: &str) {
        let inner: Weak<ManagerInner> = Arc::downgrade(&self.inner);
        let key = workspace_id.to_string();
        self.inner
            .timers
            .schedule(workspace_id, self.inner.config.idle_timeout, move || async move {
                if let Some(inner) = inner.upgrade() {
                    inner.expire(&key).await;
                }
            });
        debug!(
            workspace_id,
            timeout_secs = self.inner.config.idle_timeout.as_secs(),
            "Idle timer armed"
        );
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Introspection
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn workspace(&self, workspace_id: &str) -> Option<Arc<Workspace>> {
        self.inner
            .sessions
            .lock()
            .await
            .get(workspace_id)
            .map(|s| s.workspace.clone())
    }

    pub async fn connection_count(&self, workspace_id: &str) -> usize {
        self.inner
            .sessions
            .lock()
            .await
            .get(workspace_id)
            .map_or(0, |s| s.sockets.len())
    }

    pub async fn session_count(&self) -> usize {
        self.inner.sessions.lock().await.len()
    }

    pub fn idle_timer_pending(&self, workspace_id: &str) -> bool {
        self.inner.timers.is_scheduled(workspace_id)
    }

    /// Close every workspace without tearing down compute.
    pub async fn shutdown(&self) {
        self.inner.timers.cancel_all();
        let sessions: Vec<_> = self.inner.sessions.lock().await.drain().collect();
        for (_, session) in sessions {
            session.workspace.shutdown().await;
        }
    }
}

impl ManagerInner {
    fn provisions(&self) -> bool {
        self.config.provision_on_open && self.provisioner.is_some()
    }

    async fn ensure(&self, workspace_id: &str) -> Result<()> {
        if let Some(provisioner) = &self.provisioner {
            provisioner.ensure(workspace_id).await?;
        }
        Ok(())
    }

    /// Lock the session table once no idle teardown of `workspace_id` is in
    /// flight.
    async fn lock_open(
        &self,
        workspace_id: &str,
    ) -> tokio::sync::MutexGuard<'_, HashMap<String, WorkspaceSession>> {
        loop {
            let sessions = self.sessions.lock().await;
            let gate = self.closing.lock().get(workspace_id).cloned();
            let Some(gate) = gate else {
                return sessions;
            };
            drop(sessions);
            debug!(workspace_id, "Waiting for idle teardown to finish");

            let released = gate.lock().await;
            {
                // An expiry that never got to reopen leaves its gate behind.
                let mut closing = self.closing.lock();
                if closing
                    .get(workspace_id)
                    .is_some_and(|current| Arc::ptr_eq(current, &gate))
                {
                    closing.remove(workspace_id);
                }
            }
            drop(released);
        }
    }

    /// Idle timer callback. Does nothing if a socket reconnected meanwhile.
    async fn expire(&self, workspace_id: &str) {
        let gate: ClosingGate = Arc::new(Mutex::new(()));
        let closing = gate.clone().lock_owned().await;

        let session = {
            let mut sessions = self.sessions.lock().await;
            let idle = sessions
                .get(workspace_id)
                .is_some_and(|s| s.sockets.is_empty());
            if idle {
                self.closing.lock().insert(workspace_id.to_string(), gate);
                sessions.remove(workspace_id)
            } else {
                None
            }
        };
        let Some(session) = session else {
            debug!(workspace_id, "Idle timer fired for an active workspace");
            return;
        };

        info!(workspace_id, "Workspace idle, shutting down");
        session.workspace.shutdown().await;

        if let Err(e) = self.teardown(workspace_id).await {
            error!(workspace_id, error = %e, "Idle teardown failed");
        }
        self.reopen(workspace_id, closing);
    }

    /// Lift the closing gate so waiting connects can proceed.
    fn reopen(&self, workspace_id: &str, closing: OwnedMutexGuard<()>) {
        self.closing.lock().remove(workspace_id);
        drop(closing);
    }

    async fn teardown(&self, workspace_id: &str) -> Result<Option<TeardownReport>> {
        if !self.config.teardown_on_idle {
            return Ok(None);
        }
        match &self.provisioner {
            Some(provisioner) => Ok(Some(provisioner.teardown(workspace_id).await?)),
            None => Ok(None),
        }
    }
}
