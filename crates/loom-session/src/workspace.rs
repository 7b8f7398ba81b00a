//! One open workspace: its room, file sync, terminals and watcher.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use loom_files::{
    ObjectStore, ObjectStoreMirror, WatcherConfig, WatcherHandle, WorkspaceFileSync,
    WorkspaceWatcher, spawn_propagation,
};
use loom_terminal::{TerminalConfig, TerminalMultiplexer};
use loom_types::Room;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::{Result, SessionError};

/// Object-store prefix under which workspaces live (`code/{id}/...`).
pub const DEFAULT_STORAGE_PREFIX: &str = "code";

/// The file and terminal state of one workspace, sharing one room.
pub struct Workspace {
    id: String,
    room: Arc<Room>,
    files: Arc<WorkspaceFileSync>,
    terminals: Arc<TerminalMultiplexer>,
    watcher: Mutex<Option<WatcherHandle>>,
    propagation: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("id", &self.id)
            .field("sockets", &self.room.len())
            .finish()
    }
}

impl Workspace {
    pub fn new(
        id: impl Into<String>,
        room: Arc<Room>,
        files: Arc<WorkspaceFileSync>,
        terminals: Arc<TerminalMultiplexer>,
    ) -> Self {
        Self {
            id: id.into(),
            room,
            files,
            terminals,
            watcher: Mutex::new(None),
            propagation: Mutex::new(None),
        }
    }

    /// Attach a running watcher and its propagation task; both stop on
    /// [`shutdown`](Self::shutdown).
    pub fn with_watcher(self, handle: WatcherHandle, propagation: JoinHandle<()>) -> Self {
        *self.watcher.lock() = Some(handle);
        *self.propagation.lock() = Some(propagation);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn room(&self) -> &Arc<Room> {
        &self.room
    }

    pub fn files(&self) -> &Arc<WorkspaceFileSync> {
        &self.files
    }

    pub fn terminals(&self) -> &Arc<TerminalMultiplexer> {
        &self.terminals
    }

    pub fn is_watching(&self) -> bool {
        self.watcher.lock().as_ref().is_some_and(WatcherHandle::is_running)
    }

    /// Stop the watcher and kill every PTY.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.watcher.lock().take() {
            handle.stop();
        }
        if let Some(task) = self.propagation.lock().take() {
            task.abort();
        }
        self.terminals.shutdown().await;
        info!(workspace_id = %self.id, "Workspace closed");
    }
}

/// Opens workspaces on demand.
#[async_trait]
pub trait WorkspaceFactory: Send + Sync {
    async fn open(&self, workspace_id: &str) -> Result<Workspace>;
}

/// Workspaces rooted at `<root_dir>/<id>` on local disk, mirrored into an
/// object store.
pub struct LocalWorkspaceFactory {
    root_dir: PathBuf,
    store: Arc<dyn ObjectStore>,
    storage_prefix: String,
    terminal: TerminalConfig,
    watcher: Option<WatcherConfig>,
    restore: bool,
}

impl LocalWorkspaceFactory {
    pub fn new(root_dir: impl Into<PathBuf>, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            root_dir: root_dir.into(),
            store,
            storage_prefix: DEFAULT_STORAGE_PREFIX.to_string(),
            terminal: TerminalConfig::default(),
            watcher: Some(WatcherConfig::default()),
            restore: true,
        }
    }

    pub fn with_storage_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.storage_prefix = prefix.into();
        self
    }

    pub fn with_terminal_config(mut self, config: TerminalConfig) -> Self {
        self.terminal = config;
        self
    }

    /// `None` disables the filesystem watcher.
    pub fn with_watcher(mut self, config: Option<WatcherConfig>) -> Self {
        self.watcher = config;
        self
    }

    /// Download the stored tree onto disk when a workspace is opened.
    pub fn with_restore(mut self, restore: bool) -> Self {
        self.restore = restore;
        self
    }

    pub fn workspace_dir(&self, workspace_id: &str) -> Result<PathBuf> {
        validate_workspace_id(workspace_id)?;
        Ok(self.root_dir.join(workspace_id))
    }
}

#[async_trait]
impl WorkspaceFactory for LocalWorkspaceFactory {
    async fn open(&self, workspace_id: &str) -> Result<Workspace> {
        let root = self.workspace_dir(workspace_id)?;
        tokio::fs::create_dir_all(&root).await?;

        let room = Arc::new(Room::new());
        let mirror = ObjectStoreMirror::new(self.store.clone(), &self.storage_prefix, workspace_id);
        let files = Arc::new(WorkspaceFileSync::new(
            workspace_id,
            &root,
            mirror,
            room.clone(),
        ));

        if self.restore {
            let restored = files.restore_from_store().await?;
            debug!(workspace_id, restored, "Restored workspace from object store");
        } else {
            files
                .mirror()
                .hydrate()
                .await
                .map_err(loom_files::FileSyncError::from)?;
        }

        let terminals = Arc::new(TerminalMultiplexer::new(
            self.terminal.clone(),
            &root,
            room.clone(),
        ));
        let workspace = Workspace::new(workspace_id, room, files.clone(), terminals);

        let workspace = match &self.watcher {
            Some(config) => {
                let (events, handle) = WorkspaceWatcher::with_config(&root, config.clone())
                    .start()
                    .map_err(loom_files::FileSyncError::from)?;
                workspace.with_watcher(handle, spawn_propagation(files, events))
            }
            None => workspace,
        };

        info!(workspace_id, root = %root.display(), "Workspace opened");
        Ok(workspace)
    }
}

/// Workspace ids become directory names and object-store prefixes.
pub fn validate_workspace_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id.len() <= 128
        && id != "."
        && id != ".."
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(SessionError::InvalidWorkspace(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_files::{MemoryObjectStore, ObjectStore};

    #[test]
    fn test_validate_workspace_id() {
        assert!(validate_workspace_id("ws-1").is_ok());
        assert!(validate_workspace_id("abc_DEF.2").is_ok());
        assert!(validate_workspace_id("").is_err());
        assert!(validate_workspace_id("..").is_err());
        assert!(validate_workspace_id("a/b").is_err());
    }

    #[tokio::test]
    async fn test_open_restores_stored_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryObjectStore::new());
        store.put("code/ws1/src/main.py", b"print(1)\n".to_vec()).await.unwrap();
        store.put("code/ws1/empty/.keep", Vec::new()).await.unwrap();

        let factory = LocalWorkspaceFactory::new(dir.path(), store).with_watcher(None);
        let workspace = factory.open("ws1").await.unwrap();

        let root = dir.path().join("ws1");
        assert_eq!(
            std::fs::read_to_string(root.join("src/main.py")).unwrap(),
            "print(1)\n"
        );
        assert!(root.join("empty").is_dir());
        assert!(workspace.files().mirror().contains_key("code/ws1/src/main.py"));
        assert!(!workspace.is_watching());
        workspace.shutdown().await;
    }

    #[tokio::test]
    async fn test_open_without_restore_only_hydrates() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryObjectStore::new());
        store.put("code/ws1/a.txt", b"a".to_vec()).await.unwrap();

        let factory = LocalWorkspaceFactory::new(dir.path(), store)
            .with_watcher(None)
            .with_restore(false);
        let workspace = factory.open("ws1").await.unwrap();
        assert!(!dir.path().join("ws1/a.txt").exists());
        assert_eq!(workspace.files().mirror().len(), 1);
    }

    #[tokio::test]
    async fn test_open_rejects_bad_id() {
        let dir = tempfile::tempdir().unwrap();
        let factory = LocalWorkspaceFactory::new(dir.path(), Arc::new(MemoryObjectStore::new()));
        assert!(matches!(
            factory.open("../escape").await,
            Err(SessionError::InvalidWorkspace(_))
        ));
    }
}
