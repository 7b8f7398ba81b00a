//! The file RPC surface of a workspace.
//!
//! Every mutation runs in the same order: local disk, then the object store
//! mirror, then a room broadcast. A disk failure aborts the operation before
//! the store is touched. A store failure after a successful disk write is a
//! divergence: it is logged and the operation still reports success.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use loom_types::{FileSystemNode, ItemKind, OpResult, Room, ServerEvent, SocketId};
use tracing::{debug, info, warn};

use crate::error::{FileSyncError, Result};
use crate::mirror::{KEEP_MARKER, ObjectStoreMirror};
use crate::path::WorkspacePath;
use crate::store::StoreError;
use crate::watcher::{FsAction, FsChangeEvent};

/// Message returned when a create or rename target is already taken.
pub const ALREADY_EXISTS: &str = "Item already exists";

/// Reconciles local disk, the object store mirror, and connected clients.
pub struct WorkspaceFileSync {
    workspace_id: String,
    root: PathBuf,
    mirror: ObjectStoreMirror,
    room: Arc<Room>,
}

impl std::fmt::Debug for WorkspaceFileSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspaceFileSync")
            .field("workspace_id", &self.workspace_id)
            .field("root", &self.root)
            .field("mirror", &self.mirror)
            .finish()
    }
}

impl WorkspaceFileSync {
    pub fn new(
        workspace_id: impl Into<String>,
        root: impl Into<PathBuf>,
        mirror: ObjectStoreMirror,
        room: Arc<Room>,
    ) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            root: root.into(),
            mirror,
            room,
        }
    }

    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn mirror(&self) -> &ObjectStoreMirror {
        &self.mirror
    }

    // ─────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────

    /// Immediate children of a directory, read live from disk.
    ///
    /// Directories come first, then files, each group sorted by name.
    /// Child directories carry `children: None` (not yet fetched).
    pub async fn fetch_directory(&self, raw: &str) -> Result<Vec<FileSystemNode>> {
        let dir = WorkspacePath::parse(raw)?;
        let disk = dir.to_disk(&self.root);

        let mut entries = match tokio::fs::read_dir(&disk).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(FileSyncError::NotFound(dir.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let mut nodes = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Ok(child) = dir.join(&name) else {
                debug!(name = %name, "Skipping entry with unrepresentable name");
                continue;
            };
            let is_dir = match entry.file_type().await {
                Ok(ft) if ft.is_symlink() => tokio::fs::metadata(entry.path())
                    .await
                    .map(|m| m.is_dir())
                    .unwrap_or(false),
                Ok(ft) => ft.is_dir(),
                Err(_) => continue,
            };
            nodes.push(if is_dir {
                FileSystemNode::directory(child.as_str(), name)
            } else {
                FileSystemNode::file(child.as_str(), name)
            });
        }

        nodes.sort_by(|a, b| {
            b.is_directory()
                .cmp(&a.is_directory())
                .then_with(|| a.name().cmp(b.name()))
        });
        Ok(nodes)
    }

    /// Full text of a file.
    pub async fn fetch_file_content(&self, raw: &str) -> Result<String> {
        let path = WorkspacePath::parse_item(raw)?;
        match tokio::fs::read(path.to_disk(&self.root)).await {
            Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(FileSyncError::NotFound(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Root listing sent to a socket when it connects.
    pub async fn tree_snapshot(&self) -> Result<ServerEvent> {
        let nodes = self.fetch_directory("/").await?;
        Ok(ServerEvent::TreeSnapshot { nodes })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Mutations
    // ─────────────────────────────────────────────────────────────────────

    /// Create a file or directory.
    ///
    /// Directories are created recursively and are idempotent. Files are
    /// written with `content` (empty when absent), replacing any existing
    /// file.
    pub async fn create_item(
        &self,
        raw: &str,
        kind: ItemKind,
        content: Option<&str>,
        origin: Option<SocketId>,
    ) -> OpResult {
        let path = match WorkspacePath::parse_item(raw) {
            Ok(path) => path,
            Err(e) => return OpResult::failed(e.to_string()),
        };
        let disk = path.to_disk(&self.root);

        let mirrored = match kind {
            ItemKind::Directory => {
                if let Err(e) = tokio::fs::create_dir_all(&disk).await {
                    return OpResult::failed(disk_error(e));
                }
                self.mirror.put_dir_marker(&path).await
            }
            ItemKind::File => {
                if tokio::fs::metadata(&disk).await.is_ok_and(|m| m.is_dir()) {
                    return OpResult::failed(ALREADY_EXISTS);
                }
                let body = content.unwrap_or_default().as_bytes().to_vec();
                if let Err(e) = write_file(&disk, &body).await {
                    return OpResult::failed(disk_error(e));
                }
                self.mirror.put_file(&path, body).await
            }
        };

        if let Err(e) = mirrored {
            self.divergence("create", &path, &e);
        }

        info!(workspace_id = %self.workspace_id, path = %path, kind = %kind, "Created item");
        self.publish(
            origin,
            ServerEvent::ItemCreated {
                path: path.to_string(),
                kind,
            },
        );
        OpResult::ok()
    }

    /// Delete a file, or a directory and everything beneath it.
    pub async fn delete_item(&self, raw: &str, kind: ItemKind, origin: Option<SocketId>) -> bool {
        let Ok(path) = WorkspacePath::parse_item(raw) else {
            return false;
        };
        let disk = path.to_disk(&self.root);

        let removed = match kind {
            ItemKind::Directory => tokio::fs::remove_dir_all(&disk).await,
            ItemKind::File => tokio::fs::remove_file(&disk).await,
        };
        if let Err(e) = removed {
            warn!(workspace_id = %self.workspace_id, path = %path, error = %e, "Failed to delete item");
            return false;
        }

        let mirrored = match kind {
            ItemKind::Directory => self.mirror.delete_prefix(&path).await.map(|_| ()),
            ItemKind::File => self.mirror.delete_file(&path).await,
        };
        if let Err(e) = mirrored {
            self.divergence("delete", &path, &e);
        }

        info!(workspace_id = %self.workspace_id, path = %path, kind = %kind, "Deleted item");
        self.publish(
            origin,
            ServerEvent::ItemDeleted {
                path: path.to_string(),
                kind,
            },
        );
        true
    }

    /// Rename or move an item. Fails if the target already exists.
    pub async fn rename_item(
        &self,
        old_raw: &str,
        new_raw: &str,
        kind: ItemKind,
        origin: Option<SocketId>,
    ) -> OpResult {
        let (from, to) = match (
            WorkspacePath::parse_item(old_raw),
            WorkspacePath::parse_item(new_raw),
        ) {
            (Ok(from), Ok(to)) => (from, to),
            (Err(e), _) | (_, Err(e)) => return OpResult::failed(e.to_string()),
        };
        if from == to {
            return OpResult::ok();
        }
        if kind == ItemKind::Directory && to.starts_with(&from) {
            return OpResult::failed("Cannot move a directory into itself");
        }

        let src = from.to_disk(&self.root);
        let dst = to.to_disk(&self.root);
        if tokio::fs::try_exists(&dst).await.unwrap_or(false) {
            return OpResult::failed(ALREADY_EXISTS);
        }
        if let Some(parent) = dst.parent()
            && let Err(e) = tokio::fs::create_dir_all(parent).await
        {
            return OpResult::failed(disk_error(e));
        }
        if let Err(e) = tokio::fs::rename(&src, &dst).await {
            return OpResult::failed(disk_error(e));
        }

        let mirrored = match kind {
            ItemKind::Directory => self.mirror.rename_prefix(&from, &to).await.map(|_| ()),
            ItemKind::File => self.mirror.rename_file(&from, &to).await,
        };
        if let Err(e) = mirrored {
            self.divergence("rename", &from, &e);
        }

        info!(workspace_id = %self.workspace_id, from = %from, to = %to, "Renamed item");
        self.publish(
            origin,
            ServerEvent::ItemRenamed {
                old_path: from.to_string(),
                new_path: to.to_string(),
                kind,
            },
        );
        OpResult::ok()
    }

    /// Overwrite a file and re-upload it in full. Last write wins.
    pub async fn update_content(
        &self,
        raw: &str,
        content: &str,
        origin: Option<SocketId>,
    ) -> Result<()> {
        let path = WorkspacePath::parse_item(raw)?;
        let body = content.as_bytes().to_vec();
        write_file(&path.to_disk(&self.root), &body).await?;

        if let Err(e) = self.mirror.put_file(&path, body).await {
            self.divergence("update", &path, &e);
        }

        debug!(workspace_id = %self.workspace_id, path = %path, bytes = content.len(), "Updated content");
        self.publish(
            origin,
            ServerEvent::ItemUpdated {
                path: path.to_string(),
                content: content.to_string(),
            },
        );
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Durable state
    // ─────────────────────────────────────────────────────────────────────

    /// Download every object of the workspace onto local disk.
    ///
    /// Used when a workspace opens on a fresh compute resource. Also
    /// hydrates the mirror index. Returns the number of files written.
    pub async fn restore_from_store(&self) -> Result<usize> {
        self.mirror.hydrate().await?;
        let keys = self.mirror.list_all().await?;
        let mut restored = 0;

        for key in keys {
            let Some(path) = self.mirror.path_for_key(&key) else {
                continue;
            };
            let disk = path.to_disk(&self.root);
            if path.name() == KEEP_MARKER {
                tokio::fs::create_dir_all(path.parent().to_disk(&self.root)).await?;
                continue;
            }
            let body = self.mirror.get_key(&key).await?;
            write_file(&disk, &body).await?;
            self.mirror.remember(&key, &body);
            restored += 1;
        }

        info!(workspace_id = %self.workspace_id, files = restored, "Restored workspace from object store");
        Ok(restored)
    }

    /// Mirror a change that did not come through the RPCs above.
    ///
    /// The index decides between `item-created` and `item-updated`. Events
    /// go to every socket in the room. A file whose bytes match the last
    /// upload is skipped: that write came through an RPC, and the room has
    /// already been told.
    pub async fn apply_external_change(&self, event: &FsChangeEvent) -> Result<()> {
        let path = WorkspacePath::parse_item(&event.path)?;
        let disk = path.to_disk(&self.root);

        let metadata = match event.action {
            FsAction::Changed => tokio::fs::metadata(&disk).await.ok(),
            FsAction::Removed => None,
        };

        match metadata {
            Some(meta) if meta.is_dir() => {
                let marker = self.mirror.marker_key(&path);
                if self.mirror.contains_key(&marker) || !self.mirror.keys_under(&path).is_empty() {
                    return Ok(());
                }
                self.mirror.put_dir_marker(&path).await?;
                self.publish(
                    None,
                    ServerEvent::ItemCreated {
                        path: path.to_string(),
                        kind: ItemKind::Directory,
                    },
                );
            }
            Some(_) => {
                let body = match tokio::fs::read(&disk).await {
                    Ok(body) => body,
                    // Removed again before we got to it; the next event handles it.
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
                    Err(e) => return Err(e.into()),
                };
                if self.mirror.is_current(&path, &body) {
                    debug!(workspace_id = %self.workspace_id, path = %path, "Unchanged since last upload");
                    return Ok(());
                }
                let existed = self.mirror.contains(&path);
                let content = String::from_utf8_lossy(&body).into_owned();
                self.mirror.put_file(&path, body).await?;
                let event = if existed {
                    ServerEvent::ItemUpdated {
                        path: path.to_string(),
                        content,
                    }
                } else {
                    ServerEvent::ItemCreated {
                        path: path.to_string(),
                        kind: ItemKind::File,
                    }
                };
                self.publish(None, event);
            }
            None => {
                let kind = if self.mirror.contains(&path) {
                    self.mirror.delete_file(&path).await?;
                    ItemKind::File
                } else if !self.mirror.keys_under(&path).is_empty() {
                    self.mirror.delete_prefix(&path).await?;
                    ItemKind::Directory
                } else {
                    return Ok(());
                };
                self.publish(
                    None,
                    ServerEvent::ItemDeleted {
                        path: path.to_string(),
                        kind,
                    },
                );
            }
        }

        debug!(workspace_id = %self.workspace_id, path = %path, action = %event.action, "Mirrored external change");
        Ok(())
    }

    fn publish(&self, origin: Option<SocketId>, event: ServerEvent) {
        match origin {
            Some(origin) => self.room.broadcast_except(origin, &event),
            None => self.room.broadcast(&event),
        };
    }

    fn divergence(&self, op: &str, path: &WorkspacePath, error: &StoreError) {
        warn!(
            workspace_id = %self.workspace_id,
            op,
            path = %path,
            error = %error,
            "Disk and object store diverged"
        );
    }
}

async fn write_file(disk: &Path, body: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = disk.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(disk, body).await
}

fn disk_error(e: std::io::Error) -> String {
    match e.kind() {
        std::io::ErrorKind::NotFound => "Item not found".to_string(),
        std::io::ErrorKind::AlreadyExists => ALREADY_EXISTS.to_string(),
        _ => e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryObjectStore, ObjectStore};
    use loom_types::event_channel;

    fn setup() -> (tempfile::TempDir, Arc<MemoryObjectStore>, WorkspaceFileSync) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryObjectStore::new());
        let mirror = ObjectStoreMirror::new(store.clone(), "code", "demo-1");
        let files = WorkspaceFileSync::new("demo-1", dir.path(), mirror, Arc::new(Room::new()));
        (dir, store, files)
    }

    #[tokio::test]
    async fn test_fetch_directory_orders_dirs_first() {
        let (dir, _, files) = setup();
        std::fs::write(dir.path().join("b.py"), "").unwrap();
        std::fs::write(dir.path().join("a.md"), "").unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();

        let nodes = files.fetch_directory("/").await.unwrap();
        let paths: Vec<_> = nodes.iter().map(|n| n.path()).collect();
        assert_eq!(paths, vec!["/src", "/a.md", "/b.py"]);
        assert!(matches!(
            &nodes[0],
            FileSystemNode::Directory { children: None, .. }
        ));
        assert!(matches!(
            &nodes[2],
            FileSystemNode::File { language: Some(l), .. } if l == "python"
        ));
    }

    #[tokio::test]
    async fn test_fetch_missing_directory() {
        let (_dir, _, files) = setup();
        assert!(matches!(
            files.fetch_directory("/nope").await,
            Err(FileSyncError::NotFound(_))
        ));
        assert!(matches!(
            files.fetch_directory("/../etc").await,
            Err(FileSyncError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_create_file_writes_disk_and_store() {
        let (dir, store, files) = setup();
        let result = files
            .create_item("/src/main.py", ItemKind::File, Some("print(1)"), None)
            .await;
        assert_eq!(result, OpResult::ok());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("src/main.py")).unwrap(),
            "print(1)"
        );
        assert_eq!(
            store.get("code/demo-1/src/main.py").await.unwrap(),
            b"print(1)"
        );
        assert_eq!(files.fetch_file_content("/src/main.py").await.unwrap(), "print(1)");
    }

    #[tokio::test]
    async fn test_create_directory_is_idempotent() {
        let (_dir, store, files) = setup();
        assert!(files.create_item("/lib", ItemKind::Directory, None, None).await.success);
        assert!(files.create_item("/lib", ItemKind::Directory, None, None).await.success);
        assert!(store.contains("code/demo-1/lib/.keep"));
        assert_eq!(store.count_prefix("code/demo-1/lib/"), 1);
    }

    #[tokio::test]
    async fn test_create_rejects_traversal() {
        let (_dir, store, files) = setup();
        let result = files
            .create_item("/../escape.txt", ItemKind::File, Some("x"), None)
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("traversal"));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_rename_conflict_returns_message() {
        let (_dir, _, files) = setup();
        files.create_item("/a.txt", ItemKind::File, Some("a"), None).await;
        files.create_item("/b.txt", ItemKind::File, Some("b"), None).await;

        let result = files
            .rename_item("/a.txt", "/b.txt", ItemKind::File, None)
            .await;
        assert_eq!(result, OpResult::failed(ALREADY_EXISTS));
        assert_eq!(files.fetch_file_content("/b.txt").await.unwrap(), "b");
    }

    #[tokio::test]
    async fn test_delete_skips_store_when_disk_fails() {
        let (_dir, store, files) = setup();
        store.put("code/demo-1/ghost.txt", b"x".to_vec()).await.unwrap();
        assert!(!files.delete_item("/ghost.txt", ItemKind::File, None).await);
        assert!(store.contains("code/demo-1/ghost.txt"));
    }

    #[tokio::test]
    async fn test_rename_skips_store_when_disk_fails() {
        let (_dir, store, files) = setup();
        store.put("code/demo-1/ghost.txt", b"x".to_vec()).await.unwrap();
        files.mirror().hydrate().await.unwrap();

        let result = files
            .rename_item("/ghost.txt", "/found.txt", ItemKind::File, None)
            .await;
        assert!(!result.success);
        assert!(result.error.is_some());
        assert_eq!(store.get("code/demo-1/ghost.txt").await.unwrap(), b"x");
        assert!(!store.contains("code/demo-1/found.txt"));
    }

    #[tokio::test]
    async fn test_store_outage_is_non_fatal() {
        let (dir, store, files) = setup();
        store.set_unavailable(true);
        let result = files
            .create_item("/main.py", ItemKind::File, Some("print(1)"), None)
            .await;
        assert!(result.success);
        assert!(dir.path().join("main.py").exists());
        assert!(!files.mirror().contains(&WorkspacePath::parse("/main.py").unwrap()));
    }

    #[tokio::test]
    async fn test_mutations_broadcast_to_others() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryObjectStore::new());
        let room = Arc::new(Room::new());
        let files = WorkspaceFileSync::new(
            "demo-1",
            dir.path(),
            ObjectStoreMirror::new(store, "code", "demo-1"),
            room.clone(),
        );
        let (tx_a, mut rx_a) = event_channel();
        let (tx_b, mut rx_b) = event_channel();
        let a = SocketId::new();
        room.join(a, tx_a);
        room.join(SocketId::new(), tx_b);

        files.update_content("/main.py", "print(2)", Some(a)).await.unwrap();
        assert!(rx_a.try_recv().is_err());
        assert_eq!(
            rx_b.try_recv().unwrap(),
            ServerEvent::ItemUpdated {
                path: "/main.py".into(),
                content: "print(2)".into()
            }
        );
    }

    #[tokio::test]
    async fn test_restore_from_store() {
        let (dir, store, files) = setup();
        store.put("code/demo-1/main.py", b"print(1)".to_vec()).await.unwrap();
        store.put("code/demo-1/empty/.keep", vec![]).await.unwrap();
        store.put("code/demo-1/pkg/mod.py", b"x = 1".to_vec()).await.unwrap();

        assert_eq!(files.restore_from_store().await.unwrap(), 2);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("main.py")).unwrap(),
            "print(1)"
        );
        assert!(dir.path().join("empty").is_dir());
        assert!(!dir.path().join("empty/.keep").exists());
        assert!(dir.path().join("pkg/mod.py").exists());
        assert_eq!(files.mirror().len(), 3);
    }

    #[tokio::test]
    async fn test_external_change_created_then_updated() {
        let (dir, store, files) = setup();
        std::fs::write(dir.path().join("gen.txt"), "v1").unwrap();
        files
            .apply_external_change(&FsChangeEvent::new("/gen.txt", FsAction::Changed))
            .await
            .unwrap();
        assert_eq!(store.get("code/demo-1/gen.txt").await.unwrap(), b"v1");

        std::fs::write(dir.path().join("gen.txt"), "v2").unwrap();
        files
            .apply_external_change(&FsChangeEvent::new("/gen.txt", FsAction::Changed))
            .await
            .unwrap();
        assert_eq!(store.get("code/demo-1/gen.txt").await.unwrap(), b"v2");

        std::fs::remove_file(dir.path().join("gen.txt")).unwrap();
        files
            .apply_external_change(&FsChangeEvent::new("/gen.txt", FsAction::Removed))
            .await
            .unwrap();
        assert!(!store.contains("code/demo-1/gen.txt"));
    }

    #[tokio::test]
    async fn test_external_change_after_rpc_write_is_silent() {
        let dir = tempfile::tempdir().unwrap();
        let room = Arc::new(Room::new());
        let files = WorkspaceFileSync::new(
            "demo-1",
            dir.path(),
            ObjectStoreMirror::new(Arc::new(MemoryObjectStore::new()), "code", "demo-1"),
            room.clone(),
        );
        let (tx, mut rx) = event_channel();
        let a = SocketId::new();
        room.join(a, tx);

        files.update_content("/main.py", "v1", Some(a)).await.unwrap();
        files
            .apply_external_change(&FsChangeEvent::new("/main.py", FsAction::Changed))
            .await
            .unwrap();
        assert!(rx.try_recv().is_err());

        // A later edit made outside the RPCs is still announced.
        std::fs::write(dir.path().join("main.py"), "v2").unwrap();
        files
            .apply_external_change(&FsChangeEvent::new("/main.py", FsAction::Changed))
            .await
            .unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            ServerEvent::ItemUpdated {
                path: "/main.py".into(),
                content: "v2".into()
            }
        );
    }

    #[tokio::test]
    async fn test_external_change_removes_directory_prefix() {
        let (dir, store, files) = setup();
        files.create_item("/out", ItemKind::Directory, None, None).await;
        files.create_item("/out/a.txt", ItemKind::File, Some("a"), None).await;
        std::fs::remove_dir_all(dir.path().join("out")).unwrap();

        files
            .apply_external_change(&FsChangeEvent::new("/out", FsAction::Removed))
            .await
            .unwrap();
        assert_eq!(store.count_prefix("code/demo-1/out/"), 0);
    }
}
