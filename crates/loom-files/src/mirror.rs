//! Durable mirror of one workspace's files in an object store.
//!
//! A workspace path `P` is stored under `code/{workspaceId}{P}`. Empty
//! directories are materialized as a zero-byte `{dirPrefix}.keep` object.
//! An in-memory index of known keys is updated in lock-step with every
//! successful store call, so existence checks never need a listing. Files
//! uploaded through the mirror also remember a SHA-256 of their contents.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::path::WorkspacePath;
use crate::store::{ObjectStore, StoreError, StoreResult};

/// Marker object standing in for an empty directory.
pub const KEEP_MARKER: &str = ".keep";

type ContentDigest = [u8; 32];

fn digest(body: &[u8]) -> ContentDigest {
    Sha256::digest(body).into()
}

/// Key-prefix view of a single workspace inside an [`ObjectStore`].
pub struct ObjectStoreMirror {
    store: Arc<dyn ObjectStore>,
    /// `code/{workspaceId}`, without a trailing slash.
    prefix: String,
    /// Known keys, with the digest of the last upload when this process
    /// made it. Hydrated keys and markers carry `None`.
    index: RwLock<BTreeMap<String, Option<ContentDigest>>>,
}

impl std::fmt::Debug for ObjectStoreMirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreMirror")
            .field("prefix", &self.prefix)
            .field("indexed_keys", &self.index.read().len())
            .finish()
    }
}

impl ObjectStoreMirror {
    /// Mirror for `workspace_id` under `root_prefix` (normally `"code"`).
    pub fn new(store: Arc<dyn ObjectStore>, root_prefix: &str, workspace_id: &str) -> Self {
        let root = root_prefix.trim_matches('/');
        let prefix = if root.is_empty() {
            workspace_id.to_string()
        } else {
            format!("{}/{}", root, workspace_id)
        };
        Self {
            store,
            prefix,
            index: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Object key of a file.
    pub fn key_for(&self, path: &WorkspacePath) -> String {
        if path.is_root() {
            format!("{}/", self.prefix)
        } else {
            format!("{}{}", self.prefix, path)
        }
    }

    /// Key prefix covering everything beneath a directory.
    pub fn dir_prefix(&self, path: &WorkspacePath) -> String {
        if path.is_root() {
            format!("{}/", self.prefix)
        } else {
            format!("{}{}/", self.prefix, path)
        }
    }

    /// Key of the empty-directory marker for `path`.
    pub fn marker_key(&self, path: &WorkspacePath) -> String {
        format!("{}{}", self.dir_prefix(path), KEEP_MARKER)
    }

    /// Map an object key back to its workspace path.
    pub fn path_for_key(&self, key: &str) -> Option<WorkspacePath> {
        let relative = key.strip_prefix(&self.prefix)?;
        if !relative.starts_with('/') {
            return None;
        }
        WorkspacePath::parse(relative).ok()
    }

    /// Replace the index with a fresh listing of the workspace prefix.
    pub async fn hydrate(&self) -> StoreResult<usize> {
        let keys = self.store.list(&format!("{}/", self.prefix)).await?;
        let count = keys.len();
        *self.index.write() = keys.into_iter().map(|k| (k, None)).collect();
        info!(prefix = %self.prefix, keys = count, "Hydrated object store index");
        Ok(count)
    }

    /// Whether a file's key is known.
    pub fn contains(&self, path: &WorkspacePath) -> bool {
        self.index.read().contains_key(&self.key_for(path))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.read().contains_key(key)
    }

    /// Whether `body` is exactly what was last uploaded for `path`.
    pub fn is_current(&self, path: &WorkspacePath, body: &[u8]) -> bool {
        matches!(
            self.index.read().get(&self.key_for(path)),
            Some(Some(known)) if *known == digest(body)
        )
    }

    /// Record that the store already holds `body` under `key`.
    pub fn remember(&self, key: &str, body: &[u8]) {
        if let Some(entry) = self.index.write().get_mut(key) {
            *entry = Some(digest(body));
        }
    }

    /// Indexed keys beneath a directory.
    pub fn keys_under(&self, path: &WorkspacePath) -> Vec<String> {
        let prefix = self.dir_prefix(path);
        self.index
            .read()
            .range(prefix.clone()..)
            .map(|(k, _)| k)
            .take_while(|k| k.starts_with(&prefix))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }

    /// Every key under the workspace prefix, straight from the store.
    pub async fn list_all(&self) -> StoreResult<Vec<String>> {
        self.store.list(&format!("{}/", self.prefix)).await
    }

    pub async fn get_file(&self, path: &WorkspacePath) -> StoreResult<Vec<u8>> {
        self.store.get(&self.key_for(path)).await
    }

    pub async fn get_key(&self, key: &str) -> StoreResult<Vec<u8>> {
        self.store.get(key).await
    }

    /// Upload a file's full contents.
    pub async fn put_file(&self, path: &WorkspacePath, body: Vec<u8>) -> StoreResult<()> {
        let key = self.key_for(path);
        let hash = digest(&body);
        self.store.put(&key, body).await?;
        self.index.write().insert(key, Some(hash));
        Ok(())
    }

    /// Materialize a directory with its `.keep` marker.
    pub async fn put_dir_marker(&self, path: &WorkspacePath) -> StoreResult<()> {
        let key = self.marker_key(path);
        self.store.put(&key, Vec::new()).await?;
        self.index.write().insert(key, None);
        Ok(())
    }

    pub async fn delete_file(&self, path: &WorkspacePath) -> StoreResult<()> {
        let key = self.key_for(path);
        self.store.delete(&key).await?;
        self.index.write().remove(&key);
        Ok(())
    }

    /// Delete every key beneath a directory, marker included.
    ///
    /// Keys come from both a live listing and the index, so objects written
    /// before hydration are still swept. Every key is attempted; the first
    /// failure is returned.
    pub async fn delete_prefix(&self, path: &WorkspacePath) -> StoreResult<usize> {
        let keys = self.sweep_keys(path).await?;
        let mut deleted = 0;
        let mut first_err: Option<StoreError> = None;

        for key in keys {
            match self.store.delete(&key).await {
                Ok(()) => {
                    self.index.write().remove(&key);
                    deleted += 1;
                }
                Err(e) => {
                    debug!(key = %key, error = %e, "Failed to delete object");
                    first_err.get_or_insert(e);
                }
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(deleted),
        }
    }

    /// Move one object: copy to the new key, then delete the old one.
    pub async fn rename_file(&self, from: &WorkspacePath, to: &WorkspacePath) -> StoreResult<()> {
        let src = self.key_for(from);
        let dst = self.key_for(to);
        self.copy_indexed(&src, dst).await?;
        self.store.delete(&src).await?;
        self.index.write().remove(&src);
        Ok(())
    }

    /// Move every key under `from` to the same relative key under `to`.
    ///
    /// All copies complete before any old key is removed. A failure midway
    /// leaves both prefixes partially populated; nothing is rolled back.
    /// Keys that do not map back to a workspace path are left where they are.
    pub async fn rename_prefix(
        &self,
        from: &WorkspacePath,
        to: &WorkspacePath,
    ) -> StoreResult<usize> {
        let mut moves = Vec::new();
        for key in self.sweep_keys(from).await? {
            match self.path_for_key(&key).and_then(|p| p.rebase(from, to)) {
                Some(moved) => {
                    let dst = self.key_for(&moved);
                    moves.push((key, dst));
                }
                None => debug!(key = %key, "Skipping unmappable key"),
            }
        }

        for (src, dst) in &moves {
            self.copy_indexed(src, dst.clone()).await?;
        }

        for (src, _) in &moves {
            self.store.delete(src).await?;
            self.index.write().remove(src);
        }

        debug!(from = %from, to = %to, keys = moves.len(), "Renamed object prefix");
        Ok(moves.len())
    }

    /// Copy an object, carrying its known digest over to the new key.
    async fn copy_indexed(&self, src: &str, dst: String) -> StoreResult<()> {
        self.store.copy(src, &dst).await?;
        let mut index = self.index.write();
        let known = index.get(src).copied().flatten();
        index.insert(dst, known);
        Ok(())
    }

    async fn sweep_keys(&self, path: &WorkspacePath) -> StoreResult<BTreeSet<String>> {
        let prefix = self.dir_prefix(path);
        let mut keys: BTreeSet<String> = self.store.list(&prefix).await?.into_iter().collect();
        keys.extend(self.keys_under(path));
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryObjectStore;

    fn path(raw: &str) -> WorkspacePath {
        WorkspacePath::parse(raw).unwrap()
    }

    fn mirror() -> (Arc<MemoryObjectStore>, ObjectStoreMirror) {
        let store = Arc::new(MemoryObjectStore::new());
        let mirror = ObjectStoreMirror::new(store.clone(), "code", "demo-1");
        (store, mirror)
    }

    #[test]
    fn test_key_layout() {
        let (_, mirror) = mirror();
        assert_eq!(mirror.prefix(), "code/demo-1");
        assert_eq!(mirror.key_for(&path("/main.py")), "code/demo-1/main.py");
        assert_eq!(mirror.dir_prefix(&path("/src")), "code/demo-1/src/");
        assert_eq!(mirror.marker_key(&path("/src")), "code/demo-1/src/.keep");
        assert_eq!(
            mirror.path_for_key("code/demo-1/src/a.rs"),
            Some(path("/src/a.rs"))
        );
        assert_eq!(mirror.path_for_key("code/demo-10/a.rs"), None);
    }

    #[tokio::test]
    async fn test_index_tracks_mutations() {
        let (store, mirror) = mirror();
        mirror.put_file(&path("/a.txt"), b"a".to_vec()).await.unwrap();
        mirror.put_dir_marker(&path("/empty")).await.unwrap();
        assert!(mirror.contains(&path("/a.txt")));
        assert!(mirror.contains_key("code/demo-1/empty/.keep"));
        assert_eq!(mirror.len(), 2);
        assert_eq!(store.len(), 2);

        mirror.delete_file(&path("/a.txt")).await.unwrap();
        assert!(!mirror.contains(&path("/a.txt")));
        assert!(!store.contains("code/demo-1/a.txt"));
    }

    #[tokio::test]
    async fn test_hydrate_reads_existing_keys() {
        let (store, mirror) = mirror();
        store.put("code/demo-1/x.py", vec![]).await.unwrap();
        store.put("code/demo-1/lib/y.py", vec![]).await.unwrap();
        store.put("code/other/z.py", vec![]).await.unwrap();

        assert_eq!(mirror.hydrate().await.unwrap(), 2);
        assert!(mirror.contains(&path("/lib/y.py")));
        assert_eq!(mirror.keys_under(&path("/lib")), vec!["code/demo-1/lib/y.py"]);
    }

    #[tokio::test]
    async fn test_delete_prefix_sweeps_unindexed_keys() {
        let (store, mirror) = mirror();
        mirror.put_dir_marker(&path("/src")).await.unwrap();
        store.put("code/demo-1/src/written_elsewhere.rs", vec![]).await.unwrap();
        store.put("code/demo-1/srcs/keep.rs", vec![]).await.unwrap();

        assert_eq!(mirror.delete_prefix(&path("/src")).await.unwrap(), 2);
        assert_eq!(store.count_prefix("code/demo-1/src/"), 0);
        assert!(store.contains("code/demo-1/srcs/keep.rs"));
    }

    #[tokio::test]
    async fn test_rename_prefix_moves_every_key() {
        let (store, mirror) = mirror();
        mirror.put_file(&path("/app/index.ts"), b"i".to_vec()).await.unwrap();
        mirror.put_file(&path("/app/ui/Button.tsx"), b"b".to_vec()).await.unwrap();
        mirror.put_dir_marker(&path("/app/empty")).await.unwrap();

        let moved = mirror
            .rename_prefix(&path("/app"), &path("/web"))
            .await
            .unwrap();
        assert_eq!(moved, 3);
        assert_eq!(store.count_prefix("code/demo-1/app/"), 0);
        assert_eq!(
            store.get("code/demo-1/web/ui/Button.tsx").await.unwrap(),
            b"b"
        );
        assert!(mirror.contains_key("code/demo-1/web/empty/.keep"));
        assert_eq!(mirror.keys_under(&path("/app")).len(), 0);
        assert!(mirror.is_current(&path("/web/index.ts"), b"i"));
    }

    #[tokio::test]
    async fn test_digest_tracks_last_upload() {
        let (store, mirror) = mirror();
        let main = path("/main.py");
        mirror.put_file(&main, b"v1".to_vec()).await.unwrap();
        assert!(mirror.is_current(&main, b"v1"));
        assert!(!mirror.is_current(&main, b"v2"));

        mirror.rename_file(&main, &path("/app.py")).await.unwrap();
        assert!(mirror.is_current(&path("/app.py"), b"v1"));

        // Keys learned from a listing have no known contents until remembered.
        store.put("code/demo-1/old.py", b"x".to_vec()).await.unwrap();
        mirror.hydrate().await.unwrap();
        assert!(!mirror.is_current(&path("/old.py"), b"x"));
        mirror.remember("code/demo-1/old.py", b"x");
        assert!(mirror.is_current(&path("/old.py"), b"x"));
    }

    #[tokio::test]
    async fn test_rename_file_is_copy_then_delete() {
        let (store, mirror) = mirror();
        mirror.put_file(&path("/old.txt"), b"x".to_vec()).await.unwrap();
        mirror
            .rename_file(&path("/old.txt"), &path("/new.txt"))
            .await
            .unwrap();
        assert!(!store.contains("code/demo-1/old.txt"));
        assert_eq!(store.get("code/demo-1/new.txt").await.unwrap(), b"x");
        assert!(mirror.contains(&path("/new.txt")));
    }
}
