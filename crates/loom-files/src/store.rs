//! Durable object storage backends.
//!
//! The runner only needs a flat key/value blob API with prefix listing and
//! server-side copy. There is no rename: moving a key is copy-then-delete.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::trace;

/// Errors returned by an object store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("invalid object key: {0}")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Network or service failure. Retry policy belongs to the caller.
    #[error("object store unavailable: {0}")]
    Backend(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Key-prefix blob storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// All keys starting with `prefix`, in lexicographic order.
    async fn list(&self, prefix: &str) -> StoreResult<Vec<String>>;

    async fn get(&self, key: &str) -> StoreResult<Vec<u8>>;

    async fn put(&self, key: &str, body: Vec<u8>) -> StoreResult<()>;

    /// Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> StoreResult<()>;

    async fn copy(&self, from: &str, to: &str) -> StoreResult<()>;
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory backend
// ─────────────────────────────────────────────────────────────────────────────

/// Object store held entirely in memory.
///
/// Can be switched into an outage mode where every call fails with
/// [`StoreError::Backend`], to exercise divergence handling.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<String, Vec<u8>>>,
    unavailable: AtomicBool,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate (or end) a backend outage.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("object store outage".to_string()));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    /// Number of keys under a prefix, without going through the async API.
    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.objects
            .read()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .count()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.read().contains_key(key)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn list(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.check_available()?;
        Ok(self
            .objects
            .read()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn get(&self, key: &str) -> StoreResult<Vec<u8>> {
        self.check_available()?;
        self.objects
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, body: Vec<u8>) -> StoreResult<()> {
        self.check_available()?;
        trace!(key, bytes = body.len(), "put object");
        self.objects.write().insert(key.to_string(), body);
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.check_available()?;
        self.objects.write().remove(key);
        Ok(())
    }

    async fn copy(&self, from: &str, to: &str) -> StoreResult<()> {
        self.check_available()?;
        let mut objects = self.objects.write();
        let body = objects
            .get(from)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(from.to_string()))?;
        objects.insert(to.to_string(), body);
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Directory-backed backend
// ─────────────────────────────────────────────────────────────────────────────

/// Object store backed by a local directory, one file per key.
///
/// Stands in for a bucket on single-host deployments and survives runner
/// restarts. Keys map to paths below `base`; `/` in a key is a directory
/// separator.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    base: PathBuf,
}

impl LocalObjectStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    fn key_path(&self, key: &str) -> StoreResult<PathBuf> {
        if key.is_empty()
            || key.starts_with('/')
            || key.split('/').any(|seg| seg == ".." || seg == ".")
        {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.base.join(key))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn list(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let base = self.base.clone();
        let prefix = prefix.to_string();
        tokio::task::spawn_blocking(move || {
            if !base.exists() {
                return Ok(Vec::new());
            }
            let mut keys = Vec::new();
            for entry in walkdir::WalkDir::new(&base).follow_links(false) {
                let entry = entry.map_err(|e| StoreError::Backend(e.to_string()))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let Ok(relative) = entry.path().strip_prefix(&base) else {
                    continue;
                };
                let key = relative
                    .to_string_lossy()
                    .replace(std::path::MAIN_SEPARATOR, "/");
                if key.starts_with(&prefix) {
                    keys.push(key);
                }
            }
            keys.sort();
            Ok(keys)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("list task failed: {}", e)))?
    }

    async fn get(&self, key: &str) -> StoreResult<Vec<u8>> {
        let path = self.key_path(key)?;
        match tokio::fs::read(&path).await {
            Ok(body) => Ok(body),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, body: Vec<u8>) -> StoreResult<()> {
        let path = self.key_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, body).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let path = self.key_path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn copy(&self, from: &str, to: &str) -> StoreResult<()> {
        let src = self.key_path(from)?;
        let dst = self.key_path(to)?;
        if let Some(parent) = dst.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        match tokio::fs::copy(&src, &dst).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(from.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn exercise(store: &dyn ObjectStore) {
        store.put("code/ws/a.txt", b"a".to_vec()).await.unwrap();
        store.put("code/ws/src/b.rs", b"b".to_vec()).await.unwrap();
        store.put("code/other/c.txt", b"c".to_vec()).await.unwrap();

        let keys = store.list("code/ws/").await.unwrap();
        assert_eq!(keys, vec!["code/ws/a.txt", "code/ws/src/b.rs"]);

        store.copy("code/ws/a.txt", "code/ws/copy.txt").await.unwrap();
        assert_eq!(store.get("code/ws/copy.txt").await.unwrap(), b"a");

        store.delete("code/ws/a.txt").await.unwrap();
        store.delete("code/ws/a.txt").await.unwrap();
        assert!(matches!(
            store.get("code/ws/a.txt").await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.copy("code/ws/missing", "code/ws/x").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_store_semantics() {
        let store = MemoryObjectStore::new();
        exercise(&store).await;
        assert_eq!(store.count_prefix("code/ws/"), 2);
    }

    #[tokio::test]
    async fn test_memory_store_outage() {
        let store = MemoryObjectStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.put("k", vec![]).await,
            Err(StoreError::Backend(_))
        ));
        store.set_unavailable(false);
        store.put("k", vec![]).await.unwrap();
        assert!(store.contains("k"));
    }

    #[tokio::test]
    async fn test_local_store_semantics() {
        let dir = tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        exercise(&store).await;
    }

    #[tokio::test]
    async fn test_local_store_rejects_escaping_keys() {
        let dir = tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        assert!(matches!(
            store.put("../escape", vec![]).await,
            Err(StoreError::InvalidKey(_))
        ));
        assert!(matches!(
            store.get("/abs").await,
            Err(StoreError::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn test_local_store_list_missing_base() {
        let dir = tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path().join("missing"));
        assert!(store.list("").await.unwrap().is_empty());
    }
}
