//! Workspace file sync for Loom.
//!
//! Keeps three views of a workspace's files consistent on a best-effort
//! basis: the compute resource's local disk, a durable object store under
//! the `code/{workspaceId}` prefix, and the in-memory trees of connected
//! clients (via room broadcasts).
//!
//! Mutations always hit disk first. The object store is mirrored second; a
//! failure there is logged as a divergence and never rolled back.

pub mod error;
pub mod mirror;
pub mod path;
pub mod store;
pub mod sync;
pub mod watcher;

pub use error::{FileSyncError, Result};
pub use mirror::{KEEP_MARKER, ObjectStoreMirror};
pub use path::{PathError, WorkspacePath};
pub use store::{LocalObjectStore, MemoryObjectStore, ObjectStore, StoreError, StoreResult};
pub use sync::WorkspaceFileSync;
pub use watcher::{
    DEFAULT_DEBOUNCE_MS, FsAction, FsChangeEvent, WatcherConfig, WatcherError, WatcherHandle,
    WorkspaceWatcher, spawn_propagation,
};
