//! Filesystem monitoring for a workspace root.
//!
//! Picks up changes that did not come through the file RPCs (build tools,
//! package managers, agents editing files directly) and feeds them to
//! [`WorkspaceFileSync::apply_external_change`]. Events produced by the RPCs
//! themselves are not filtered out; mirroring them twice is idempotent.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{Debouncer, new_debouncer};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::path::WorkspacePath;
use crate::sync::WorkspaceFileSync;

/// Default debounce duration in milliseconds.
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;

/// Directory names never watched: dependency caches and build output.
const IGNORED_DIRS: &[&str] = &[
    "node_modules",
    "target",
    "dist",
    "build",
    "__pycache__",
    "venv",
    ".next",
];

#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("Failed to create file watcher: {0}")]
    InitFailed(String),

    #[error("Failed to watch path {path}: {error}")]
    WatchFailed { path: PathBuf, error: String },
}

/// What happened to a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FsAction {
    /// Created or modified; the debouncer does not tell them apart.
    Changed,
    Removed,
}

impl std::fmt::Display for FsAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FsAction::Changed => write!(f, "changed"),
            FsAction::Removed => write!(f, "removed"),
        }
    }
}

/// A change observed under the workspace root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsChangeEvent {
    /// Workspace-relative path, e.g. `/src/main.py`.
    pub path: String,
    pub action: FsAction,
    pub timestamp: DateTime<Utc>,
}

impl FsChangeEvent {
    pub fn new(path: impl Into<String>, action: FsAction) -> Self {
        Self {
            path: path.into(),
            action,
            timestamp: Utc::now(),
        }
    }
}

/// Keeps the watcher alive. Dropping it stops watching and lets the
/// background thread exit.
pub struct WatcherHandle {
    debouncer: Option<Debouncer<RecommendedWatcher>>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl WatcherHandle {
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop watching. The event thread exits once it observes the closed
    /// notify channel; it is not joined, since it may be parked on a full
    /// event channel.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.debouncer.take();
        self.thread.take();
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherHandle")
            .field("running", &self.is_running())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Debounce duration in milliseconds (default: 500).
    pub debounce_ms: u64,
    /// Channel buffer size for events (default: 256).
    pub buffer_size: usize,
    /// Extra directory names to skip, on top of the built-in list.
    pub ignore: Vec<String>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            buffer_size: 256,
            ignore: Vec::new(),
        }
    }
}

/// Watches one workspace root recursively.
pub struct WorkspaceWatcher {
    root: PathBuf,
    config: WatcherConfig,
}

impl WorkspaceWatcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_config(root, WatcherConfig::default())
    }

    pub fn with_config(root: impl Into<PathBuf>, config: WatcherConfig) -> Self {
        Self {
            root: root.into(),
            config,
        }
    }

    /// Start watching. Events arrive on the returned receiver for as long
    /// as the handle is kept alive.
    pub fn start(&self) -> Result<(mpsc::Receiver<FsChangeEvent>, WatcherHandle), WatcherError> {
        let (event_tx, event_rx) = mpsc::channel(self.config.buffer_size);
        let (notify_tx, notify_rx) = std::sync::mpsc::channel();

        let mut debouncer = new_debouncer(Duration::from_millis(self.config.debounce_ms), notify_tx)
            .map_err(|e| WatcherError::InitFailed(e.to_string()))?;

        debouncer
            .watcher()
            .watch(&self.root, RecursiveMode::Recursive)
            .map_err(|e| WatcherError::WatchFailed {
                path: self.root.clone(),
                error: e.to_string(),
            })?;

        // Canonicalize so event paths (which the OS reports resolved) strip cleanly.
        let root = self
            .root
            .canonicalize()
            .unwrap_or_else(|_| self.root.clone());
        let ignore = self.config.ignore.clone();

        info!(
            root = %root.display(),
            debounce_ms = self.config.debounce_ms,
            "Started workspace file watcher"
        );

        let thread = std::thread::spawn(move || {
            while let Ok(result) = notify_rx.recv() {
                let events = match result {
                    Ok(events) => events,
                    Err(e) => {
                        error!("File watcher error: {:?}", e);
                        continue;
                    }
                };

                for event in events {
                    let Some(relative) = relative_path(&event.path, &root) else {
                        continue;
                    };
                    if is_ignored(&relative, &ignore) {
                        continue;
                    }
                    let Ok(path) = WorkspacePath::from_relative(&relative) else {
                        debug!(path = %event.path.display(), "Skipping unrepresentable path");
                        continue;
                    };
                    if path.is_root() {
                        continue;
                    }

                    let action = if event.path.exists() {
                        FsAction::Changed
                    } else {
                        FsAction::Removed
                    };

                    let fs_event = FsChangeEvent::new(path.as_str(), action);
                    debug!(path = %fs_event.path, action = %fs_event.action, "File change detected");

                    if event_tx.blocking_send(fs_event).is_err() {
                        debug!("Watcher event receiver closed");
                        return;
                    }
                }
            }
            info!("File watcher thread exiting");
        });

        Ok((
            event_rx,
            WatcherHandle {
                debouncer: Some(debouncer),
                thread: Some(thread),
            },
        ))
    }
}

fn relative_path(path: &Path, root: &Path) -> Option<PathBuf> {
    path.strip_prefix(root).ok().map(Path::to_path_buf)
}

/// Dotfiles, dot-directories and dependency/build directories are skipped
/// at any depth.
fn is_ignored(relative: &Path, extra: &[String]) -> bool {
    relative.components().any(|component| {
        let name = component.as_os_str().to_string_lossy();
        name.starts_with('.')
            || IGNORED_DIRS.contains(&name.as_ref())
            || extra.iter().any(|e| e == name.as_ref())
    })
}

/// Drain watcher events into the file sync, one at a time.
///
/// A failed mirror is logged and never stops later events.
pub fn spawn_propagation(
    files: Arc<WorkspaceFileSync>,
    mut events: mpsc::Receiver<FsChangeEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let Err(e) = files.apply_external_change(&event).await {
                warn!(
                    workspace_id = %files.workspace_id(),
                    path = %event.path,
                    action = %event.action,
                    error = %e,
                    "Failed to propagate external change"
                );
            }
        }
        debug!(workspace_id = %files.workspace_id(), "Watcher propagation stopped");
    })
}
