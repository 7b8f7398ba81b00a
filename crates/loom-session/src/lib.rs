//! Workspace session lifecycle for Loom.
//!
//! A workspace session exists while at least one socket is connected. The
//! [`SessionLifecycleManager`] opens the workspace (file sync, terminals,
//! watcher) on the first connection, tracks sockets, and once the last one
//! leaves arms an idle timer that closes the workspace and tears its compute
//! resources down through the [`Provisioner`].

pub mod compute;
pub mod config;
pub mod error;
pub mod idle;
pub mod kube;
pub mod manager;
pub mod manifest;
pub mod provisioner;
pub mod workspace;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use compute::{ComputeApi, ResourceKind, available_replicas};
pub use config::{DEFAULT_IDLE_TIMEOUT, SessionConfig};
pub use error::{ComputeError, ComputeResult, Result, SessionError};
pub use idle::IdleTimers;
pub use kube::{DEFAULT_NAMESPACE, KubeApiBuilder, KubeComputeApi};
pub use manager::SessionLifecycleManager;
pub use manifest::{DEFAULT_CONTAINER_PORT, ManifestParams, ManifestTemplate};
pub use provisioner::{EnsureOutcome, EnsureReport, Provisioner, TeardownOutcome, TeardownReport};
pub use workspace::{
    DEFAULT_STORAGE_PREFIX, LocalWorkspaceFactory, Workspace, WorkspaceFactory,
    validate_workspace_id,
};
