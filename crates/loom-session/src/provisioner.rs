//! Idempotent provisioning and teardown of a workspace's compute resources.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::compute::{ComputeApi, ResourceKind, available_replicas};
use crate::error::{ComputeError, ComputeResult};
use crate::manifest::{ManifestParams, ManifestTemplate};

/// What `ensure` did to one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EnsureOutcome {
    Created,
    Replaced,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnsureReport {
    pub deployment: EnsureOutcome,
    pub service: EnsureOutcome,
    pub ingress: EnsureOutcome,
}

/// What `teardown` did to one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TeardownOutcome {
    Deleted,
    /// Already gone (404).
    Absent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TeardownReport {
    pub ingress: TeardownOutcome,
    pub service: TeardownOutcome,
    pub deployment: TeardownOutcome,
}

/// Ensures and tears down the Deployment/Service/Ingress for workspaces.
///
/// Concurrent `ensure` calls for the same workspace are serialized; calls for
/// different workspaces run in parallel.
pub struct Provisioner {
    api: Arc<dyn ComputeApi>,
    template: ManifestTemplate,
    locks: parking_lot::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl std::fmt::Debug for Provisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provisioner")
            .field("template", &self.template)
            .finish()
    }
}

impl Provisioner {
    pub fn new(api: Arc<dyn ComputeApi>, template: ManifestTemplate) -> Self {
        Self {
            api,
            template,
            locks: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    pub fn template(&self) -> &ManifestTemplate {
        &self.template
    }

    fn lock_for(&self, workspace_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(workspace_id.to_string())
            .or_default()
            .clone()
    }

    /// Bring the workspace's resources into existence without duplicating any.
    pub async fn ensure(&self, workspace_id: &str) -> ComputeResult<EnsureReport> {
        let params = self.template.for_workspace(workspace_id)?;
        let lock = self.lock_for(workspace_id);
        let _guard = lock.lock().await;

        let deployment = self.ensure_deployment(&params).await?;
        let service = self.ensure_exists(&params, ResourceKind::Service).await?;
        let ingress = self.ensure_exists(&params, ResourceKind::Ingress).await?;

        let report = EnsureReport {
            deployment,
            service,
            ingress,
        };
        info!(workspace_id, ?report, "Workspace compute ensured");
        Ok(report)
    }

    async fn ensure_deployment(&self, params: &ManifestParams) -> ComputeResult<EnsureOutcome> {
        let kind = ResourceKind::Deployment;
        let name = params.name();
        let mut manifest = params.render(kind);

        let Some(current) = self.api.get(kind, name).await? else {
            return self.create_or_accept(kind, &manifest).await;
        };

        let replicas = available_replicas(&current);
        if replicas >= 1 {
            debug!(name, replicas, "Deployment healthy");
            return Ok(EnsureOutcome::Unchanged);
        }

        if let Some(version) = current.pointer("/metadata/resourceVersion") {
            manifest["metadata"]["resourceVersion"] = version.clone();
        }
        match self.api.replace(kind, name, &manifest).await {
            Ok(()) => {
                info!(name, "Replaced deployment with no available replicas");
                Ok(EnsureOutcome::Replaced)
            }
            // Deleted between read and replace.
            Err(ComputeError::NotFound(_)) => {
                if let Some(meta) = manifest.get_mut("metadata").and_then(Value::as_object_mut) {
                    meta.remove("resourceVersion");
                }
                self.create_or_accept(kind, &manifest).await
            }
            Err(e) => Err(e),
        }
    }

    async fn ensure_exists(
        &self,
        params: &ManifestParams,
        kind: ResourceKind,
    ) -> ComputeResult<EnsureOutcome> {
        if self.api.get(kind, params.name()).await?.is_some() {
            return Ok(EnsureOutcome::Unchanged);
        }
        self.create_or_accept(kind, &params.render(kind)).await
    }

    /// Create, treating a 409 as someone else having won the race.
    async fn create_or_accept(&self, kind: ResourceKind, manifest: &Value) -> ComputeResult<EnsureOutcome> {
        match self.api.create(kind, manifest).await {
            Ok(()) => {
                debug!(%kind, "Created resource");
                Ok(EnsureOutcome::Created)
            }
            Err(ComputeError::Conflict(name)) => {
                debug!(%kind, name, "Resource created concurrently");
                Ok(EnsureOutcome::Unchanged)
            }
            Err(e) => Err(e),
        }
    }

    /// Delete Ingress, then Service, then Deployment.
    ///
    /// Each delete is attempted even if an earlier one failed; 404 counts as
    /// success. The first other failure is returned.
    pub async fn teardown(&self, workspace_id: &str) -> ComputeResult<TeardownReport> {
        let params = self.template.for_workspace(workspace_id)?;
        let lock = self.lock_for(workspace_id);
        let _guard = lock.lock().await;

        let mut outcomes = [TeardownOutcome::Absent; 3];
        let mut first_error = None;

        for (slot, kind) in ResourceKind::TEARDOWN_ORDER.into_iter().enumerate() {
            match self.api.delete(kind, params.name()).await {
                Ok(()) => outcomes[slot] = TeardownOutcome::Deleted,
                Err(e) if e.is_not_found() => {
                    debug!(workspace_id, %kind, "Already deleted");
                }
                Err(e) => {
                    error!(workspace_id, %kind, error = %e, "Teardown delete failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(e) = first_error {
            warn!(workspace_id, "Teardown incomplete, resources may be leaked");
            return Err(e);
        }

        self.locks.lock().remove(workspace_id);
        let [ingress, service, deployment] = outcomes;
        let report = TeardownReport {
            ingress,
            service,
            deployment,
        };
        info!(workspace_id, ?report, "Workspace compute torn down");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeComputeApi;
    use std::time::Duration;

    fn provisioner() -> (Arc<FakeComputeApi>, Provisioner) {
        let api = Arc::new(FakeComputeApi::new());
        let template = ManifestTemplate::new("runner:1", "ws", "loom.test");
        (api.clone(), Provisioner::new(api, template))
    }

    #[tokio::test]
    async fn test_ensure_creates_all_then_is_idempotent() {
        let (api, prov) = provisioner();
        let first = prov.ensure("w1").await.unwrap();
        assert_eq!(first.deployment, EnsureOutcome::Created);
        assert_eq!(first.service, EnsureOutcome::Created);
        assert_eq!(first.ingress, EnsureOutcome::Created);

        api.set_available_replicas("w1", 1);
        let second = prov.ensure("w1").await.unwrap();
        assert_eq!(second.deployment, EnsureOutcome::Unchanged);
        assert_eq!(second.service, EnsureOutcome::Unchanged);
        assert_eq!(second.ingress, EnsureOutcome::Unchanged);

        for kind in [ResourceKind::Deployment, ResourceKind::Service, ResourceKind::Ingress] {
            assert_eq!(api.count(kind), 1);
            assert_eq!(api.create_calls(kind), 1);
        }
    }

    #[tokio::test]
    async fn test_zero_replicas_replaced_in_place() {
        let (api, prov) = provisioner();
        prov.ensure("w1").await.unwrap();
        let before = api.resource(ResourceKind::Deployment, "w1").unwrap();

        let report = prov.ensure("w1").await.unwrap();
        assert_eq!(report.deployment, EnsureOutcome::Replaced);
        assert_eq!(api.replace_calls(ResourceKind::Deployment), 1);
        assert_eq!(api.count(ResourceKind::Deployment), 1);

        let after = api.resource(ResourceKind::Deployment, "w1").unwrap();
        assert_ne!(
            before["metadata"]["resourceVersion"],
            after["metadata"]["resourceVersion"]
        );
    }

    #[tokio::test]
    async fn test_existing_service_left_alone() {
        let (api, prov) = provisioner();
        api.insert(
            ResourceKind::Service,
            "w1",
            serde_json::json!({"metadata": {"name": "w1"}, "custom": true}),
        );
        let report = prov.ensure("w1").await.unwrap();
        assert_eq!(report.service, EnsureOutcome::Unchanged);
        assert_eq!(api.resource(ResourceKind::Service, "w1").unwrap()["custom"], true);
    }

    #[tokio::test]
    async fn test_concurrent_ensure_single_create() {
        let api = Arc::new(FakeComputeApi::new().with_latency(Duration::from_millis(5)));
        let prov = Arc::new(Provisioner::new(
            api.clone(),
            ManifestTemplate::new("runner:1", "ws", "loom.test"),
        ));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let prov = prov.clone();
                tokio::spawn(async move { prov.ensure("race").await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        for kind in [ResourceKind::Deployment, ResourceKind::Service, ResourceKind::Ingress] {
            assert_eq!(api.count(kind), 1);
            assert_eq!(api.create_calls(kind), 1);
        }
    }

    #[tokio::test]
    async fn test_teardown_order_and_idempotence() {
        let (api, prov) = provisioner();
        prov.ensure("w1").await.unwrap();

        let report = prov.teardown("w1").await.unwrap();
        assert_eq!(report.ingress, TeardownOutcome::Deleted);
        assert_eq!(report.deployment, TeardownOutcome::Deleted);
        assert_eq!(
            api.delete_log(),
            vec![
                (ResourceKind::Ingress, "w1".to_string()),
                (ResourceKind::Service, "w1".to_string()),
                (ResourceKind::Deployment, "w1".to_string()),
            ]
        );

        let again = prov.teardown("w1").await.unwrap();
        assert_eq!(again.service, TeardownOutcome::Absent);
    }

    #[tokio::test]
    async fn test_teardown_attempts_all_and_surfaces_failure() {
        let (api, prov) = provisioner();
        prov.ensure("w1").await.unwrap();
        api.fail_deletes_with(ResourceKind::Service, 500);

        let err = prov.teardown("w1").await.unwrap_err();
        assert!(matches!(err, ComputeError::Api { status: 500, .. }));
        assert!(!api.exists(ResourceKind::Ingress, "w1"));
        assert!(!api.exists(ResourceKind::Deployment, "w1"));
        assert!(api.exists(ResourceKind::Service, "w1"));
    }

    #[tokio::test]
    async fn test_invalid_workspace_id() {
        let (api, prov) = provisioner();
        assert!(matches!(
            prov.ensure("Bad_Id").await,
            Err(ComputeError::Manifest(_))
        ));
        assert_eq!(api.create_calls(ResourceKind::Deployment), 0);
    }
}
