//! In-memory orchestration API for tests.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};

use crate::compute::{ComputeApi, ResourceKind};
use crate::error::{ComputeError, ComputeResult};

#[derive(Default)]
struct FakeState {
    resources: HashMap<(ResourceKind, String), Value>,
    creates: HashMap<ResourceKind, usize>,
    replaces: HashMap<ResourceKind, usize>,
    deletes: HashMap<ResourceKind, usize>,
    delete_log: Vec<(ResourceKind, String)>,
    delete_failures: HashMap<ResourceKind, u16>,
    version: u64,
}

/// Stores manifests in memory and counts calls per kind.
///
/// Created Deployments report zero available replicas until
/// [`set_available_replicas`](Self::set_available_replicas) is called.
#[derive(Default)]
pub struct FakeComputeApi {
    state: Mutex<FakeState>,
    latency: Option<Duration>,
}

impl FakeComputeApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep before every call, widening race windows in concurrency tests.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Insert a resource as if someone else had created it.
    pub fn insert(&self, kind: ResourceKind, name: &str, manifest: Value) {
        self.state.lock().resources.insert((kind, name.to_string()), manifest);
    }

    pub fn set_available_replicas(&self, name: &str, replicas: u64) {
        let mut state = self.state.lock();
        if let Some(dep) = state
            .resources
            .get_mut(&(ResourceKind::Deployment, name.to_string()))
        {
            dep["status"] = json!({ "availableReplicas": replicas });
        }
    }

    /// Make every delete of `kind` fail with `status`.
    pub fn fail_deletes_with(&self, kind: ResourceKind, status: u16) {
        self.state.lock().delete_failures.insert(kind, status);
    }

    pub fn exists(&self, kind: ResourceKind, name: &str) -> bool {
        self.state.lock().resources.contains_key(&(kind, name.to_string()))
    }

    pub fn resource(&self, kind: ResourceKind, name: &str) -> Option<Value> {
        self.state.lock().resources.get(&(kind, name.to_string())).cloned()
    }

    /// Number of resources of `kind` currently stored.
    pub fn count(&self, kind: ResourceKind) -> usize {
        self.state.lock().resources.keys().filter(|(k, _)| *k == kind).count()
    }

    pub fn create_calls(&self, kind: ResourceKind) -> usize {
        self.state.lock().creates.get(&kind).copied().unwrap_or(0)
    }

    pub fn replace_calls(&self, kind: ResourceKind) -> usize {
        self.state.lock().replaces.get(&kind).copied().unwrap_or(0)
    }

    pub fn delete_calls(&self, kind: ResourceKind) -> usize {
        self.state.lock().deletes.get(&kind).copied().unwrap_or(0)
    }

    /// Every delete attempted, in call order.
    pub fn delete_log(&self) -> Vec<(ResourceKind, String)> {
        self.state.lock().delete_log.clone()
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

fn name_of(manifest: &Value) -> ComputeResult<String> {
    manifest
        .pointer("/metadata/name")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ComputeError::Manifest("metadata.name missing".to_string()))
}

#[async_trait]
impl ComputeApi for FakeComputeApi {
    async fn get(&self, kind: ResourceKind, name: &str) -> ComputeResult<Option<Value>> {
        self.delay().await;
        Ok(self.resource(kind, name))
    }

    async fn create(&self, kind: ResourceKind, manifest: &Value) -> ComputeResult<()> {
        self.delay().await;
        let name = name_of(manifest)?;
        let mut state = self.state.lock();
        *state.creates.entry(kind).or_default() += 1;
        let key = (kind, name.clone());
        if state.resources.contains_key(&key) {
            return Err(ComputeError::Conflict(name));
        }
        state.version += 1;
        let mut stored = manifest.clone();
        stored["metadata"]["resourceVersion"] = json!(state.version.to_string());
        state.resources.insert(key, stored);
        Ok(())
    }

    async fn replace(&self, kind: ResourceKind, name: &str, manifest: &Value) -> ComputeResult<()> {
        self.delay().await;
        let mut state = self.state.lock();
        *state.replaces.entry(kind).or_default() += 1;
        let key = (kind, name.to_string());
        if !state.resources.contains_key(&key) {
            return Err(ComputeError::NotFound(name.to_string()));
        }
        state.version += 1;
        let mut stored = manifest.clone();
        stored["metadata"]["resourceVersion"] = json!(state.version.to_string());
        state.resources.insert(key, stored);
        Ok(())
    }

    async fn delete(&self, kind: ResourceKind, name: &str) -> ComputeResult<()> {
        self.delay().await;
        let mut state = self.state.lock();
        *state.deletes.entry(kind).or_default() += 1;
        state.delete_log.push((kind, name.to_string()));
        if let Some(status) = state.delete_failures.get(&kind).copied() {
            return Err(ComputeError::Api {
                status,
                message: "injected failure".to_string(),
            });
        }
        match state.resources.remove(&(kind, name.to_string())) {
            Some(_) => Ok(()),
            None => Err(ComputeError::NotFound(name.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_conflict_and_delete() {
        let api = FakeComputeApi::new();
        let manifest = json!({"metadata": {"name": "a"}});
        api.create(ResourceKind::Service, &manifest).await.unwrap();
        assert!(
            api.create(ResourceKind::Service, &manifest)
                .await
                .unwrap_err()
                .is_conflict()
        );
        assert_eq!(api.count(ResourceKind::Service), 1);
        assert_eq!(api.create_calls(ResourceKind::Service), 2);

        api.delete(ResourceKind::Service, "a").await.unwrap();
        assert!(
            api.delete(ResourceKind::Service, "a")
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn test_injected_delete_failure() {
        let api = FakeComputeApi::new();
        api.fail_deletes_with(ResourceKind::Ingress, 503);
        let err = api.delete(ResourceKind::Ingress, "a").await.unwrap_err();
        assert!(matches!(err, ComputeError::Api { status: 503, .. }));
    }
}
