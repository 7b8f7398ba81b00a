//! The container-orchestration API as seen by the session engine.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ComputeResult;

/// Resource kinds backing one workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Deployment,
    Service,
    Ingress,
}

impl ResourceKind {
    /// Teardown order: traffic first, workload last.
    pub const TEARDOWN_ORDER: [ResourceKind; 3] = [
        ResourceKind::Ingress,
        ResourceKind::Service,
        ResourceKind::Deployment,
    ];

    /// REST collection path segment, e.g. `apis/apps/v1` + `deployments`.
    pub fn api_group_path(self) -> &'static str {
        match self {
            ResourceKind::Deployment => "apis/apps/v1",
            ResourceKind::Service => "api/v1",
            ResourceKind::Ingress => "apis/networking.k8s.io/v1",
        }
    }

    pub fn plural(self) -> &'static str {
        match self {
            ResourceKind::Deployment => "deployments",
            ResourceKind::Service => "services",
            ResourceKind::Ingress => "ingresses",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Deployment => write!(f, "Deployment"),
            ResourceKind::Service => write!(f, "Service"),
            ResourceKind::Ingress => write!(f, "Ingress"),
        }
    }
}

/// Create/read/replace/delete for workspace resources, keyed by name.
#[async_trait]
pub trait ComputeApi: Send + Sync {
    /// Current state of a resource, or `None` when it does not exist.
    async fn get(&self, kind: ResourceKind, name: &str) -> ComputeResult<Option<Value>>;

    /// Fails with `Conflict` when the resource already exists.
    async fn create(&self, kind: ResourceKind, manifest: &Value) -> ComputeResult<()>;

    /// Fails with `NotFound` when the resource does not exist.
    async fn replace(&self, kind: ResourceKind, name: &str, manifest: &Value) -> ComputeResult<()>;

    /// Fails with `NotFound` when the resource does not exist.
    async fn delete(&self, kind: ResourceKind, name: &str) -> ComputeResult<()>;
}

/// `status.availableReplicas` of a Deployment, 0 when absent.
pub fn available_replicas(deployment: &Value) -> u64 {
    deployment
        .pointer("/status/availableReplicas")
        .and_then(Value::as_u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_available_replicas() {
        assert_eq!(available_replicas(&json!({"status": {"availableReplicas": 2}})), 2);
        assert_eq!(available_replicas(&json!({"status": {}})), 0);
        assert_eq!(available_replicas(&json!({})), 0);
    }

    #[test]
    fn test_teardown_order() {
        assert_eq!(
            ResourceKind::TEARDOWN_ORDER,
            [
                ResourceKind::Ingress,
                ResourceKind::Service,
                ResourceKind::Deployment
            ]
        );
        assert_eq!(ResourceKind::Ingress.api_group_path(), "apis/networking.k8s.io/v1");
    }
}
