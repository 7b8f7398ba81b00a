//! Parameterized Deployment/Service/Ingress manifests for one workspace.

use serde_json::{Value, json};

use crate::compute::ResourceKind;
use crate::error::{ComputeError, ComputeResult};

/// Container port the runner listens on unless configured otherwise.
pub const DEFAULT_CONTAINER_PORT: u16 = 3001;

/// Label key tying every resource to its workspace.
pub const WORKSPACE_LABEL: &str = "workspace";

/// Shared inputs for rendering a workspace's resources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestTemplate {
    pub image: String,
    pub namespace: String,
    pub domain: String,
    pub container_port: u16,
}

impl ManifestTemplate {
    pub fn new(image: impl Into<String>, namespace: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            namespace: namespace.into(),
            domain: domain.into(),
            container_port: DEFAULT_CONTAINER_PORT,
        }
    }

    pub fn with_container_port(mut self, port: u16) -> Self {
        self.container_port = port;
        self
    }

    /// Bind the template to a workspace id, validating it as a resource name.
    pub fn for_workspace(&self, workspace_id: &str) -> ComputeResult<ManifestParams> {
        validate_resource_name(workspace_id)?;
        Ok(ManifestParams {
            workspace_id: workspace_id.to_string(),
            image: self.image.clone(),
            namespace: self.namespace.clone(),
            domain: self.domain.clone(),
            container_port: self.container_port,
        })
    }
}

/// Everything needed to render one workspace's manifests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestParams {
    pub workspace_id: String,
    pub image: String,
    pub namespace: String,
    pub domain: String,
    pub container_port: u16,
}

impl ManifestParams {
    /// Resource name shared by all three kinds.
    pub fn name(&self) -> &str {
        &self.workspace_id
    }

    pub fn host(&self) -> String {
        format!("{}.{}", self.workspace_id, self.domain)
    }

    pub fn render(&self, kind: ResourceKind) -> Value {
        match kind {
            ResourceKind::Deployment => self.deployment(),
            ResourceKind::Service => self.service(),
            ResourceKind::Ingress => self.ingress(),
        }
    }

    fn metadata(&self) -> Value {
        json!({
            "name": self.workspace_id,
            "namespace": self.namespace,
            "labels": { WORKSPACE_LABEL: self.workspace_id },
        })
    }

    fn deployment(&self) -> Value {
        json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": self.metadata(),
            "spec": {
                "replicas": 1,
                "selector": { "matchLabels": { WORKSPACE_LABEL: self.workspace_id } },
                "template": {
                    "metadata": { "labels": { WORKSPACE_LABEL: self.workspace_id } },
                    "spec": {
                        "containers": [{
                            "name": "runner",
                            "image": self.image,
                            "ports": [{ "containerPort": self.container_port }],
                            "env": [{ "name": "WORKSPACE_ID", "value": self.workspace_id }],
                        }]
                    }
                }
            }
        })
    }

    fn service(&self) -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": self.metadata(),
            "spec": {
                "selector": { WORKSPACE_LABEL: self.workspace_id },
                "ports": [{
                    "protocol": "TCP",
                    "port": 80,
                    "targetPort": self.container_port,
                }]
            }
        })
    }

    fn ingress(&self) -> Value {
        json!({
            "apiVersion": "networking.k8s.io/v1",
            "kind": "Ingress",
            "metadata": self.metadata(),
            "spec": {
                "rules": [{
                    "host": self.host(),
                    "http": {
                        "paths": [{
                            "path": "/",
                            "pathType": "Prefix",
                            "backend": {
                                "service": {
                                    "name": self.workspace_id,
                                    "port": { "number": 80 }
                                }
                            }
                        }]
                    }
                }]
            }
        })
    }
}

/// DNS-1123 label: lowercase alphanumerics and `-`, alphanumeric at both
/// ends, at most 63 characters.
pub fn validate_resource_name(name: &str) -> ComputeResult<()> {
    let valid = !name.is_empty()
        && name.len() <= 63
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        && !name.starts_with('-')
        && !name.ends_with('-');
    if valid {
        Ok(())
    } else {
        Err(ComputeError::Manifest(format!(
            "'{}' is not a valid resource name",
            name
        )))
    }
}
