//! Kubernetes REST implementation of [`ComputeApi`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::compute::{ComputeApi, ResourceKind};
use crate::error::{ComputeError, ComputeResult};

/// Default timeout for orchestration requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Namespace used when none is configured.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Client for the namespaced Deployment/Service/Ingress endpoints.
///
/// ```no_run
/// use loom_session::KubeComputeApi;
///
/// # fn example() -> loom_session::ComputeResult<()> {
/// let api = KubeComputeApi::builder()
///     .base_url("https://kubernetes.default.svc")
///     .token("service-account-token")
///     .namespace("workspaces")
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct KubeComputeApi {
    inner: Arc<KubeInner>,
}

struct KubeInner {
    http: reqwest::Client,
    base_url: Url,
    namespace: String,
    timeout: Duration,
}

impl std::fmt::Debug for KubeComputeApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeComputeApi")
            .field("base_url", &self.inner.base_url.as_str())
            .field("namespace", &self.inner.namespace)
            .finish()
    }
}

impl KubeComputeApi {
    pub fn builder() -> KubeApiBuilder {
        KubeApiBuilder::new()
    }

    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internal HTTP helpers
    // ─────────────────────────────────────────────────────────────────────────

    fn collection_url(&self, kind: ResourceKind) -> ComputeResult<Url> {
        let path = format!(
            "{}/namespaces/{}/{}",
            kind.api_group_path(),
            self.inner.namespace,
            kind.plural()
        );
        self.inner.base_url.join(&path).map_err(ComputeError::from)
    }

    fn resource_url(&self, kind: ResourceKind, name: &str) -> ComputeResult<Url> {
        let mut url = self.collection_url(kind)?;
        url.path_segments_mut()
            .map_err(|_| ComputeError::Config("base_url cannot be a base".to_string()))?
            .push(name);
        Ok(url)
    }

    /// Map a non-success response to the error taxonomy.
    async fn extract_error(&self, response: reqwest::Response, name: &str) -> ComputeError {
        let status = response.status().as_u16();
        let message = match response.json::<Value>().await {
            Ok(body) => body
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("HTTP {}", status)),
            Err(_) => format!("HTTP {}", status),
        };
        match status {
            404 => ComputeError::NotFound(name.to_string()),
            409 => ComputeError::Conflict(name.to_string()),
            _ => ComputeError::Api { status, message },
        }
    }

    async fn expect_success(&self, response: reqwest::Response, name: &str) -> ComputeResult<()> {
        if response.status().is_success() {
            Ok(())
        } else {
            Err(self.extract_error(response, name).await)
        }
    }
}

fn manifest_name(manifest: &Value) -> &str {
    manifest
        .pointer("/metadata/name")
        .and_then(Value::as_str)
        .unwrap_or("<unnamed>")
}

#[async_trait]
impl ComputeApi for KubeComputeApi {
    async fn get(&self, kind: ResourceKind, name: &str) -> ComputeResult<Option<Value>> {
        let url = self.resource_url(kind, name)?;
        debug!(%kind, name, "GET resource");
        let response = self
            .inner
            .http
            .get(url)
            .timeout(self.inner.timeout)
            .send()
            .await?;
        if response.status().is_success() {
            return Ok(Some(response.json().await?));
        }
        match self.extract_error(response, name).await {
            ComputeError::NotFound(_) => Ok(None),
            err => Err(err),
        }
    }

    async fn create(&self, kind: ResourceKind, manifest: &Value) -> ComputeResult<()> {
        let url = self.collection_url(kind)?;
        let name = manifest_name(manifest);
        debug!(%kind, name, "POST resource");
        let response = self
            .inner
            .http
            .post(url)
            .json(manifest)
            .timeout(self.inner.timeout)
            .send()
            .await?;
        self.expect_success(response, name).await
    }

    async fn replace(&self, kind: ResourceKind, name: &str, manifest: &Value) -> ComputeResult<()> {
        let url = self.resource_url(kind, name)?;
        debug!(%kind, name, "PUT resource");
        let response = self
            .inner
            .http
            .put(url)
            .json(manifest)
            .timeout(self.inner.timeout)
            .send()
            .await?;
        self.expect_success(response, name).await
    }

    async fn delete(&self, kind: ResourceKind, name: &str) -> ComputeResult<()> {
        let url = self.resource_url(kind, name)?;
        debug!(%kind, name, "DELETE resource");
        let response = self
            .inner
            .http
            .delete(url)
            .timeout(self.inner.timeout)
            .send()
            .await?;
        self.expect_success(response, name).await
    }
}

/// Builder for [`KubeComputeApi`].
#[derive(Debug)]
pub struct KubeApiBuilder {
    base_url: Option<String>,
    token: Option<String>,
    namespace: String,
    timeout: Duration,
}

impl KubeApiBuilder {
    pub fn new() -> Self {
        Self {
            base_url: None,
            token: None,
            namespace: DEFAULT_NAMESPACE.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// API server URL, e.g. `https://kubernetes.default.svc`.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Bearer token (service-account token).
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> ComputeResult<KubeComputeApi> {
        let base_url = self
            .base_url
            .ok_or_else(|| ComputeError::Config("base_url is required".to_string()))?;

        let mut base_url = Url::parse(&base_url)?;
        if !base_url.path().ends_with('/') {
            base_url.set_path(&format!("{}/", base_url.path()));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(token) = self.token.as_deref().filter(|t| !t.is_empty()) {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| ComputeError::Config("Invalid bearer token".to_string()))?;
            headers.insert(AUTHORIZATION, value);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(format!("loom-session/{}", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(KubeComputeApi {
            inner: Arc::new(KubeInner {
                http,
                base_url,
                namespace: self.namespace,
                timeout: self.timeout,
            }),
        })
    }
}

impl Default for KubeApiBuilder {
    fn default() -> Self {
        Self::new()
    }
}
