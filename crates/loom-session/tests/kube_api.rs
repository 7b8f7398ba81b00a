//! `KubeComputeApi` and `Provisioner` against a mocked API server.

use std::sync::Arc;

use loom_session::{
    ComputeApi, ComputeError, EnsureOutcome, KubeComputeApi, ManifestTemplate, Provisioner,
    ResourceKind, TeardownOutcome,
};
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const NS: &str = "workspaces";

fn api(server: &MockServer) -> KubeComputeApi {
    KubeComputeApi::builder()
        .base_url(server.uri())
        .token("sekret")
        .namespace(NS)
        .build()
        .unwrap()
}

fn not_found() -> ResponseTemplate {
    ResponseTemplate::new(404).set_body_json(json!({
        "kind": "Status",
        "status": "Failure",
        "reason": "NotFound",
        "code": 404,
        "message": "not found"
    }))
}

#[tokio::test]
async fn test_get_sends_bearer_and_maps_404_to_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/apis/apps/v1/namespaces/workspaces/deployments/ws1"))
        .and(header("authorization", "Bearer sekret"))
        .respond_with(not_found())
        .expect(1)
        .mount(&server)
        .await;

    let result = api(&server).get(ResourceKind::Deployment, "ws1").await.unwrap();
    assert!(result.is_none());
}

#[tokio::test]
async fn test_create_conflict_and_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/namespaces/workspaces/services"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({"message": "exists"})))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/v1/namespaces/workspaces/services/ws1"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({"message": "etcd timeout"})))
        .mount(&server)
        .await;

    let api = api(&server);
    let err = api
        .create(ResourceKind::Service, &json!({"metadata": {"name": "ws1"}}))
        .await
        .unwrap_err();
    assert!(matches!(err, ComputeError::Conflict(ref name) if name == "ws1"));

    let err = api.delete(ResourceKind::Service, "ws1").await.unwrap_err();
    match err {
        ComputeError::Api { status, message } => {
            assert_eq!(status, 503);
            assert_eq!(message, "etcd timeout");
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn test_ensure_creates_missing_resources() {
    let server = MockServer::start().await;
    for collection in [
        "/apis/apps/v1/namespaces/workspaces/deployments",
        "/api/v1/namespaces/workspaces/services",
        "/apis/networking.k8s.io/v1/namespaces/workspaces/ingresses",
    ] {
        Mock::given(method("GET"))
            .and(path(format!("{collection}/ws1")))
            .respond_with(not_found())
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(collection))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;
    }

    let provisioner = Provisioner::new(
        Arc::new(api(&server)),
        ManifestTemplate::new("runner:1", NS, "loom.test"),
    );
    let report = provisioner.ensure("ws1").await.unwrap();
    assert_eq!(report.deployment, EnsureOutcome::Created);
    assert_eq!(report.service, EnsureOutcome::Created);
    assert_eq!(report.ingress, EnsureOutcome::Created);
}

#[tokio::test]
async fn test_ensure_leaves_healthy_deployment_alone() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/apis/apps/v1/namespaces/workspaces/deployments/ws1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "metadata": {"name": "ws1", "resourceVersion": "7"},
            "status": {"availableReplicas": 1}
        })))
        .mount(&server)
        .await;
    for item in [
        "/api/v1/namespaces/workspaces/services/ws1",
        "/apis/networking.k8s.io/v1/namespaces/workspaces/ingresses/ws1",
    ] {
        Mock::given(method("GET"))
            .and(path(item))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"metadata": {"name": "ws1"}})))
            .mount(&server)
            .await;
    }
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let provisioner = Provisioner::new(
        Arc::new(api(&server)),
        ManifestTemplate::new("runner:1", NS, "loom.test"),
    );
    let report = provisioner.ensure("ws1").await.unwrap();
    assert_eq!(report.deployment, EnsureOutcome::Unchanged);
    assert_eq!(report.service, EnsureOutcome::Unchanged);
}

#[tokio::test]
async fn test_teardown_treats_404_as_done() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/apis/networking.k8s.io/v1/namespaces/workspaces/ingresses/ws1"))
        .respond_with(not_found())
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/v1/namespaces/workspaces/services/ws1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/apis/apps/v1/namespaces/workspaces/deployments/ws1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let provisioner = Provisioner::new(
        Arc::new(api(&server)),
        ManifestTemplate::new("runner:1", NS, "loom.test"),
    );
    let report = provisioner.teardown("ws1").await.unwrap();
    assert_eq!(report.ingress, TeardownOutcome::Absent);
    assert_eq!(report.service, TeardownOutcome::Deleted);
    assert_eq!(report.deployment, TeardownOutcome::Deleted);
}
