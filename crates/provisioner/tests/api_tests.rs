//! Integration tests for the provisioner API endpoints

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::Utc;
use compute_provisioner::{
    api::{create_router, AppState},
    cluster::DetachedCluster,
};
use provisioner_lib::{
    autoscale::{
        AttemptStore, AutoscaleCoordinator, CommandNodeProvisioner, InMemoryAttemptStore,
        InMemoryRunStore, NodeCommandConfig,
    },
    catalog::{CatalogResolver, PreferenceSnapshot, ScopePreferences},
    health::{components, HealthRegistry},
    InstanceOffering, PriceModel, ProvisionerMetrics,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower::ServiceExt;

fn offering(instance_type: &str, region: &str, price_model: PriceModel) -> InstanceOffering {
    InstanceOffering {
        instance_type: instance_type.into(),
        region: region.into(),
        price_model,
        vcpu: 2,
        memory_gb: 8.0,
        gpu_count: 0,
        price_per_unit: 0.1,
        sku: String::new(),
        published_at: Utc::now(),
    }
}

struct TestApp {
    router: Router,
    state: Arc<AppState>,
    attempts: Arc<InMemoryAttemptStore>,
}

async fn setup_test_app() -> TestApp {
    let health_registry = HealthRegistry::new();
    health_registry.register_all().await;

    let mut preferences = PreferenceSnapshot::default();
    preferences.regions.insert(
        "eu-west-1".into(),
        ScopePreferences {
            instance_types: Some("c5.*".into()),
            ..Default::default()
        },
    );
    let resolver = CatalogResolver::new("us-east-1").with_preferences(preferences);
    resolver.refresh_catalog(vec![
        offering("m5.large", "us-east-1", PriceModel::OnDemand),
        offering("m5.large", "us-east-1", PriceModel::Spot),
        offering("c5.large", "eu-west-1", PriceModel::OnDemand),
        offering("m5.large", "eu-west-1", PriceModel::OnDemand),
    ]);

    let attempts = Arc::new(InMemoryAttemptStore::new());
    let coordinator = AutoscaleCoordinator::builder()
        .resolver(Arc::new(resolver))
        .cluster(Arc::new(DetachedCluster))
        .provisioner(Arc::new(CommandNodeProvisioner::new(
            NodeCommandConfig::default(),
        )))
        .runs(Arc::new(InMemoryRunStore::new()))
        .attempts(attempts.clone())
        .build()
        .unwrap();

    let state = Arc::new(AppState::new(
        health_registry,
        ProvisionerMetrics::new(),
        Arc::new(coordinator),
    ));
    let router = create_router(state.clone());

    TestApp {
        router,
        state,
        attempts,
    }
}

async fn get(app: &TestApp, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

async fn post_json(app: &TestApp, uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, value)
}

fn run_json(id: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "podId": id,
        "owner": "analyst@example.com",
        "dockerImage": "library/ubuntu:22.04",
        "launchCommand": "run.sh",
        "instance": {"nodeType": "m5.large", "diskGb": 50, "spot": true}
    })
}

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let app = setup_test_app().await;

    let (status, health) = get(&app, "/healthz").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");
}

#[tokio::test]
async fn test_healthz_returns_ok_when_degraded() {
    let app = setup_test_app().await;
    app.state
        .health_registry
        .set_degraded(components::COORDINATOR, "Cycle overran its interval")
        .await;

    let (status, health) = get(&app, "/healthz").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "degraded");
}

#[tokio::test]
async fn test_healthz_returns_503_when_cluster_unreachable() {
    let app = setup_test_app().await;
    app.state
        .health_registry
        .set_unhealthy(components::CLUSTER, "connection refused")
        .await;

    let (status, health) = get(&app, "/healthz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(health["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_waits_for_catalog() {
    let app = setup_test_app().await;

    let (status, readiness) = get(&app, "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(readiness["ready"], false);

    app.state.health_registry.set_ready(true).await;
    let (status, readiness) = get(&app, "/readyz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(readiness["ready"], true);
}

#[tokio::test]
async fn test_metrics_endpoint_exposes_provisioner_metrics() {
    let app = setup_test_app().await;
    app.state.metrics.inc_budget_exhausted();

    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("compute_provisioner_budget_exhausted_total"));
}

#[tokio::test]
async fn test_allowed_instances_default_region() {
    let app = setup_test_app().await;

    let (status, allowed) = get(&app, "/api/v1/allowed-instances").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(allowed["region"], "us-east-1");
    assert_eq!(allowed["instanceTypes"], serde_json::json!(["m5.large"]));
    assert_eq!(allowed["priceTypes"], serde_json::json!(["spot", "on_demand"]));
}

#[tokio::test]
async fn test_allowed_instances_region_policy_and_all() {
    let app = setup_test_app().await;

    let (_, allowed) = get(&app, "/api/v1/allowed-instances?regionId=eu-west-1").await;
    assert_eq!(allowed["instanceTypes"], serde_json::json!(["c5.large"]));

    let (_, all) = get(&app, "/api/v1/allowed-instances?regionId=eu-west-1&all=true").await;
    assert_eq!(all["instanceTypes"], serde_json::json!(["c5.large", "m5.large"]));
}

#[tokio::test]
async fn test_catalog_filtered_by_region() {
    let app = setup_test_app().await;

    let (status, catalog) = get(&app, "/api/v1/catalog?regionId=eu-west-1").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(catalog["generation"], 1);
    assert_eq!(catalog["offerings"].as_array().unwrap().len(), 2);
    assert_eq!(catalog["regions"], serde_json::json!(["eu-west-1", "us-east-1"]));
    assert_eq!(catalog["fingerprint"].as_str().unwrap().len(), 64);
}

#[tokio::test]
async fn test_attempts_snapshot() {
    let app = setup_test_app().await;
    app.attempts.record_failure("12", true).await;
    app.attempts.record_failure("12", false).await;

    let (status, body) = get(&app, "/api/v1/attempts").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["attempts"]["12"]["totalAttempts"], 2);
    assert_eq!(body["attempts"]["12"]["spotAttempts"], 1);
    assert_eq!(body["exhausted"], serde_json::json!([]));
}

#[tokio::test]
async fn test_register_and_list_runs() {
    let app = setup_test_app().await;

    let (status, created) = post_json(&app, "/api/v1/runs", run_json("5")).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "pending");

    let (status, _) = post_json(&app, "/api/v1/runs", run_json("5")).await;
    assert_eq!(status, StatusCode::OK);

    post_json(&app, "/api/v1/runs", run_json("3")).await;
    let (status, runs) = get(&app, "/api/v1/runs").await;
    assert_eq!(status, StatusCode::OK);

    let ids: Vec<&str> = runs
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["3", "5"]);
}

#[tokio::test]
async fn test_register_run_rejects_blank_id() {
    let app = setup_test_app().await;

    let (status, body) = post_json(&app, "/api/v1/runs", run_json(" ")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("run id"));
}

#[tokio::test]
async fn test_register_run_rejects_malformed_body() {
    let app = setup_test_app().await;

    let mut body = BTreeMap::new();
    body.insert("id", "7");
    let (status, _) = post_json(&app, "/api/v1/runs", serde_json::json!(body)).await;

    assert!(status.is_client_error());
}
