//! HTTP API for health checks, Prometheus metrics and management queries

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use prometheus::{Encoder, TextEncoder};
use provisioner_lib::{
    autoscale::AutoscaleCoordinator,
    health::{ComponentStatus, HealthRegistry},
    InstanceOffering, ProvisionError, ProvisionerMetrics, RunRecord, ScaleAttemptState,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: ProvisionerMetrics,
    pub coordinator: Arc<AutoscaleCoordinator>,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        metrics: ProvisionerMetrics,
        coordinator: Arc<AutoscaleCoordinator>,
    ) -> Self {
        Self {
            health_registry,
            metrics,
            coordinator,
        }
    }
}

/// Error body for management endpoints
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<ProvisionError> for ApiError {
    fn from(err: ProvisionError) -> Self {
        let status = match err {
            ProvisionError::RunNotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 once the catalog is loaded
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowedQuery {
    pub tool_id: Option<String>,
    pub region_id: Option<String>,
    #[serde(default)]
    pub all: bool,
}

async fn allowed_instances(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AllowedQuery>,
) -> impl IntoResponse {
    let allowed = state.coordinator.resolver().allowed_instance_and_price_types(
        query.tool_id.as_deref(),
        query.region_id.as_deref(),
        query.all,
    );
    Json(allowed)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogQuery {
    pub region_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogResponse {
    pub generation: u64,
    pub fingerprint: String,
    pub regions: Vec<String>,
    pub offerings: Vec<InstanceOffering>,
    pub served_at: DateTime<Utc>,
}

async fn catalog(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CatalogQuery>,
) -> impl IntoResponse {
    let view = state.coordinator.resolver().view();
    let snapshot = view.catalog();

    let offerings = snapshot
        .offerings()
        .iter()
        .filter(|o| query.region_id.as_deref().map_or(true, |r| o.region == r))
        .cloned()
        .collect();

    Json(CatalogResponse {
        generation: snapshot.generation(),
        fingerprint: snapshot.fingerprint().to_string(),
        regions: snapshot.regions().into_iter().map(str::to_string).collect(),
        offerings,
        served_at: Utc::now(),
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptsResponse {
    pub attempts: BTreeMap<String, ScaleAttemptState>,
    /// Runs failed for lack of capacity
    pub exhausted: Vec<String>,
}

async fn attempts(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(AttemptsResponse {
        attempts: state.coordinator.attempts().snapshot().await,
        exhausted: state.coordinator.exhausted_runs(),
    })
}

async fn list_runs(State(state): State<Arc<AppState>>) -> Result<Json<Vec<RunRecord>>, ApiError> {
    let runs = state.coordinator.runs().list_runs().await?;
    Ok(Json(runs))
}

async fn upsert_run(
    State(state): State<Arc<AppState>>,
    Json(run): Json<RunRecord>,
) -> Result<impl IntoResponse, ApiError> {
    if run.id.trim().is_empty() {
        return Err(ApiError::bad_request("run id must not be empty"));
    }
    if run.instance.node_type.trim().is_empty() {
        return Err(ApiError::bad_request("instance nodeType must not be empty"));
    }

    let existed = state.coordinator.runs().load_run(&run.id).await?.is_some();
    state.coordinator.runs().upsert_run(run.clone()).await?;
    info!(run_id = %run.id, updated = existed, "Run registered");

    let status = if existed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(run)))
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/v1/allowed-instances", get(allowed_instances))
        .route("/api/v1/catalog", get(catalog))
        .route("/api/v1/attempts", get(attempts))
        .route("/api/v1/runs", get(list_runs).post(upsert_run))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
