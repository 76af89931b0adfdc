//! Version, build, status, and query-path handlers.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};

use vecswap_build::{BuildOutcome, BuildRequest};
use vecswap_core::MigrationTriggerConfig;
use vecswap_state::{IndexVersion, RegistryError, SwapOperation, VersionStatus};
use vecswap_trigger::TriggerAssessment;

use crate::ApiState;
use crate::response::{
    ApiResponse, coordinator_status, error_response, registry_error, router_status, state_error,
    swap_error,
};

const DEFAULT_HISTORY: usize = 20;

// ── Builds ─────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct BuildAccepted {
    pub version_id: String,
    pub status: VersionStatus,
}

/// POST /api/v1/index/build
pub async fn request_build(
    State(state): State<ApiState>,
    Json(req): Json<BuildRequest>,
) -> impl IntoResponse {
    match state.coordinator.request_build(req).await {
        Ok(version) => (
            StatusCode::ACCEPTED,
            ApiResponse::ok(BuildAccepted {
                version_id: version.id,
                status: version.status,
            }),
        )
            .into_response(),
        Err(e) => error_response(&e.to_string(), coordinator_status(&e)),
    }
}

/// POST /api/v1/index/versions/{id}/build-result
pub async fn build_result(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(outcome): Json<BuildOutcome>,
) -> impl IntoResponse {
    match state.coordinator.complete(&id, outcome) {
        Ok(version) => {
            state.metrics.register(&version.id);
            state.metrics.set_memory_bytes(&version.id, version.memory_bytes);
            ApiResponse::ok(version).into_response()
        }
        Err(e) => error_response(&e.to_string(), coordinator_status(&e)),
    }
}

// ── Versions ───────────────────────────────────────────────────

/// GET /api/v1/index/versions
pub async fn list_versions(State(state): State<ApiState>) -> impl IntoResponse {
    match state.registry.list() {
        Ok(versions) => ApiResponse::ok(versions).into_response(),
        Err(e) => registry_error(e),
    }
}

/// GET /api/v1/index/versions/{id}
pub async fn get_version(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.registry.get(&id) {
        Ok(version) => ApiResponse::ok(version).into_response(),
        Err(e) => registry_error(e),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

/// GET /api/v1/index/versions/{id}/metrics
pub async fn version_metrics(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    if let Err(e) = state.registry.get(&id) {
        return registry_error(e);
    }
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY);
    match state.registry.repository().list_snapshots(&id, limit) {
        Ok(snapshots) => ApiResponse::ok(snapshots).into_response(),
        Err(e) => state_error(e),
    }
}

/// POST /api/v1/index/versions/{id}/clear-review
pub async fn clear_review(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.registry.clear_review(&id) {
        Ok(version) => ApiResponse::ok(version).into_response(),
        Err(e) => registry_error(e),
    }
}

// ── Status ─────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct TrafficShare {
    pub version_id: String,
    pub percentage: u8,
}

/// Read model for `GET /index/status`.
#[derive(Debug, Serialize)]
pub struct IndexStatus {
    pub active_version: Option<IndexVersion>,
    /// The in-flight swap, if any.
    pub swap: Option<SwapOperation>,
    /// The most recently ended swap, with its reasons and validation results.
    pub last_swap: Option<SwapOperation>,
    pub traffic: Vec<TrafficShare>,
    pub trigger: Option<TriggerAssessment>,
}

/// GET /api/v1/index/status
pub async fn status(State(state): State<ApiState>) -> impl IntoResponse {
    let active_version = match state.registry.active_version() {
        Ok(v) => Some(v),
        Err(RegistryError::NoActiveVersion) => None,
        Err(e) => return registry_error(e),
    };
    let last_swap = match state.controller.last_finished_swap() {
        Ok(op) => op,
        Err(e) => return swap_error(e),
    };
    let traffic = state
        .router
        .split()
        .into_iter()
        .map(|(version_id, percentage)| TrafficShare {
            version_id,
            percentage,
        })
        .collect();

    ApiResponse::ok(IndexStatus {
        active_version,
        swap: state.controller.current_swap(),
        last_swap,
        traffic,
        trigger: state.evaluator.last_assessment(),
    })
    .into_response()
}

// ── Trigger ────────────────────────────────────────────────────

/// PUT /api/v1/index/trigger/config
pub async fn update_trigger_config(
    State(state): State<ApiState>,
    Json(config): Json<MigrationTriggerConfig>,
) -> impl IntoResponse {
    match state.evaluator.set_config(config) {
        Ok(()) => ApiResponse::ok(state.evaluator.config()).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::BAD_REQUEST),
    }
}

// ── Query path ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RouteRequest {
    pub query_key: String,
}

#[derive(Debug, Serialize)]
pub struct RouteDecision {
    pub version_id: String,
}

/// POST /api/v1/index/route
pub async fn route_query(
    State(state): State<ApiState>,
    Json(req): Json<RouteRequest>,
) -> impl IntoResponse {
    match state.router.route(&req.query_key) {
        Ok(version_id) => ApiResponse::ok(RouteDecision { version_id }).into_response(),
        Err(e) => error_response(&e.to_string(), router_status(&e)),
    }
}

fn served() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct Sample {
    pub version_id: String,
    pub latency_ms: f64,
    /// End-to-end time of the request that issued the query, if known.
    #[serde(default)]
    pub request_ms: Option<f64>,
    #[serde(default = "served")]
    pub success: bool,
}

fn valid_ms(ms: f64) -> bool {
    ms.is_finite() && ms >= 0.0
}

#[derive(Debug, Deserialize)]
pub struct SamplesRequest {
    pub samples: Vec<Sample>,
}

#[derive(Debug, Serialize)]
pub struct SamplesRecorded {
    pub recorded: usize,
}

/// POST /api/v1/index/samples
///
/// The batch is rejected whole if any timing is negative or not finite, or
/// if any sample names a version that is not serving.
pub async fn record_samples(
    State(state): State<ApiState>,
    Json(req): Json<SamplesRequest>,
) -> impl IntoResponse {
    if let Some(bad) = req
        .samples
        .iter()
        .find(|s| !valid_ms(s.latency_ms) || s.request_ms.is_some_and(|ms| !valid_ms(ms)))
    {
        return error_response(
            &format!("invalid timing for {}", bad.version_id),
            StatusCode::BAD_REQUEST,
        );
    }

    let mut checked: Vec<&str> = Vec::new();
    for sample in &req.samples {
        if checked.contains(&sample.version_id.as_str()) {
            continue;
        }
        match state.registry.get(&sample.version_id) {
            Ok(v) if matches!(
                v.status,
                VersionStatus::Ready | VersionStatus::Active | VersionStatus::Retiring
            ) => checked.push(&sample.version_id),
            Ok(v) => {
                return error_response(
                    &format!("version {} is not serving ({})", v.id, v.status),
                    StatusCode::CONFLICT,
                );
            }
            Err(e) => return registry_error(e),
        }
    }

    for sample in &req.samples {
        match sample.request_ms {
            Some(request_ms) => state.metrics.record_request_sample(
                &sample.version_id,
                sample.latency_ms,
                request_ms,
                sample.success,
            ),
            None => state
                .metrics
                .record_sample(&sample.version_id, sample.latency_ms, sample.success),
        }
    }
    ApiResponse::ok(SamplesRecorded {
        recorded: req.samples.len(),
    })
    .into_response()
}

// ── Prometheus ─────────────────────────────────────────────────

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let body = vecswap_metrics::render_prometheus(&state.metrics.snapshots(), &state.router.split());
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}
