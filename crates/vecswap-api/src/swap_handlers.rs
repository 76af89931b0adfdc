//! Swap operation handlers.
//!
//! Begin, cancel, and inspect swaps. All decisions are made by the
//! controller; these handlers only translate its errors to status codes.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};

use vecswap_state::{SwapOperation, SwapPhase};
use vecswap_swap::SwapOptions;

use crate::ApiState;
use crate::response::{ApiResponse, swap_error};

/// Request body to begin a swap.
#[derive(Debug, Deserialize)]
pub struct BeginSwapRequest {
    pub target_version_id: String,
    /// Allowed p95 regression as a fraction; the configured default if absent.
    #[serde(default)]
    pub rollback_threshold: Option<f64>,
    /// Step traffic over gradually (default) or cut over in one shift.
    #[serde(default = "enabled")]
    pub gradual_migration: bool,
    /// Roll back automatically on a p95 regression (default).
    #[serde(default = "enabled")]
    pub rollback_on_regression: bool,
}

fn enabled() -> bool {
    true
}

impl BeginSwapRequest {
    fn options(&self) -> SwapOptions {
        SwapOptions {
            rollback_threshold: self.rollback_threshold,
            gradual_migration: self.gradual_migration,
            rollback_on_regression: self.rollback_on_regression,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SwapAccepted {
    pub swap_id: String,
    pub phase: SwapPhase,
    pub source_version_id: String,
    pub target_version_id: String,
    pub rollback_threshold: f64,
    pub gradual_migration: bool,
    pub rollback_on_regression: bool,
}

impl From<&SwapOperation> for SwapAccepted {
    fn from(op: &SwapOperation) -> Self {
        Self {
            swap_id: op.id.clone(),
            phase: op.phase,
            source_version_id: op.source_version_id.clone(),
            target_version_id: op.target_version_id.clone(),
            rollback_threshold: op.rollback_threshold,
            gradual_migration: op.gradual_migration,
            rollback_on_regression: op.rollback_on_regression,
        }
    }
}

/// POST /api/v1/index/swap
pub async fn begin_swap(
    State(state): State<ApiState>,
    Json(req): Json<BeginSwapRequest>,
) -> impl IntoResponse {
    match state
        .controller
        .begin_swap_with(&req.target_version_id, req.options())
        .await
    {
        Ok(op) => (StatusCode::ACCEPTED, ApiResponse::ok(SwapAccepted::from(&op))).into_response(),
        Err(e) => swap_error(e),
    }
}

/// POST /api/v1/index/swap/{id}/cancel
pub async fn cancel_swap(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.controller.cancel(&id).await {
        Ok(op) => ApiResponse::ok(op).into_response(),
        Err(e) => swap_error(e),
    }
}

/// GET /api/v1/index/swaps
pub async fn list_swaps(State(state): State<ApiState>) -> impl IntoResponse {
    match state.controller.list_swaps() {
        Ok(swaps) => ApiResponse::ok(swaps).into_response(),
        Err(e) => swap_error(e),
    }
}

/// GET /api/v1/index/swaps/{id}
pub async fn get_swap(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.controller.get_swap(&id) {
        Ok(op) => ApiResponse::ok(op).into_response(),
        Err(e) => swap_error(e),
    }
}
