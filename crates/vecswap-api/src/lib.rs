//! vecswap-api — HTTP control surface for vecswap.
//!
//! Thin axum handlers over the registry, trigger evaluator, router, swap
//! controller, and build coordinator. Every JSON response uses the
//! `{success, data?, error?}` envelope.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/index/build` | Request a new index build |
//! | POST | `/api/v1/index/versions/{id}/build-result` | Build-job completion callback |
//! | GET | `/api/v1/index/versions` | List versions |
//! | GET | `/api/v1/index/versions/{id}` | Get one version |
//! | GET | `/api/v1/index/versions/{id}/metrics` | Closed metrics windows, newest first |
//! | POST | `/api/v1/index/versions/{id}/clear-review` | Clear the operator-review flag |
//! | POST | `/api/v1/index/swap` | Begin a swap |
//! | GET | `/api/v1/index/swaps` | List swap operations |
//! | GET | `/api/v1/index/swaps/{id}` | Get one swap operation |
//! | POST | `/api/v1/index/swap/{id}/cancel` | Cancel a migrating swap |
//! | GET | `/api/v1/index/status` | Active version, in-flight swap, last trigger decision |
//! | PUT | `/api/v1/index/trigger/config` | Replace trigger thresholds |
//! | POST | `/api/v1/index/route` | Route a query key |
//! | POST | `/api/v1/index/samples` | Record served-query samples |
//! | GET | `/metrics` | Prometheus exposition |

pub mod handlers;
mod response;
pub mod swap_handlers;
#[cfg(test)]
mod test_support;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};

use vecswap_build::BuildCoordinator;
use vecswap_metrics::MetricsAggregator;
use vecswap_router::TrafficRouter;
use vecswap_state::VersionRegistry;
use vecswap_swap::SwapController;
use vecswap_trigger::TriggerEvaluator;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub registry: Arc<VersionRegistry>,
    pub metrics: Arc<MetricsAggregator>,
    pub evaluator: Arc<TriggerEvaluator>,
    pub router: Arc<TrafficRouter>,
    pub controller: Arc<SwapController>,
    pub coordinator: Arc<BuildCoordinator>,
}

/// Build the complete router (REST + Prometheus).
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/index/build", post(handlers::request_build))
        .route("/index/versions", get(handlers::list_versions))
        .route("/index/versions/{id}", get(handlers::get_version))
        .route("/index/versions/{id}/build-result", post(handlers::build_result))
        .route("/index/versions/{id}/metrics", get(handlers::version_metrics))
        .route("/index/versions/{id}/clear-review", post(handlers::clear_review))
        .route("/index/swap", post(swap_handlers::begin_swap))
        .route("/index/swap/{id}/cancel", post(swap_handlers::cancel_swap))
        .route("/index/swaps", get(swap_handlers::list_swaps))
        .route("/index/swaps/{id}", get(swap_handlers::get_swap))
        .route("/index/status", get(handlers::status))
        .route("/index/trigger/config", put(handlers::update_trigger_config))
        .route("/index/route", post(handlers::route_query))
        .route("/index/samples", post(handlers::record_samples))
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::prometheus_metrics).with_state(state))
}
