use std::sync::Arc;

use axum::response::Response;

use vecswap_build::{BuildCoordinator, DetachedExecutor};
use vecswap_core::{IndexKind, MetricsConfig, MigrationTriggerConfig, SwapConfig};
use vecswap_metrics::MetricsAggregator;
use vecswap_router::TrafficRouter;
use vecswap_state::{IndexRepository, IndexVersion, MemoryRepository, VersionRegistry};
use vecswap_swap::SwapController;
use vecswap_trigger::TriggerEvaluator;

use crate::ApiState;

pub(crate) const GIB: u64 = 1 << 30;

/// In-memory state with `v1` (384 dims) active.
pub(crate) fn test_state() -> ApiState {
    let repo: Arc<dyn IndexRepository> = Arc::new(MemoryRepository::new());
    let registry = Arc::new(VersionRegistry::new(repo.clone()));
    registry
        .bootstrap(IndexVersion {
            vector_count: 450_000,
            memory_bytes: GIB,
            ..IndexVersion::building("v1", IndexKind::Flat, 384, 0)
        })
        .unwrap();

    let router = Arc::new(TrafficRouter::with_active("v1"));
    let metrics = Arc::new(MetricsAggregator::new(repo, &MetricsConfig::default(), 8 * GIB));
    let controller = Arc::new(SwapController::new(
        registry.clone(),
        router.clone(),
        metrics.clone(),
        SwapConfig::default(),
        8 * GIB,
    ));
    let coordinator = Arc::new(BuildCoordinator::new(
        registry.clone(),
        Arc::new(DetachedExecutor),
        384,
    ));

    ApiState {
        registry,
        metrics,
        evaluator: Arc::new(TriggerEvaluator::new(MigrationTriggerConfig::default())),
        router,
        controller,
        coordinator,
    }
}

pub(crate) async fn body_json(resp: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub(crate) async fn body_text(resp: Response) -> String {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}
