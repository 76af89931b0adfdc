//! Assembles the control plane from a `ManagerConfig` and runs it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use vecswap_api::ApiState;
use vecswap_build::{BuildCoordinator, BuildExecutor, DetachedExecutor, HttpBuildExecutor, HttpIndexProbe};
use vecswap_core::{ManagerConfig, epoch_secs};
use vecswap_metrics::MetricsAggregator;
use vecswap_router::TrafficRouter;
use vecswap_state::{IndexRepository, IndexVersion, StateStore, VersionRegistry};
use vecswap_swap::SwapController;
use vecswap_trigger::{RecommendCallback, RecommendFuture, TriggerAssessment, TriggerEvaluator};

/// Every long-lived component, wired together.
pub struct Services {
    pub registry: Arc<VersionRegistry>,
    pub metrics: Arc<MetricsAggregator>,
    pub evaluator: Arc<TriggerEvaluator>,
    pub router: Arc<TrafficRouter>,
    pub controller: Arc<SwapController>,
    pub coordinator: Arc<BuildCoordinator>,
    trigger_interval: Duration,
}

impl Services {
    /// Build every component over `repo`, bootstrap an empty registry from
    /// `[bootstrap]`, and resolve swaps interrupted by a previous process.
    pub fn assemble(config: &ManagerConfig, repo: Arc<dyn IndexRepository>) -> anyhow::Result<Self> {
        let registry = Arc::new(VersionRegistry::new(repo.clone()));

        if let Some(boot) = &config.bootstrap {
            if registry.list()?.is_empty() {
                registry.bootstrap(IndexVersion {
                    vector_count: boot.vector_count,
                    memory_bytes: boot.memory_bytes,
                    ..IndexVersion::building(
                        &boot.version_id,
                        boot.index_kind,
                        config.index.dimensions,
                        epoch_secs(),
                    )
                })?;
            } else {
                info!("registry not empty, skipping bootstrap");
            }
        }

        let metrics = Arc::new(MetricsAggregator::new(
            repo,
            &config.metrics,
            config.index.memory_budget_bytes,
        ));
        metrics.sync_with_registry()?;

        let router = Arc::new(TrafficRouter::new());
        let mut controller = SwapController::new(
            registry.clone(),
            router.clone(),
            metrics.clone(),
            config.swap.clone(),
            config.index.memory_budget_bytes,
        );
        if let Some(probe) = HttpIndexProbe::from_config(&config.build) {
            controller = controller.with_probe(probe);
        } else {
            info!("no index probe configured, validation benchmark will be skipped");
        }
        let controller = Arc::new(controller);

        let resolved = controller.recover()?;
        if !resolved.is_empty() {
            warn!(count = resolved.len(), "resolved swaps left over from previous run");
        }

        let executor: Arc<dyn BuildExecutor> = match HttpBuildExecutor::from_config(&config.build) {
            Some(executor) => Arc::new(executor),
            None => {
                info!("no build service configured, builds must report back externally");
                Arc::new(DetachedExecutor)
            }
        };
        let coordinator = Arc::new(BuildCoordinator::new(
            registry.clone(),
            executor,
            config.index.dimensions,
        ));

        let mut evaluator = TriggerEvaluator::new(config.trigger.thresholds.clone());
        if config.trigger.auto_swap {
            evaluator = evaluator.with_recommend_fn(auto_swap(controller.clone()));
            info!("automatic swaps enabled");
        }

        Ok(Self {
            registry,
            metrics,
            evaluator: Arc::new(evaluator),
            router,
            controller,
            coordinator,
            trigger_interval: Duration::from_secs(config.trigger.interval_secs),
        })
    }

    pub fn api_state(&self) -> ApiState {
        ApiState {
            registry: self.registry.clone(),
            metrics: self.metrics.clone(),
            evaluator: self.evaluator.clone(),
            router: self.router.clone(),
            controller: self.controller.clone(),
            coordinator: self.coordinator.clone(),
        }
    }

    /// Start the metrics, trigger, and swap loops.
    pub fn spawn_loops(&self, shutdown: &watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let metrics = self.metrics.clone();
        let metrics_shutdown = shutdown.clone();
        let metrics_handle = tokio::spawn(async move {
            metrics.run(metrics_shutdown).await;
        });

        let evaluator = self.evaluator.clone();
        let registry = self.registry.clone();
        let trigger_metrics = self.metrics.clone();
        let interval = self.trigger_interval;
        let trigger_shutdown = shutdown.clone();
        let trigger_handle = tokio::spawn(async move {
            evaluator
                .run(registry, trigger_metrics, interval, trigger_shutdown)
                .await;
        });

        let controller = self.controller.clone();
        let swap_shutdown = shutdown.clone();
        let swap_handle = tokio::spawn(async move {
            controller.run(swap_shutdown).await;
        });

        vec![metrics_handle, trigger_handle, swap_handle]
    }
}

/// Begin a swap to the newest eligible version on every recommendation.
fn auto_swap(controller: Arc<SwapController>) -> RecommendCallback {
    Box::new(move |assessment: TriggerAssessment| {
        let controller = controller.clone();
        Box::pin(async move {
            match controller.begin_auto_swap().await? {
                Some(op) => info!(
                    swap = %op.id,
                    target = %op.target_version_id,
                    reasons = ?assessment.reasons,
                    "automatic swap started"
                ),
                None => info!(version = %assessment.version_id, "migration recommended, no ready version to swap to"),
            }
            Ok(())
        }) as RecommendFuture
    })
}

/// Run the daemon until Ctrl-C.
pub async fn run(config: ManagerConfig) -> anyhow::Result<()> {
    info!("vecswap daemon starting");

    let data_dir = &config.server.data_dir;
    std::fs::create_dir_all(data_dir)?;
    let db_path = data_dir.join("vecswap.redb");
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let services = Services::assemble(&config, Arc::new(store))?;
    match services.registry.active_version() {
        Ok(active) => info!(version = %active.id, kind = %active.index_kind, "serving active version"),
        Err(_) => warn!("no active version; configure [bootstrap] or register one"),
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = services.spawn_loops(&shutdown_rx);

    let router = vecswap_api::build_router(services.api_state());
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!(%addr, "API server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for ctrl-c");
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    for handle in handles {
        let _ = handle.await;
    }
    info!("vecswap daemon stopped");
    Ok(())
}
