//! End-to-end swap scenarios over in-memory components.

use std::sync::Arc;

use vecswap_core::{IndexKind, MetricsConfig, SwapConfig, epoch_secs};
use vecswap_metrics::MetricsAggregator;
use vecswap_router::TrafficRouter;
use vecswap_state::{
    BuildStats, IndexRepository, IndexVersion, MemoryRepository, RollbackCause, SwapOperation,
    SwapPhase, VersionRegistry, VersionStatus,
};
use vecswap_swap::{SwapController, SwapError, SwapOptions};

const GIB: u64 = 1 << 30;
const WINDOW: u64 = 60;

struct Harness {
    registry: Arc<VersionRegistry>,
    router: Arc<TrafficRouter>,
    metrics: Arc<MetricsAggregator>,
    controller: Arc<SwapController>,
    t0: u64,
}

fn swap_config() -> SwapConfig {
    SwapConfig {
        tick_secs: 5,
        step_percent: 10,
        step_interval_secs: WINDOW,
        default_rollback_threshold: 0.10,
        min_step_samples: 10,
        baseline_timeout_secs: 900,
        benchmark_queries: 100,
        retire_grace_secs: 600,
    }
}

fn stats(vectors: u64) -> BuildStats {
    BuildStats {
        vector_count: vectors,
        expected_vector_count: Some(600_000),
        memory_bytes: GIB,
        build_duration_ms: 30_000,
    }
}

fn ready_version(registry: &VersionRegistry, id: &str, dimensions: u32, vectors: u64) {
    registry
        .register(IndexVersion::building(id, IndexKind::InvertedFile, dimensions, 10))
        .unwrap();
    registry.complete_build(id, &stats(vectors)).unwrap();
}

fn harness() -> Harness {
    let h = harness_without_traffic();
    // Source baseline: one closed window at 50ms.
    h.serve_window(h.t0, &[("v1", 50.0)]);
    h
}

fn harness_without_traffic() -> Harness {
    let repo: Arc<dyn IndexRepository> = Arc::new(MemoryRepository::new());
    let registry = Arc::new(VersionRegistry::new(repo.clone()));
    registry
        .bootstrap(IndexVersion {
            vector_count: 520_000,
            memory_bytes: 2 * GIB,
            ..IndexVersion::building("v1", IndexKind::Flat, 384, 0)
        })
        .unwrap();
    ready_version(&registry, "v2", 384, 600_000);

    let router = Arc::new(TrafficRouter::with_active("v1"));
    let metrics = Arc::new(MetricsAggregator::new(
        repo,
        &MetricsConfig {
            window_secs: WINDOW,
            history_limit: 10,
        },
        8 * GIB,
    ));
    let controller = Arc::new(SwapController::new(
        registry.clone(),
        router.clone(),
        metrics.clone(),
        swap_config(),
        8 * GIB,
    ));
    Harness {
        registry,
        router,
        metrics,
        controller,
        t0: epoch_secs(),
    }
}

impl Harness {
    /// One full window of traffic starting at `start`, closed at `start + WINDOW`.
    fn serve_window(&self, start: u64, versions: &[(&str, f64)]) {
        for (id, _) in versions {
            self.metrics.register(id);
        }
        self.metrics.close_windows_at(start).unwrap();
        for (id, latency) in versions {
            for _ in 0..20 {
                self.metrics.record_sample(id, *latency, true);
            }
        }
        self.metrics.close_windows_at(start + WINDOW).unwrap();
    }

    /// Begin the v1 → v2 swap and run the validation tick.
    async fn start_migration(&self) -> (SwapOperation, u64) {
        self.start_migration_with(SwapOptions {
            rollback_threshold: Some(0.10),
            ..SwapOptions::default()
        })
        .await
    }

    async fn start_migration_with(&self, options: SwapOptions) -> (SwapOperation, u64) {
        let at = self.t0 + WINDOW;
        let op = self.controller.begin_swap_with_at("v2", options, at).await.unwrap();
        assert_eq!(op.phase, SwapPhase::Validating);
        let op = self.controller.tick_at(at).await.unwrap().unwrap();
        assert_eq!(op.phase, SwapPhase::Migrating, "{:?}", op.reasons);
        (op, at)
    }

    /// Serve a window at the given target latency, then tick at its close.
    async fn step(&self, at: u64, target_ms: f64) -> SwapOperation {
        self.serve_window(at, &[("v1", 50.0), ("v2", target_ms)]);
        self.controller.tick_at(at + WINDOW).await.unwrap().unwrap()
    }

    fn split_total(&self) -> u32 {
        self.router.split().iter().map(|(_, p)| *p as u32).sum()
    }
}

#[tokio::test]
async fn dimension_mismatch_fails_without_moving_traffic() {
    let h = harness();
    ready_version(&h.registry, "v3", 768, 600_000);

    let err = h
        .controller
        .begin_swap_at("v3", None, h.t0 + WINDOW)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SwapError::DimensionMismatch {
            active: 384,
            target: 768
        }
    ));

    let swaps = h.controller.list_swaps().unwrap();
    assert_eq!(swaps.len(), 1);
    assert_eq!(swaps[0].phase, SwapPhase::Failed);
    assert_eq!(swaps[0].traffic_percentage, 0);
    assert_eq!(swaps[0].validation_results["dimensions"], false);
    assert_eq!(h.router.target_percentage(), 0);
    assert!(h.controller.current_swap().is_none());

    // Nothing is in flight, so a valid swap may start.
    h.controller.begin_swap_at("v2", None, h.t0 + WINDOW).await.unwrap();
}

#[tokio::test]
async fn regression_at_forty_percent_rolls_back() {
    let h = harness();
    let (_, mut at) = h.start_migration().await;

    for expected in [20, 30, 40] {
        let op = h.step(at, 50.0).await;
        assert_eq!(op.phase, SwapPhase::Migrating);
        assert_eq!(op.traffic_percentage, expected);
        at += WINDOW;
    }

    let op = h.step(at, 80.0).await;
    assert_eq!(op.phase, SwapPhase::RollingBack);
    assert_eq!(op.rollback_cause, Some(RollbackCause::Regression));
    assert_eq!(op.traffic_percentage, 0);
    assert_eq!(h.router.target_percentage(), 0);
    assert_eq!(h.router.split(), vec![("v1".to_string(), 100)]);

    let op = h.controller.tick_at(at + WINDOW + 5).await.unwrap().unwrap();
    assert_eq!(op.phase, SwapPhase::RolledBack);
    assert!(op.ended_at.is_some());

    assert_eq!(h.registry.active_version().unwrap().id, "v1");
    let target = h.registry.get("v2").unwrap();
    assert_eq!(target.status, VersionStatus::Ready);
    assert!(target.review_reason.as_deref().unwrap().contains("p95 regression"));
    assert!(h.controller.current_swap().is_none());
}

#[tokio::test]
async fn flagged_target_needs_review_before_retry() {
    let h = harness();
    let (_, at) = h.start_migration().await;
    h.step(at, 90.0).await;
    h.controller.tick_at(at + 2 * WINDOW).await.unwrap();

    let err = h.controller.begin_swap("v2", None).await.unwrap_err();
    assert!(matches!(err, SwapError::UnderReview { .. }));

    h.registry.clear_review("v2").unwrap();
    h.controller.begin_swap("v2", None).await.unwrap();
}

#[tokio::test]
async fn clean_migration_completes_and_promotes() {
    let h = harness();
    let (first, mut at) = h.start_migration().await;

    let mut percentages = vec![first.traffic_percentage];
    let mut last = first;
    for _ in 0..20 {
        last = h.step(at, 50.0).await;
        at += WINDOW;
        assert_eq!(h.split_total(), 100);
        if last.is_terminal() {
            break;
        }
        percentages.push(last.traffic_percentage);
    }

    assert_eq!(last.phase, SwapPhase::Completed);
    assert!(percentages.windows(2).all(|w| w[0] <= w[1]), "{percentages:?}");
    assert_eq!(*percentages.last().unwrap(), 100);

    assert_eq!(h.registry.get("v1").unwrap().status, VersionStatus::Retiring);
    assert_eq!(h.registry.active_version().unwrap().id, "v2");
    let table = h.router.table();
    assert_eq!(table.active.as_deref(), Some("v2"));
    assert!(table.target.is_none());
    assert_eq!(h.router.route("any-client").unwrap(), "v2");
}

#[tokio::test]
async fn retired_source_removed_after_grace() {
    let h = harness();
    let (_, mut at) = h.start_migration().await;
    loop {
        let op = h.step(at, 50.0).await;
        at += WINDOW;
        if op.is_terminal() {
            break;
        }
    }

    assert!(h.controller.tick_at(at + 10).await.unwrap().is_none());
    assert!(h.registry.get("v1").is_ok());

    h.controller.tick_at(at + 700).await.unwrap();
    assert!(h.registry.get("v1").is_err());
}

#[tokio::test]
async fn no_advance_without_post_shift_window() {
    let h = harness();
    let (_, at) = h.start_migration().await;

    // Ticks without any new traffic keep the split where it is.
    for offset in [5, 60, 120, 600] {
        let op = h.controller.tick_at(at + offset).await.unwrap().unwrap();
        assert_eq!(op.traffic_percentage, 10);
    }
}

#[tokio::test]
async fn concurrent_begin_swap_admits_exactly_one() {
    let h = harness();
    ready_version(&h.registry, "v3", 384, 600_000);

    let a = tokio::spawn({
        let c = h.controller.clone();
        async move { c.begin_swap("v2", None).await }
    });
    let b = tokio::spawn({
        let c = h.controller.clone();
        async move { c.begin_swap("v3", None).await }
    });
    let results = [a.await.unwrap(), b.await.unwrap()];

    let ok = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(SwapError::SwapAlreadyInProgress(_))))
        .count();
    assert_eq!((ok, conflicts), (1, 1));
}

#[tokio::test]
async fn begin_swap_preconditions() {
    let h = harness();
    h.registry
        .register(IndexVersion::building("v3", IndexKind::Flat, 384, 20))
        .unwrap();

    assert!(matches!(
        h.controller.begin_swap("v3", None).await,
        Err(SwapError::VersionNotReady {
            status: VersionStatus::Building,
            ..
        })
    ));
    assert!(matches!(
        h.controller.begin_swap("v1", None).await,
        Err(SwapError::VersionNotReady {
            status: VersionStatus::Active,
            ..
        })
    ));
    assert!(matches!(
        h.controller.begin_swap("v2", Some(-0.5)).await,
        Err(SwapError::InvalidThreshold(_))
    ));
    assert!(matches!(
        h.controller.begin_swap("v9", None).await,
        Err(SwapError::Registry(_))
    ));

    h.controller.begin_swap("v2", None).await.unwrap();
    assert!(matches!(
        h.controller.begin_swap("v2", None).await,
        Err(SwapError::SwapAlreadyInProgress(_))
    ));
}

#[tokio::test]
async fn validation_failure_leaves_target_ready() {
    let h = harness();
    h.registry
        .register(IndexVersion::building("v3", IndexKind::InvertedFile, 384, 20))
        .unwrap();
    h.registry.complete_build("v3", &stats(550_000)).unwrap();

    h.controller.begin_swap_at("v3", None, h.t0 + WINDOW).await.unwrap();
    let op = h.controller.tick_at(h.t0 + WINDOW).await.unwrap().unwrap();
    assert_eq!(op.phase, SwapPhase::Failed);
    assert_eq!(op.validation_results["integrity"], false);
    assert_eq!(op.traffic_percentage, 0);
    assert_eq!(h.router.target_percentage(), 0);

    let target = h.registry.get("v3").unwrap();
    assert_eq!(target.status, VersionStatus::Ready);
    assert!(target.review_reason.is_none());
}

#[tokio::test]
async fn cancel_rolls_back_to_cancelled() {
    let h = harness();
    let (op, at) = h.start_migration().await;
    assert_eq!(h.router.target_percentage(), 10);

    let cancelled = h.controller.cancel(&op.id).await.unwrap();
    assert_eq!(cancelled.phase, SwapPhase::RollingBack);
    assert_eq!(h.router.target_percentage(), 0);

    let done = h.controller.tick_at(at + 5).await.unwrap().unwrap();
    assert_eq!(done.phase, SwapPhase::Cancelled);
    assert!(h.registry.get("v2").unwrap().review_reason.is_none());

    // Terminal swaps cannot be cancelled again.
    assert!(matches!(
        h.controller.cancel(&op.id).await,
        Err(SwapError::NotCancellable {
            phase: SwapPhase::Cancelled,
            ..
        })
    ));
}

#[tokio::test]
async fn cancel_outside_migration_is_rejected() {
    let h = harness();
    let op = h.controller.begin_swap("v2", None).await.unwrap();
    assert!(matches!(
        h.controller.cancel(&op.id).await,
        Err(SwapError::NotCancellable {
            phase: SwapPhase::Validating,
            ..
        })
    ));
    assert!(matches!(
        h.controller.cancel("missing").await,
        Err(SwapError::NotFound(_))
    ));
}

#[tokio::test]
async fn restart_mid_migration_rolls_back() {
    let h = harness();
    h.start_migration().await;
    assert_eq!(h.router.target_percentage(), 10);

    let restarted = SwapController::new(
        h.registry.clone(),
        h.router.clone(),
        h.metrics.clone(),
        swap_config(),
        8 * GIB,
    );
    let resolved = restarted.recover().unwrap();
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].phase, SwapPhase::RolledBack);
    assert_eq!(resolved[0].rollback_cause, Some(RollbackCause::Restart));
    assert!(resolved[0].reasons.iter().any(|r| r == "controller restarted"));
    assert_eq!(h.router.split(), vec![("v1".to_string(), 100)]);

    // A fresh swap can start after recovery.
    restarted.begin_swap("v2", None).await.unwrap();
}

#[tokio::test]
async fn restart_mid_promotion_finishes_promotion() {
    let h = harness();
    h.start_migration().await;
    // Crash after the source was demoted but before the target was promoted.
    h.registry
        .set_status("v1", VersionStatus::Retiring)
        .unwrap();

    let resolved = h.controller.recover().unwrap();
    assert_eq!(resolved[0].phase, SwapPhase::Completed);
    assert_eq!(h.registry.active_version().unwrap().id, "v2");
    assert_eq!(h.router.route("k").unwrap(), "v2");
}

#[tokio::test]
async fn auto_swap_picks_newest_matching_version() {
    let h = harness();
    ready_version(&h.registry, "v3", 768, 600_000);

    let op = h.controller.begin_auto_swap().await.unwrap().unwrap();
    assert_eq!(op.target_version_id, "v2");
    assert!(h.controller.begin_auto_swap().await.unwrap().is_none());
}

#[tokio::test]
async fn missing_source_baseline_blocks_promotion() {
    let h = harness_without_traffic();
    let (op, mut at) = h.start_migration().await;
    assert!(op.baseline_p95_ms.is_none());
    assert_eq!(op.traffic_percentage, 10);

    // A slow target with nothing to compare against is never advanced.
    for _ in 0..5 {
        h.serve_window(at, &[("v2", 5_000.0)]);
        let op = h.controller.tick_at(at + WINDOW).await.unwrap().unwrap();
        at += WINDOW;
        assert_eq!(op.phase, SwapPhase::Migrating);
        assert_eq!(op.traffic_percentage, 10);
        assert_eq!(h.registry.active_version().unwrap().id, "v1");
    }

    // Source traffic arrives: the baseline is captured and the slow target
    // is judged against it.
    h.serve_window(at, &[("v1", 50.0), ("v2", 5_000.0)]);
    let op = h.controller.tick_at(at + WINDOW).await.unwrap().unwrap();
    let baseline = op.baseline_p95_ms.unwrap();
    assert!((baseline - 50.0).abs() / 50.0 <= 0.05, "{baseline}");
    assert_eq!(op.phase, SwapPhase::RollingBack);
    assert_eq!(op.rollback_cause, Some(RollbackCause::Regression));
}

#[tokio::test]
async fn missing_source_baseline_times_out_into_rollback() {
    let h = harness_without_traffic();
    let (op, at) = h.start_migration().await;

    let waiting = h.controller.tick_at(op.started_at + 899).await.unwrap().unwrap();
    assert_eq!(waiting.phase, SwapPhase::Migrating);

    h.serve_window(at, &[("v2", 40.0)]);
    let op = h.controller.tick_at(op.started_at + 900).await.unwrap().unwrap();
    assert_eq!(op.phase, SwapPhase::RollingBack);
    assert_eq!(op.rollback_cause, Some(RollbackCause::NoBaseline));
    assert_eq!(h.router.split(), vec![("v1".to_string(), 100)]);

    let done = h.controller.tick_at(op.started_at + 905).await.unwrap().unwrap();
    assert_eq!(done.phase, SwapPhase::RolledBack);
    assert!(h.registry.get("v2").unwrap().review_reason.is_none());
    assert_eq!(h.registry.active_version().unwrap().id, "v1");
}

#[tokio::test]
async fn one_shot_cutover_moves_all_traffic_at_once() {
    let h = harness();
    let (op, at) = h
        .start_migration_with(SwapOptions {
            gradual_migration: false,
            ..SwapOptions::default()
        })
        .await;
    assert!(!op.gradual_migration);
    assert_eq!(op.traffic_percentage, 100);
    assert_eq!(h.router.target_percentage(), 100);
    assert_eq!(h.router.route("any-client").unwrap(), "v2");
    assert_eq!(h.split_total(), 100);

    let op = h.step(at, 50.0).await;
    assert_eq!(op.phase, SwapPhase::Completed);
    assert_eq!(h.registry.active_version().unwrap().id, "v2");
}

#[tokio::test]
async fn one_shot_cutover_still_rolls_back_on_regression() {
    let h = harness();
    let (_, at) = h
        .start_migration_with(SwapOptions {
            gradual_migration: false,
            ..SwapOptions::default()
        })
        .await;

    let op = h.step(at, 90.0).await;
    assert_eq!(op.phase, SwapPhase::RollingBack);
    assert_eq!(h.router.split(), vec![("v1".to_string(), 100)]);
}

#[tokio::test]
async fn regression_is_recorded_when_rollback_disabled() {
    let h = harness();
    let (op, at) = h
        .start_migration_with(SwapOptions {
            rollback_on_regression: false,
            ..SwapOptions::default()
        })
        .await;
    assert!(!op.rollback_on_regression);

    let op = h.step(at, 80.0).await;
    assert_eq!(op.phase, SwapPhase::Migrating);
    assert_eq!(op.traffic_percentage, 20);
    let noted: Vec<_> = op.reasons.iter().filter(|r| r.contains("rollback disabled")).collect();
    assert_eq!(noted.len(), 1, "{:?}", op.reasons);

    // Repeated ticks inside the same step do not repeat the note.
    let op = h.controller.tick_at(at + WINDOW + 5).await.unwrap().unwrap();
    assert_eq!(op.reasons.iter().filter(|r| r.contains("rollback disabled")).count(), 1);
    assert!(h.registry.get("v2").unwrap().review_reason.is_none());
}

#[tokio::test]
async fn last_finished_swap_survives_terminal_phase() {
    let h = harness();
    assert!(h.controller.last_finished_swap().unwrap().is_none());

    let (_, at) = h.start_migration().await;
    h.step(at, 90.0).await;
    h.controller.tick_at(at + 2 * WINDOW).await.unwrap();

    assert!(h.controller.current_swap().is_none());
    let last = h.controller.last_finished_swap().unwrap().unwrap();
    assert_eq!(last.phase, SwapPhase::RolledBack);
    assert!(last.reasons.iter().any(|r| r.contains("p95 regression")));
}
