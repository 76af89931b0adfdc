//! Migration trigger evaluation.
//!
//! [`assess`] is a pure function of snapshot, version, and thresholds.
//! [`TriggerEvaluator`] wraps it with the cooldown clock, holds the
//! runtime-replaceable config, and remembers the last assessment for the
//! status read model.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use vecswap_core::{ConfigError, MigrationTriggerConfig, epoch_secs};
use vecswap_metrics::MetricsAggregator;
use vecswap_state::{IndexVersion, PerformanceSnapshot, RegistryError, VersionRegistry};

/// Fraction of a threshold at which an early warning is raised.
const EARLY_WARNING_RATIO: f64 = 0.8;

pub const COOLDOWN_REASON: &str = "recommendation suppressed by cooldown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerDecision {
    NoAction,
    Recommended,
    EarlyWarning,
}

/// One evaluation result, as exposed by the status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerAssessment {
    pub decision: TriggerDecision,
    pub reasons: Vec<String>,
    pub version_id: String,
    pub vector_count: u64,
    pub p95_latency_ms: f64,
    pub memory_usage_percent: f64,
    pub search_latency_percent: f64,
    pub evaluated_at: u64,
}

/// Callback invoked with every `Recommended` assessment.
pub type RecommendCallback = Box<dyn Fn(TriggerAssessment) -> RecommendFuture + Send + Sync>;

pub type RecommendFuture = std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send>>;

/// Evaluate thresholds without any cooldown state.
///
/// Every exceeded threshold contributes a reason. Latency and search share
/// are only judged when the window actually saw traffic.
pub fn assess(
    snapshot: &PerformanceSnapshot,
    version: &IndexVersion,
    config: &MigrationTriggerConfig,
) -> (TriggerDecision, Vec<String>) {
    let mut exceeded = Vec::new();
    let mut approaching = Vec::new();

    if version.vector_count > config.vector_count_threshold {
        exceeded.push("vector_count exceeds threshold".to_string());
    } else if version.vector_count > config.early_warning_vector_count {
        approaching.push("vector_count approaching threshold".to_string());
    }

    if snapshot.has_samples() {
        let p95 = snapshot.p95_latency_ms;
        let warn_at = config
            .early_warning_latency_ms
            .min(config.p95_latency_threshold_ms * EARLY_WARNING_RATIO);
        if p95 > config.p95_latency_threshold_ms {
            exceeded.push("p95_latency exceeds threshold".to_string());
        } else if p95 > warn_at {
            approaching.push("p95_latency approaching threshold".to_string());
        }
    }

    let memory = snapshot.memory_usage_percent;
    if memory > config.memory_threshold_percent {
        exceeded.push("memory_usage exceeds threshold".to_string());
    } else if memory > config.memory_threshold_percent * EARLY_WARNING_RATIO {
        approaching.push("memory_usage approaching threshold".to_string());
    }

    if snapshot.has_samples() {
        let share = snapshot.search_latency_percent;
        if share > config.search_latency_threshold_percent {
            exceeded.push("search_latency_share exceeds threshold".to_string());
        } else if share > config.search_latency_threshold_percent * EARLY_WARNING_RATIO {
            approaching.push("search_latency_share approaching threshold".to_string());
        }
    }

    if !exceeded.is_empty() {
        (TriggerDecision::Recommended, exceeded)
    } else if !approaching.is_empty() {
        (TriggerDecision::EarlyWarning, approaching)
    } else {
        (TriggerDecision::NoAction, Vec::new())
    }
}

pub struct TriggerEvaluator {
    config: RwLock<MigrationTriggerConfig>,
    /// When the last `Recommended` was emitted.
    last_triggered_at: Mutex<Option<u64>>,
    last: RwLock<Option<TriggerAssessment>>,
    on_recommended: Option<RecommendCallback>,
}

impl TriggerEvaluator {
    pub fn new(config: MigrationTriggerConfig) -> Self {
        Self {
            config: RwLock::new(config),
            last_triggered_at: Mutex::new(None),
            last: RwLock::new(None),
            on_recommended: None,
        }
    }

    /// Set the callback run for every emitted recommendation.
    pub fn with_recommend_fn(mut self, f: RecommendCallback) -> Self {
        self.on_recommended = Some(f);
        self
    }

    pub fn config(&self) -> MigrationTriggerConfig {
        self.config.read().expect("trigger config lock").clone()
    }

    /// Replace thresholds after validation. The cooldown clock is kept.
    pub fn set_config(&self, config: MigrationTriggerConfig) -> Result<(), ConfigError> {
        config.validate()?;
        info!(
            vector_count_threshold = config.vector_count_threshold,
            p95_latency_threshold_ms = config.p95_latency_threshold_ms,
            memory_threshold_percent = config.memory_threshold_percent,
            cooldown_secs = config.cooldown_secs,
            "trigger config replaced"
        );
        *self.config.write().expect("trigger config lock") = config;
        Ok(())
    }

    pub fn last_assessment(&self) -> Option<TriggerAssessment> {
        self.last.read().expect("trigger assessment lock").clone()
    }

    pub fn evaluate(&self, snapshot: &PerformanceSnapshot, version: &IndexVersion) -> TriggerAssessment {
        self.evaluate_at(snapshot, version, epoch_secs())
    }

    /// Assess and apply the cooldown as of `now`.
    pub fn evaluate_at(
        &self,
        snapshot: &PerformanceSnapshot,
        version: &IndexVersion,
        now: u64,
    ) -> TriggerAssessment {
        let config = self.config();
        let (mut decision, mut reasons) = assess(snapshot, version, &config);

        if decision == TriggerDecision::Recommended {
            let mut last = self.last_triggered_at.lock().expect("trigger cooldown lock");
            let cooling = matches!(*last, Some(at) if now.saturating_sub(at) < config.cooldown_secs);
            if cooling {
                decision = TriggerDecision::EarlyWarning;
                reasons.push(COOLDOWN_REASON.to_string());
            } else {
                *last = Some(now);
            }
        }

        let assessment = TriggerAssessment {
            decision,
            reasons,
            version_id: version.id.clone(),
            vector_count: version.vector_count,
            p95_latency_ms: snapshot.p95_latency_ms,
            memory_usage_percent: snapshot.memory_usage_percent,
            search_latency_percent: snapshot.search_latency_percent,
            evaluated_at: now,
        };
        *self.last.write().expect("trigger assessment lock") = Some(assessment.clone());
        assessment
    }

    /// Evaluate the active version against its last closed window.
    ///
    /// Returns `None` while no version is active.
    pub async fn evaluate_active(
        &self,
        registry: &VersionRegistry,
        metrics: &MetricsAggregator,
    ) -> anyhow::Result<Option<TriggerAssessment>> {
        let active = match registry.active_version() {
            Ok(v) => v,
            Err(RegistryError::NoActiveVersion) => {
                debug!("no active version, skipping trigger evaluation");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let snapshot = metrics.snapshot(&active.id);
        let assessment = self.evaluate(&snapshot, &active);

        match assessment.decision {
            TriggerDecision::Recommended => {
                info!(
                    version = %active.id,
                    reasons = ?assessment.reasons,
                    "index migration recommended"
                );
                if let Some(ref f) = self.on_recommended
                    && let Err(e) = f(assessment.clone()).await
                {
                    warn!(version = %active.id, error = %e, "recommendation handler failed");
                }
            }
            TriggerDecision::EarlyWarning => {
                info!(version = %active.id, reasons = ?assessment.reasons, "index nearing migration thresholds");
            }
            TriggerDecision::NoAction => {
                debug!(version = %active.id, "no migration needed");
            }
        }
        Ok(Some(assessment))
    }

    /// Run the evaluation loop until shutdown.
    pub async fn run(
        &self,
        registry: Arc<VersionRegistry>,
        metrics: Arc<MetricsAggregator>,
        interval: Duration,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        info!(interval_secs = interval.as_secs(), "trigger evaluator started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.evaluate_active(&registry, &metrics).await {
                        error!(error = %e, "trigger evaluation failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("trigger evaluator shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use vecswap_core::{IndexKind, MetricsConfig};
    use vecswap_state::MemoryRepository;

    fn version(vector_count: u64) -> IndexVersion {
        IndexVersion {
            vector_count,
            ..IndexVersion::building("v1", IndexKind::Flat, 384, 0)
        }
    }

    fn snapshot(p95: f64, memory: f64) -> PerformanceSnapshot {
        PerformanceSnapshot {
            sample_count: 1000,
            p50_latency_ms: p95 / 2.0,
            p95_latency_ms: p95,
            p99_latency_ms: p95 * 1.2,
            memory_usage_percent: memory,
            ..PerformanceSnapshot::empty("v1", 0, 60)
        }
    }

    fn config() -> MigrationTriggerConfig {
        MigrationTriggerConfig::default()
    }

    #[test]
    fn vector_count_alone_recommends() {
        let (decision, reasons) = assess(&snapshot(50.0, 20.0), &version(500_001), &config());
        assert_eq!(decision, TriggerDecision::Recommended);
        assert_eq!(reasons, vec!["vector_count exceeds threshold".to_string()]);
    }

    #[test]
    fn all_thresholds_are_reported_together() {
        let (decision, reasons) = assess(&snapshot(250.0, 75.0), &version(600_000), &config());
        assert_eq!(decision, TriggerDecision::Recommended);
        assert_eq!(
            reasons,
            vec![
                "vector_count exceeds threshold".to_string(),
                "p95_latency exceeds threshold".to_string(),
                "memory_usage exceeds threshold".to_string(),
            ]
        );
    }

    #[test]
    fn exactly_at_threshold_is_not_exceeded() {
        let (decision, reasons) = assess(&snapshot(200.0, 50.0), &version(500_000), &config());
        assert_eq!(decision, TriggerDecision::EarlyWarning);
        assert!(reasons.iter().all(|r| r.ends_with("approaching threshold")));
        assert_eq!(reasons.len(), 3);
    }

    #[test]
    fn early_warning_on_vector_count() {
        let (decision, reasons) = assess(&snapshot(50.0, 20.0), &version(450_000), &config());
        assert_eq!(decision, TriggerDecision::EarlyWarning);
        assert_eq!(reasons, vec!["vector_count approaching threshold".to_string()]);
    }

    #[test]
    fn early_warning_on_latency() {
        let (decision, reasons) = assess(&snapshot(170.0, 20.0), &version(1_000), &config());
        assert_eq!(decision, TriggerDecision::EarlyWarning);
        assert_eq!(reasons, vec!["p95_latency approaching threshold".to_string()]);
    }

    #[test]
    fn early_warning_latency_below_ratio() {
        // 120ms is under 80% of 200ms but over the 100ms early-warning line.
        let (decision, reasons) = assess(&snapshot(120.0, 20.0), &version(1_000), &config());
        assert_eq!(decision, TriggerDecision::EarlyWarning);
        assert_eq!(reasons, vec!["p95_latency approaching threshold".to_string()]);

        let relaxed = MigrationTriggerConfig {
            early_warning_latency_ms: 150.0,
            ..config()
        };
        let (decision, _) = assess(&snapshot(120.0, 20.0), &version(1_000), &relaxed);
        assert_eq!(decision, TriggerDecision::NoAction);
    }

    #[test]
    fn search_share_recommends_alongside_others() {
        let heavy = PerformanceSnapshot {
            search_latency_percent: 35.0,
            ..snapshot(50.0, 20.0)
        };
        let (decision, reasons) = assess(&heavy, &version(600_000), &config());
        assert_eq!(decision, TriggerDecision::Recommended);
        assert_eq!(
            reasons,
            vec![
                "vector_count exceeds threshold".to_string(),
                "search_latency_share exceeds threshold".to_string(),
            ]
        );

        let nearing = PerformanceSnapshot {
            search_latency_percent: 18.0,
            ..snapshot(50.0, 20.0)
        };
        let (decision, reasons) = assess(&nearing, &version(1_000), &config());
        assert_eq!(decision, TriggerDecision::EarlyWarning);
        assert_eq!(reasons, vec!["search_latency_share approaching threshold".to_string()]);
    }

    #[test]
    fn healthy_index_needs_nothing() {
        let (decision, reasons) = assess(&snapshot(40.0, 10.0), &version(10_000), &config());
        assert_eq!(decision, TriggerDecision::NoAction);
        assert!(reasons.is_empty());
    }

    #[test]
    fn empty_window_skips_latency() {
        let empty = PerformanceSnapshot {
            p95_latency_ms: 9_999.0,
            ..PerformanceSnapshot::empty("v1", 0, 60)
        };
        let (decision, _) = assess(&empty, &version(10), &config());
        assert_eq!(decision, TriggerDecision::NoAction);
    }

    #[test]
    fn evaluation_is_idempotent_outside_cooldown() {
        let cfg = MigrationTriggerConfig {
            cooldown_secs: 0,
            ..config()
        };
        let evaluator = TriggerEvaluator::new(cfg);
        let a = evaluator.evaluate_at(&snapshot(250.0, 20.0), &version(600_000), 1000);
        let b = evaluator.evaluate_at(&snapshot(250.0, 20.0), &version(600_000), 1000);
        assert_eq!(a.decision, b.decision);
        assert_eq!(a.reasons, b.reasons);
    }

    #[test]
    fn cooldown_downgrades_repeat_recommendation() {
        let evaluator = TriggerEvaluator::new(config());
        let first = evaluator.evaluate_at(&snapshot(50.0, 20.0), &version(600_000), 1000);
        assert_eq!(first.decision, TriggerDecision::Recommended);

        let second = evaluator.evaluate_at(&snapshot(50.0, 20.0), &version(600_000), 1000 + 1800);
        assert_eq!(second.decision, TriggerDecision::EarlyWarning);
        assert_eq!(
            second.reasons,
            vec![
                "vector_count exceeds threshold".to_string(),
                COOLDOWN_REASON.to_string()
            ]
        );

        let third = evaluator.evaluate_at(&snapshot(50.0, 20.0), &version(600_000), 1000 + 3600);
        assert_eq!(third.decision, TriggerDecision::Recommended);
    }

    #[test]
    fn early_warning_ignores_cooldown() {
        let evaluator = TriggerEvaluator::new(config());
        evaluator.evaluate_at(&snapshot(50.0, 20.0), &version(600_000), 1000);
        let warning = evaluator.evaluate_at(&snapshot(50.0, 20.0), &version(450_000), 1010);
        assert_eq!(warning.decision, TriggerDecision::EarlyWarning);
        assert_eq!(warning.reasons, vec!["vector_count approaching threshold".to_string()]);
    }

    #[test]
    fn set_config_validates() {
        let evaluator = TriggerEvaluator::new(config());
        let bad = MigrationTriggerConfig {
            memory_threshold_percent: 140.0,
            ..config()
        };
        assert!(evaluator.set_config(bad).is_err());
        assert_eq!(evaluator.config(), config());

        let lower = MigrationTriggerConfig {
            vector_count_threshold: 1_000,
            early_warning_vector_count: 800,
            ..config()
        };
        evaluator.set_config(lower).unwrap();
        let a = evaluator.evaluate_at(&snapshot(50.0, 20.0), &version(2_000), 1000);
        assert_eq!(a.decision, TriggerDecision::Recommended);
    }

    #[test]
    fn last_assessment_is_remembered() {
        let evaluator = TriggerEvaluator::new(config());
        assert!(evaluator.last_assessment().is_none());
        evaluator.evaluate_at(&snapshot(50.0, 20.0), &version(10), 1000);
        let last = evaluator.last_assessment().unwrap();
        assert_eq!(last.decision, TriggerDecision::NoAction);
        assert_eq!(last.evaluated_at, 1000);
    }

    #[test]
    fn decision_serializes_snake_case() {
        let json = serde_json::to_string(&TriggerDecision::EarlyWarning).unwrap();
        assert_eq!(json, "\"early_warning\"");
    }

    fn components() -> (VersionRegistry, MetricsAggregator) {
        let repo = Arc::new(MemoryRepository::new());
        let registry = VersionRegistry::new(repo.clone());
        let metrics = MetricsAggregator::new(repo, &MetricsConfig::default(), 8 << 30);
        (registry, metrics)
    }

    #[tokio::test]
    async fn evaluate_active_skips_during_bootstrap() {
        let (registry, metrics) = components();
        let evaluator = TriggerEvaluator::new(config());
        assert!(evaluator.evaluate_active(&registry, &metrics).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn recommendation_invokes_callback() {
        let (registry, metrics) = components();
        registry
            .bootstrap(IndexVersion {
                vector_count: 750_000,
                ..IndexVersion::building("v1", IndexKind::Flat, 384, 0)
            })
            .unwrap();

        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let evaluator = TriggerEvaluator::new(config()).with_recommend_fn(Box::new(move |a| {
            let counter = counter.clone();
            Box::pin(async move {
                assert_eq!(a.version_id, "v1");
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }) as RecommendFuture
        }));

        let a = evaluator.evaluate_active(&registry, &metrics).await.unwrap().unwrap();
        assert_eq!(a.decision, TriggerDecision::Recommended);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Within cooldown: no second callback.
        evaluator.evaluate_active(&registry, &metrics).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
