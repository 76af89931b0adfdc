//! Swap controller — drives one `SwapOperation` at a time through
//! validation, stepped traffic migration, and completion or rollback.
//!
//! All mutations of the in-flight operation happen under one async mutex,
//! so `begin_swap`, `cancel`, and the tick loop never interleave. Readers
//! get the last persisted copy from an `ArcSwapOption` without waiting on
//! that mutex.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, error, info, warn};

use vecswap_build::IndexProbe;
use vecswap_core::{SwapConfig, epoch_secs};
use vecswap_metrics::MetricsAggregator;
use vecswap_router::TrafficRouter;
use vecswap_state::{
    RegistryError, RollbackCause, StatusChange, SwapOperation, SwapPhase,
    VersionRegistry, VersionStatus,
};

use crate::error::{SwapError, SwapResult};
use crate::validation::{CHECK_DIMENSIONS, check_dimensions, run_checklist};

pub const RESTART_REASON: &str = "controller restarted";

/// Baselines below this are judged as if they were this, so a near-zero
/// source p95 cannot turn every target window into a regression.
const MIN_BASELINE_MS: f64 = 0.01;

/// Per-swap options supplied with the request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SwapOptions {
    /// Allowed p95 regression as a fraction; the configured default when `None`.
    pub rollback_threshold: Option<f64>,
    /// Step traffic over; when false the target takes everything in one shift.
    pub gradual_migration: bool,
    /// Roll back on regression; when false regressions are only recorded.
    pub rollback_on_regression: bool,
}

impl Default for SwapOptions {
    fn default() -> Self {
        Self {
            rollback_threshold: None,
            gradual_migration: true,
            rollback_on_regression: true,
        }
    }
}

pub struct SwapController {
    registry: Arc<VersionRegistry>,
    router: Arc<TrafficRouter>,
    metrics: Arc<MetricsAggregator>,
    probe: Option<Arc<dyn IndexProbe>>,
    config: SwapConfig,
    memory_budget_bytes: u64,
    /// The non-terminal operation, if any.
    current: Mutex<Option<SwapOperation>>,
    /// Last saved copy of the in-flight operation.
    view: ArcSwapOption<SwapOperation>,
}

impl SwapController {
    pub fn new(
        registry: Arc<VersionRegistry>,
        router: Arc<TrafficRouter>,
        metrics: Arc<MetricsAggregator>,
        config: SwapConfig,
        memory_budget_bytes: u64,
    ) -> Self {
        Self {
            registry,
            router,
            metrics,
            probe: None,
            config,
            memory_budget_bytes,
            current: Mutex::new(None),
            view: ArcSwapOption::empty(),
        }
    }

    /// Use `probe` for the isolated benchmark check.
    pub fn with_probe(mut self, probe: Arc<dyn IndexProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn config(&self) -> &SwapConfig {
        &self.config
    }

    /// The in-flight operation, if any. Never blocks on the tick loop.
    pub fn current_swap(&self) -> Option<SwapOperation> {
        self.view.load_full().map(|op| op.as_ref().clone())
    }

    pub fn get_swap(&self, id: &str) -> SwapResult<SwapOperation> {
        self.registry
            .repository()
            .get_swap(id)?
            .ok_or_else(|| SwapError::NotFound(id.to_string()))
    }

    /// Every operation ever started, oldest first.
    pub fn list_swaps(&self) -> SwapResult<Vec<SwapOperation>> {
        Ok(self.registry.repository().list_swaps()?)
    }

    /// The most recently ended operation, whatever its outcome.
    pub fn last_finished_swap(&self) -> SwapResult<Option<SwapOperation>> {
        Ok(self
            .list_swaps()?
            .into_iter()
            .filter(|op| op.is_terminal())
            .max_by_key(|op| (op.ended_at, op.started_at)))
    }

    pub async fn begin_swap(
        &self,
        target_id: &str,
        rollback_threshold: Option<f64>,
    ) -> SwapResult<SwapOperation> {
        self.begin_swap_at(target_id, rollback_threshold, epoch_secs()).await
    }

    pub async fn begin_swap_at(
        &self,
        target_id: &str,
        rollback_threshold: Option<f64>,
        now: u64,
    ) -> SwapResult<SwapOperation> {
        let options = SwapOptions {
            rollback_threshold,
            ..SwapOptions::default()
        };
        self.begin_swap_with_at(target_id, options, now).await
    }

    pub async fn begin_swap_with(&self, target_id: &str, options: SwapOptions) -> SwapResult<SwapOperation> {
        self.begin_swap_with_at(target_id, options, epoch_secs()).await
    }

    /// Start replacing the active version with `target_id`.
    ///
    /// The dimension check runs here, before the operation is accepted;
    /// the rest of the checklist runs on the next tick.
    pub async fn begin_swap_with_at(
        &self,
        target_id: &str,
        options: SwapOptions,
        now: u64,
    ) -> SwapResult<SwapOperation> {
        let threshold = options
            .rollback_threshold
            .unwrap_or(self.config.default_rollback_threshold);
        if !(threshold.is_finite() && threshold > 0.0) {
            return Err(SwapError::InvalidThreshold(threshold));
        }

        let mut current = self.current.lock().await;
        if let Some(op) = current.as_ref() {
            return Err(SwapError::SwapAlreadyInProgress(op.id.clone()));
        }

        let target = self.registry.get(target_id)?;
        if target.status != VersionStatus::Ready {
            return Err(SwapError::VersionNotReady {
                id: target.id,
                status: target.status,
            });
        }
        if let Some(reason) = &target.review_reason {
            return Err(SwapError::UnderReview {
                id: target.id.clone(),
                reason: reason.clone(),
            });
        }
        let source = self.registry.active_version()?;

        let id = uuid::Uuid::new_v4().to_string();
        let mut op = SwapOperation::new(&id, &source.id, &target.id, threshold, now);
        op.gradual_migration = options.gradual_migration;
        op.rollback_on_regression = options.rollback_on_regression;

        let (ok, reason) = check_dimensions(&source, &target);
        op.validation_results.insert(CHECK_DIMENSIONS.to_string(), ok);
        op.reasons.push(reason);
        if !ok {
            op.phase = SwapPhase::Failed;
            op.ended_at = Some(now);
            self.registry.repository().put_swap(&op)?;
            warn!(swap = %id, source = %source.id, target = %target.id, "swap rejected: dimension mismatch");
            return Err(SwapError::DimensionMismatch {
                active: source.dimensions,
                target: target.dimensions,
            });
        }

        self.save(&op)?;
        *current = Some(op.clone());
        info!(
            swap = %id,
            source = %source.id,
            target = %target.id,
            rollback_threshold = threshold,
            gradual = op.gradual_migration,
            rollback_on_regression = op.rollback_on_regression,
            "swap started"
        );
        Ok(op)
    }

    /// Begin a swap to the newest ready version matching the active
    /// dimensions. `None` if there is no candidate or a swap is running.
    pub async fn begin_auto_swap(&self) -> SwapResult<Option<SwapOperation>> {
        let active = self.registry.active_version()?;
        let Some(candidate) = self.registry.newest_swappable(active.dimensions)? else {
            debug!("no ready version to swap to");
            return Ok(None);
        };
        match self.begin_swap(&candidate.id, None).await {
            Ok(op) => Ok(Some(op)),
            Err(SwapError::SwapAlreadyInProgress(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Move a migrating swap to `RollingBack`. Target traffic drops to
    /// zero immediately; the next tick finishes the rollback.
    pub async fn cancel(&self, swap_id: &str) -> SwapResult<SwapOperation> {
        let mut current = self.current.lock().await;
        let Some(op) = current.as_mut().filter(|op| op.id == swap_id) else {
            let stored = self.get_swap(swap_id)?;
            return Err(SwapError::NotCancellable {
                id: stored.id,
                phase: stored.phase,
            });
        };
        if op.phase != SwapPhase::Migrating {
            return Err(SwapError::NotCancellable {
                id: op.id.clone(),
                phase: op.phase,
            });
        }

        self.start_rollback(op, RollbackCause::Cancelled, "cancelled by operator".to_string());
        self.save(op)?;
        Ok(op.clone())
    }

    pub async fn tick(&self) -> SwapResult<Option<SwapOperation>> {
        self.tick_at(epoch_secs()).await
    }

    /// Advance the in-flight operation by one step as of `now`.
    ///
    /// With no operation in flight, retired versions past their grace
    /// period are removed instead. Returns the operation as left by this
    /// tick.
    pub async fn tick_at(&self, now: u64) -> SwapResult<Option<SwapOperation>> {
        let mut current = self.current.lock().await;
        if current.is_none() {
            drop(current);
            self.reap_retired(now)?;
            return Ok(None);
        }
        let Some(op) = current.as_mut() else {
            return Ok(None);
        };

        match op.phase {
            SwapPhase::Validating => self.validate(op, now).await?,
            SwapPhase::Migrating => self.migrate(op, now)?,
            SwapPhase::RollingBack => self.finish_rollback(op, now)?,
            _ => {}
        }

        let after = op.clone();
        if after.is_terminal() {
            *current = None;
            self.view.store(None);
        }
        Ok(Some(after))
    }

    /// Resolve operations left non-terminal by a previous process.
    ///
    /// A swap whose promotion had already started is finished; anything
    /// else is rolled back. The router ends up on the sole active version.
    pub fn recover(&self) -> SwapResult<Vec<SwapOperation>> {
        self.recover_at(epoch_secs())
    }

    pub fn recover_at(&self, now: u64) -> SwapResult<Vec<SwapOperation>> {
        let repo = self.registry.repository();
        let mut resolved = Vec::new();

        for mut op in repo.list_swaps()?.into_iter().filter(|op| !op.is_terminal()) {
            let source = self.registry.get(&op.source_version_id).ok();
            let target = self.registry.get(&op.target_version_id).ok();
            let promoted = matches!(&target, Some(t) if t.status == VersionStatus::Active)
                || matches!(&source, Some(s) if s.status == VersionStatus::Retiring);

            if promoted {
                self.registry
                    .promote(&op.source_version_id, &op.target_version_id, now)?;
                op.phase = SwapPhase::Completed;
                op.traffic_percentage = 100;
                op.reasons.push(format!("{RESTART_REASON}; promotion finished"));
            } else {
                op.phase = SwapPhase::RolledBack;
                op.rollback_cause = Some(RollbackCause::Restart);
                op.traffic_percentage = 0;
                op.reasons.push(RESTART_REASON.to_string());
            }
            op.ended_at = Some(now);
            repo.put_swap(&op)?;
            warn!(swap = %op.id, phase = %op.phase, "resolved swap interrupted by restart");
            resolved.push(op);
        }

        match self.registry.active_version() {
            Ok(active) => self.router.set_active(&active.id),
            Err(RegistryError::NoActiveVersion) => {}
            Err(e) => return Err(e.into()),
        }
        Ok(resolved)
    }

    /// Run the tick loop until shutdown. Status changes touching the
    /// in-flight swap trigger an immediate tick.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let interval = Duration::from_secs(self.config.tick_secs.max(1));
        let mut events = self.registry.subscribe();
        info!(tick_secs = interval.as_secs(), "swap controller started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "swap tick failed");
                    }
                }
                event = events.recv() => match event {
                    Ok(change) => {
                        if self.concerns_current(&change)
                            && let Err(e) = self.tick().await
                        {
                            error!(error = %e, "swap tick failed");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "swap controller lagged behind registry events");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("registry event channel closed");
                        events = self.registry.subscribe();
                    }
                },
                _ = shutdown.changed() => {
                    info!("swap controller shutting down");
                    break;
                }
            }
        }
    }

    fn concerns_current(&self, change: &StatusChange) -> bool {
        self.view.load_full().is_some_and(|op| {
            change.version_id == op.target_version_id || change.version_id == op.source_version_id
        })
    }

    async fn validate(&self, op: &mut SwapOperation, now: u64) -> SwapResult<()> {
        let source = self.registry.get(&op.source_version_id)?;
        let target = self.registry.get(&op.target_version_id)?;
        let source_snapshot = self.metrics.snapshot(&source.id);

        let report = run_checklist(
            &source,
            &target,
            &source_snapshot,
            self.probe.as_deref(),
            self.config.benchmark_queries,
            op.rollback_threshold,
            self.memory_budget_bytes,
        )
        .await;

        op.validation_results = report.results.clone();
        op.reasons.extend(report.reasons.iter().cloned());

        if !report.passed() {
            op.phase = SwapPhase::Failed;
            op.ended_at = Some(now);
            self.save(op)?;
            warn!(swap = %op.id, target = %target.id, results = ?op.validation_results, "swap validation failed");
            return Ok(());
        }

        if source_snapshot.has_samples() {
            op.baseline_p95_ms = Some(source_snapshot.p95_latency_ms);
        }
        op.phase = SwapPhase::Migrating;
        info!(swap = %op.id, baseline_p95_ms = ?op.baseline_p95_ms, "validation passed, migrating");
        self.shift(op, now)?;
        self.save(op)?;
        Ok(())
    }

    fn migrate(&self, op: &mut SwapOperation, now: u64) -> SwapResult<()> {
        let target = self.registry.get(&op.target_version_id);
        if !matches!(&target, Ok(t) if t.status == VersionStatus::Ready) {
            let reason = match target {
                Ok(t) => format!("target {} left ready state ({})", t.id, t.status),
                Err(e) => format!("target unavailable: {e}"),
            };
            self.start_rollback(op, RollbackCause::TargetLost, reason);
            return self.save(op);
        }

        if op.baseline_p95_ms.is_none() {
            let source = self.metrics.snapshot(&op.source_version_id);
            if source.has_samples() {
                op.baseline_p95_ms = Some(source.p95_latency_ms);
                op.reasons
                    .push(format!("baseline p95 {:.2}ms captured during migration", source.p95_latency_ms));
            }
        }

        // Without a baseline no step can be judged, so the split stays put.
        if op.rollback_on_regression && op.baseline_p95_ms.is_none() {
            let waited = now.saturating_sub(op.started_at);
            if waited >= self.config.baseline_timeout_secs {
                let reason = format!("no source baseline after {waited}s; cannot judge regression");
                self.start_rollback(op, RollbackCause::NoBaseline, reason);
                return self.save(op);
            }
            debug!(swap = %op.id, waited, "waiting for a source baseline");
            return Ok(());
        }

        let Some(last_shift) = op.last_shift_at else {
            self.shift(op, now)?;
            return self.save(op);
        };

        // Only windows that opened after the last shift reflect it.
        let snapshot = self.metrics.snapshot(&op.target_version_id);
        let judged = snapshot.window_start >= last_shift
            && snapshot.sample_count >= self.config.min_step_samples.max(1);
        if !judged {
            debug!(swap = %op.id, percentage = op.traffic_percentage, "waiting for a post-shift window");
            return Ok(());
        }

        let mut tolerated = None;
        if let Some(baseline) = op.baseline_p95_ms {
            let baseline = baseline.max(MIN_BASELINE_MS);
            let regression = (snapshot.p95_latency_ms - baseline) / baseline;
            if regression > op.rollback_threshold {
                let reason = format!(
                    "p95 regression at {}%: target {:.2}ms vs baseline {:.2}ms (+{:.1}%) exceeds {:.1}%",
                    op.traffic_percentage,
                    snapshot.p95_latency_ms,
                    baseline,
                    regression * 100.0,
                    op.rollback_threshold * 100.0
                );
                if op.rollback_on_regression {
                    self.start_rollback(op, RollbackCause::Regression, reason);
                    return self.save(op);
                }
                tolerated = Some(reason);
            }
        }

        if now.saturating_sub(last_shift) < self.config.step_interval_secs {
            return Ok(());
        }
        if let Some(reason) = tolerated {
            warn!(swap = %op.id, %reason, "regression recorded, rollback disabled for this swap");
            op.reasons.push(format!("{reason} (rollback disabled)"));
        }

        if op.traffic_percentage >= 100 {
            return self.complete(op, now);
        }
        self.shift(op, now)?;
        self.save(op)
    }

    /// Raise the target's share by one step, or to 100% for a one-shot cutover.
    fn shift(&self, op: &mut SwapOperation, now: u64) -> SwapResult<()> {
        let step = if op.gradual_migration {
            self.config.step_percent
        } else {
            100
        };
        let next = op.traffic_percentage.saturating_add(step).min(100);
        self.router.set_split(&op.target_version_id, next as u32)?;
        op.traffic_percentage = next;
        op.last_shift_at = Some(now);
        op.reasons.push(format!("traffic shifted to {next}%"));
        info!(swap = %op.id, target = %op.target_version_id, percentage = next, "traffic shifted");
        Ok(())
    }

    fn complete(&self, op: &mut SwapOperation, now: u64) -> SwapResult<()> {
        self.registry
            .promote(&op.source_version_id, &op.target_version_id, now)?;
        self.router.set_active(&op.target_version_id);
        op.phase = SwapPhase::Completed;
        op.ended_at = Some(now);
        op.reasons.push(format!("{} promoted to active", op.target_version_id));
        self.save(op)?;
        info!(
            swap = %op.id,
            source = %op.source_version_id,
            target = %op.target_version_id,
            "swap completed"
        );
        Ok(())
    }

    fn start_rollback(&self, op: &mut SwapOperation, cause: RollbackCause, reason: String) {
        self.router.clear_split();
        op.phase = SwapPhase::RollingBack;
        op.rollback_cause = Some(cause);
        op.traffic_percentage = 0;
        warn!(swap = %op.id, ?cause, %reason, "rolling back swap");
        op.reasons.push(reason);
    }

    fn finish_rollback(&self, op: &mut SwapOperation, now: u64) -> SwapResult<()> {
        self.router.clear_split();
        op.traffic_percentage = 0;
        op.ended_at = Some(now);
        if op.rollback_cause == Some(RollbackCause::Cancelled) {
            op.phase = SwapPhase::Cancelled;
        } else {
            op.phase = SwapPhase::RolledBack;
        }

        if op.rollback_cause == Some(RollbackCause::Regression) {
            let reason = op
                .reasons
                .last()
                .cloned()
                .unwrap_or_else(|| "latency regression".to_string());
            match self.registry.flag_for_review(&op.target_version_id, &reason) {
                Ok(_) => {}
                Err(RegistryError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }

        self.save(op)?;
        info!(swap = %op.id, phase = %op.phase, "rollback finished");
        Ok(())
    }

    fn reap_retired(&self, now: u64) -> SwapResult<()> {
        for id in self.registry.reap_retired(self.config.retire_grace_secs, now)? {
            self.metrics.unregister(&id);
            info!(version = %id, "retired version removed");
        }
        Ok(())
    }

    /// Persist and publish.
    fn save(&self, op: &SwapOperation) -> SwapResult<()> {
        self.registry.repository().put_swap(op)?;
        if op.is_terminal() {
            self.view.store(None);
        } else {
            self.view.store(Some(Arc::new(op.clone())));
        }
        Ok(())
    }
}
