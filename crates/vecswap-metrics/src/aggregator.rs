//! Metrics aggregator — per-version rolling windows of query performance.
//!
//! The open window of each version is an `ArcSwap`'d accumulator. Writers
//! load it and bump atomics; rollover swaps in a fresh accumulator and
//! reads the old one. The version map itself is only write-locked when a
//! version is first seen or removed, so contention tracks query volume
//! rather than version count.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use arc_swap::ArcSwap;
use tracing::{debug, error, info, warn};

use vecswap_core::{MetricsConfig, epoch_secs};
use vecswap_state::{IndexRepository, PerformanceSnapshot, VersionStatus};

use crate::histogram::LatencyHistogram;

/// Samples of one version within one open window.
struct Window {
    started_at: u64,
    latencies: LatencyHistogram,
    errors: AtomicU64,
    /// Search and end-to-end request time, in microseconds, of the samples
    /// that reported a request time.
    search_micros: AtomicU64,
    request_micros: AtomicU64,
}

impl Window {
    fn open(started_at: u64) -> Self {
        Self {
            started_at,
            latencies: LatencyHistogram::new(),
            errors: AtomicU64::new(0),
            search_micros: AtomicU64::new(0),
            request_micros: AtomicU64::new(0),
        }
    }

    fn record(&self, latency_ms: f64, success: bool) {
        self.latencies.record(latency_ms);
        if !success {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn search_latency_percent(&self) -> f64 {
        let request = self.request_micros.load(Ordering::Relaxed);
        if request == 0 {
            return 0.0;
        }
        let search = self.search_micros.load(Ordering::Relaxed);
        (search as f64 / request as f64 * 100.0).min(100.0)
    }
}

fn micros(ms: f64) -> u64 {
    (ms.max(0.0) * 1000.0).round() as u64
}

struct VersionMetrics {
    window: ArcSwap<Window>,
    last_closed: ArcSwap<PerformanceSnapshot>,
    /// Resident size of the index, refreshed from the registry.
    memory_bytes: AtomicU64,
}

impl VersionMetrics {
    fn new(version_id: &str, now: u64) -> Self {
        Self {
            window: ArcSwap::from_pointee(Window::open(now)),
            last_closed: ArcSwap::from_pointee(PerformanceSnapshot::empty(version_id, now, now)),
            memory_bytes: AtomicU64::new(0),
        }
    }
}

/// Collects per-query samples for every live version and closes them
/// into [`PerformanceSnapshot`]s on a fixed window.
pub struct MetricsAggregator {
    versions: RwLock<HashMap<String, Arc<VersionMetrics>>>,
    repo: Arc<dyn IndexRepository>,
    window: Duration,
    history_limit: usize,
    memory_budget_bytes: u64,
}

impl MetricsAggregator {
    pub fn new(repo: Arc<dyn IndexRepository>, config: &MetricsConfig, memory_budget_bytes: u64) -> Self {
        Self {
            versions: RwLock::new(HashMap::new()),
            repo,
            window: Duration::from_secs(config.window_secs.max(1)),
            history_limit: config.history_limit,
            memory_budget_bytes: memory_budget_bytes.max(1),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Start tracking a version. No-op if already tracked.
    pub fn register(&self, version_id: &str) {
        self.entry(version_id);
    }

    /// Stop tracking a version and forget its open window.
    pub fn unregister(&self, version_id: &str) {
        let mut versions = self.versions.write().expect("metrics lock");
        if versions.remove(version_id).is_some() {
            debug!(version = %version_id, "unregistered from metrics");
        }
    }

    /// Record one served query. Unknown versions are tracked on first
    /// sample; callers outside the process check ids against the registry.
    pub fn record_sample(&self, version_id: &str, latency_ms: f64, success: bool) {
        self.entry(version_id).window.load().record(latency_ms, success);
    }

    /// Record a query together with the end-to-end time of the request
    /// that issued it. A request time below the search time counts as the
    /// search time.
    pub fn record_request_sample(&self, version_id: &str, latency_ms: f64, request_ms: f64, success: bool) {
        let metrics = self.entry(version_id);
        let window = metrics.window.load();
        window.record(latency_ms, success);
        window.search_micros.fetch_add(micros(latency_ms), Ordering::Relaxed);
        window
            .request_micros
            .fetch_add(micros(request_ms.max(latency_ms)), Ordering::Relaxed);
    }

    /// Update the resident memory of a version's index.
    pub fn set_memory_bytes(&self, version_id: &str, bytes: u64) {
        self.entry(version_id).memory_bytes.store(bytes, Ordering::Relaxed);
    }

    /// Most recently closed window. Zero samples if nothing has closed yet.
    pub fn snapshot(&self, version_id: &str) -> PerformanceSnapshot {
        let versions = self.versions.read().expect("metrics lock");
        match versions.get(version_id) {
            Some(m) => PerformanceSnapshot::clone(&m.last_closed.load()),
            None => PerformanceSnapshot::empty(version_id, 0, 0),
        }
    }

    /// Last closed window of every tracked version, ordered by version id.
    pub fn snapshots(&self) -> Vec<PerformanceSnapshot> {
        let versions = self.versions.read().expect("metrics lock");
        let mut all: Vec<PerformanceSnapshot> = versions
            .values()
            .map(|m| PerformanceSnapshot::clone(&m.last_closed.load()))
            .collect();
        all.sort_by(|a, b| a.version_id.cmp(&b.version_id));
        all
    }

    /// Samples recorded in the open window so far.
    pub fn pending_samples(&self, version_id: &str) -> u64 {
        let versions = self.versions.read().expect("metrics lock");
        versions
            .get(version_id)
            .map(|m| m.window.load().latencies.count())
            .unwrap_or(0)
    }

    pub fn tracked_versions(&self) -> Vec<String> {
        let versions = self.versions.read().expect("metrics lock");
        let mut ids: Vec<String> = versions.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Close the open window of every tracked version at `now`.
    ///
    /// Each closed window replaces the version's last snapshot and is
    /// persisted; history beyond `history_limit` is pruned.
    pub fn close_windows_at(&self, now: u64) -> anyhow::Result<Vec<PerformanceSnapshot>> {
        let tracked: Vec<(String, Arc<VersionMetrics>)> = {
            let versions = self.versions.read().expect("metrics lock");
            versions.iter().map(|(id, m)| (id.clone(), m.clone())).collect()
        };

        let mut closed = Vec::with_capacity(tracked.len());
        for (version_id, metrics) in tracked {
            let window = metrics.window.swap(Arc::new(Window::open(now)));
            let snapshot = self.summarize(&version_id, &metrics, &window, now);
            metrics.last_closed.store(Arc::new(snapshot.clone()));

            self.repo.put_snapshot(&snapshot)?;
            self.repo.prune_snapshots(&version_id, self.history_limit)?;
            closed.push(snapshot);
        }

        debug!(versions = closed.len(), window_end = now, "metrics windows closed");
        Ok(closed)
    }

    pub fn close_windows(&self) -> anyhow::Result<Vec<PerformanceSnapshot>> {
        self.close_windows_at(epoch_secs())
    }

    /// Align tracked versions with the registry: track live versions,
    /// drop removed or failed ones, refresh memory usage.
    pub fn sync_with_registry(&self) -> anyhow::Result<()> {
        let versions = self.repo.list_versions()?;
        for v in &versions {
            match v.status {
                VersionStatus::Ready | VersionStatus::Active | VersionStatus::Retiring => {
                    self.set_memory_bytes(&v.id, v.memory_bytes);
                }
                VersionStatus::Building | VersionStatus::Failed => {}
            }
        }
        for id in self.tracked_versions() {
            let live = versions
                .iter()
                .any(|v| v.id == id && v.status != VersionStatus::Failed);
            if !live {
                self.unregister(&id);
            }
        }
        Ok(())
    }

    /// Roll windows over until shutdown.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(window_secs = self.window.as_secs(), "metrics aggregator started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.window) => {
                    if let Err(e) = self.sync_with_registry() {
                        warn!(error = %e, "metrics registry sync failed");
                    }
                    if let Err(e) = self.close_windows() {
                        error!(error = %e, "closing metrics windows failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("metrics aggregator shutting down");
                    break;
                }
            }
        }
    }

    fn summarize(
        &self,
        version_id: &str,
        metrics: &VersionMetrics,
        window: &Window,
        now: u64,
    ) -> PerformanceSnapshot {
        let memory_usage_percent =
            metrics.memory_bytes.load(Ordering::Relaxed) as f64 / self.memory_budget_bytes as f64 * 100.0;
        let sample_count = window.latencies.count();
        let mut snapshot = PerformanceSnapshot {
            memory_usage_percent,
            ..PerformanceSnapshot::empty(version_id, window.started_at, now)
        };
        if sample_count == 0 {
            return snapshot;
        }

        let error_count = window.errors.load(Ordering::Relaxed).min(sample_count);
        let elapsed = now.saturating_sub(window.started_at).max(1);
        let (p50, p95, p99) = window.latencies.percentiles();

        snapshot.sample_count = sample_count;
        snapshot.error_count = error_count;
        snapshot.error_rate = error_count as f64 / sample_count as f64;
        snapshot.p50_latency_ms = p50;
        snapshot.p95_latency_ms = p95;
        snapshot.p99_latency_ms = p99;
        snapshot.throughput_qps = sample_count as f64 / elapsed as f64;
        snapshot.search_latency_percent = window.search_latency_percent();
        snapshot
    }

    fn entry(&self, version_id: &str) -> Arc<VersionMetrics> {
        if let Some(m) = self.versions.read().expect("metrics lock").get(version_id) {
            return m.clone();
        }
        let mut versions = self.versions.write().expect("metrics lock");
        versions
            .entry(version_id.to_string())
            .or_insert_with(|| {
                debug!(version = %version_id, "tracking version metrics");
                Arc::new(VersionMetrics::new(version_id, epoch_secs()))
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vecswap_state::{IndexKind, IndexVersion, MemoryRepository};

    const GIB: u64 = 1024 * 1024 * 1024;

    fn aggregator() -> (MetricsAggregator, Arc<MemoryRepository>) {
        let repo = Arc::new(MemoryRepository::new());
        let config = MetricsConfig {
            window_secs: 60,
            history_limit: 3,
        };
        (MetricsAggregator::new(repo.clone(), &config, 8 * GIB), repo)
    }

    #[test]
    fn snapshot_of_unknown_version_is_zero_sample() {
        let (agg, _) = aggregator();
        let snap = agg.snapshot("v9");
        assert_eq!(snap.version_id, "v9");
        assert!(!snap.has_samples());
        assert_eq!(snap.p95_latency_ms, 0.0);
    }

    #[test]
    fn samples_invisible_until_window_closes() {
        let (agg, _) = aggregator();
        agg.record_sample("v1", 20.0, true);
        assert_eq!(agg.pending_samples("v1"), 1);
        assert!(!agg.snapshot("v1").has_samples());

        agg.close_windows_at(epoch_secs() + 60).unwrap();
        assert_eq!(agg.snapshot("v1").sample_count, 1);
        assert_eq!(agg.pending_samples("v1"), 0);
    }

    #[test]
    fn closed_window_summarizes_samples() {
        let (agg, _) = aggregator();
        agg.register("v1");
        let start = epoch_secs();
        for ms in 1..=100 {
            agg.record_sample("v1", ms as f64, ms % 10 != 0);
        }
        agg.set_memory_bytes("v1", 2 * GIB);

        let closed = agg.close_windows_at(start + 50).unwrap();
        assert_eq!(closed.len(), 1);
        let snap = agg.snapshot("v1");
        assert_eq!(snap.sample_count, 100);
        assert_eq!(snap.error_count, 10);
        assert!((snap.error_rate - 0.1).abs() < 1e-9);
        assert!((snap.p95_latency_ms - 95.0).abs() / 95.0 <= 0.05);
        assert!((snap.memory_usage_percent - 25.0).abs() < 1e-9);
        assert!(snap.throughput_qps > 0.0);
    }

    #[test]
    fn search_share_counts_only_timed_requests() {
        let (agg, _) = aggregator();
        let start = epoch_secs();
        agg.record_request_sample("v1", 30.0, 120.0, true);
        agg.record_request_sample("v1", 10.0, 80.0, true);
        // No request time: excluded from the share.
        agg.record_sample("v1", 500.0, true);
        agg.close_windows_at(start + 60).unwrap();

        let snap = agg.snapshot("v1");
        assert_eq!(snap.sample_count, 3);
        assert!((snap.search_latency_percent - 20.0).abs() < 1e-9);

        agg.record_sample("v1", 10.0, true);
        agg.close_windows_at(start + 120).unwrap();
        assert_eq!(agg.snapshot("v1").search_latency_percent, 0.0);
    }

    #[test]
    fn empty_window_supersedes_previous_snapshot() {
        let (agg, _) = aggregator();
        let start = epoch_secs();
        agg.record_sample("v1", 5.0, true);
        agg.close_windows_at(start + 60).unwrap();
        assert!(agg.snapshot("v1").has_samples());

        agg.close_windows_at(start + 120).unwrap();
        let snap = agg.snapshot("v1");
        assert!(!snap.has_samples());
        assert_eq!(snap.window_start, start + 60);
        assert_eq!(snap.window_end, start + 120);
    }

    #[test]
    fn versions_are_isolated() {
        let (agg, _) = aggregator();
        agg.record_sample("v1", 10.0, true);
        agg.record_sample("v2", 300.0, false);
        agg.close_windows_at(epoch_secs() + 60).unwrap();

        assert!(agg.snapshot("v1").p95_latency_ms < 11.0);
        assert!(agg.snapshot("v2").p95_latency_ms > 280.0);
        assert_eq!(agg.snapshot("v1").error_count, 0);
        assert_eq!(agg.snapshot("v2").error_count, 1);
    }

    #[test]
    fn closed_windows_persisted_and_pruned() {
        let (agg, repo) = aggregator();
        let start = epoch_secs();
        for i in 1..=5 {
            agg.record_sample("v1", 10.0, true);
            agg.close_windows_at(start + i * 60).unwrap();
        }
        let history = repo.list_snapshots("v1", 10).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].window_end, start + 300);
    }

    #[test]
    fn sync_tracks_live_versions_and_drops_removed() {
        let (agg, repo) = aggregator();
        let active = IndexVersion {
            status: VersionStatus::Active,
            memory_bytes: 4 * GIB,
            ..IndexVersion::building("v1", IndexKind::Flat, 384, 0)
        };
        repo.put_version(&active).unwrap();
        agg.record_sample("v0", 1.0, true);

        agg.sync_with_registry().unwrap();
        assert_eq!(agg.tracked_versions(), vec!["v1".to_string()]);

        agg.close_windows_at(epoch_secs() + 60).unwrap();
        assert!((agg.snapshot("v1").memory_usage_percent - 50.0).abs() < 1e-9);
    }

    #[test]
    fn concurrent_recording_across_threads() {
        let (agg, _) = aggregator();
        let agg = Arc::new(agg);
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let agg = agg.clone();
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        agg.record_sample(if t % 2 == 0 { "v1" } else { "v2" }, 12.0, true);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(agg.pending_samples("v1"), 500);
        assert_eq!(agg.pending_samples("v2"), 500);
    }

    #[tokio::test]
    async fn run_exits_on_shutdown() {
        let (agg, _) = aggregator();
        let (tx, rx) = tokio::sync::watch::channel(false);
        let handle = tokio::spawn(async move { agg.run(rx).await });
        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
