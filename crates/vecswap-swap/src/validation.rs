//! Pre-migration checklist.
//!
//! Four checks, all of which must pass before any traffic moves:
//! dimensions, integrity, memory budget, isolated benchmark.

use std::collections::BTreeMap;

use tracing::debug;

use vecswap_build::IndexProbe;
use vecswap_state::{IndexVersion, PerformanceSnapshot};

pub const CHECK_DIMENSIONS: &str = "dimensions";
pub const CHECK_INTEGRITY: &str = "integrity";
pub const CHECK_MEMORY: &str = "memory_budget";
pub const CHECK_BENCHMARK: &str = "benchmark";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub results: BTreeMap<String, bool>,
    pub reasons: Vec<String>,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        !self.results.is_empty() && self.results.values().all(|ok| *ok)
    }

    fn record(&mut self, check: &str, ok: bool, reason: String) {
        debug!(check, ok, %reason, "validation check");
        self.results.insert(check.to_string(), ok);
        self.reasons.push(reason);
    }
}

pub fn check_dimensions(source: &IndexVersion, target: &IndexVersion) -> (bool, String) {
    if source.dimensions == target.dimensions {
        (true, format!("dimensions match ({})", target.dimensions))
    } else {
        (
            false,
            format!(
                "dimension mismatch: active {} has {}, target {} has {}",
                source.id, source.dimensions, target.id, target.dimensions
            ),
        )
    }
}

fn check_integrity(target: &IndexVersion) -> (bool, String) {
    if target.vector_count == 0 {
        return (false, format!("integrity: {} contains no vectors", target.id));
    }
    match target.expected_vector_count {
        Some(expected) if expected != target.vector_count => (
            false,
            format!(
                "integrity: {} has {} vectors, expected {}",
                target.id, target.vector_count, expected
            ),
        ),
        _ => (true, format!("integrity: {} vectors", target.vector_count)),
    }
}

/// Both versions are resident while traffic is split.
fn check_memory(source: &IndexVersion, target: &IndexVersion, budget: u64) -> (bool, String) {
    let combined = source.memory_bytes.saturating_add(target.memory_bytes);
    if combined <= budget {
        (true, format!("memory: {combined} of {budget} bytes during migration"))
    } else {
        (
            false,
            format!("memory: {combined} bytes during migration exceeds budget of {budget}"),
        )
    }
}

async fn check_benchmark(
    target: &IndexVersion,
    source_snapshot: &PerformanceSnapshot,
    probe: Option<&dyn IndexProbe>,
    queries: u32,
    rollback_threshold: f64,
) -> (bool, String) {
    let Some(probe) = probe else {
        return (true, "benchmark skipped: no probe configured".to_string());
    };
    let report = match probe.benchmark(&target.id, queries).await {
        Ok(r) => r,
        Err(e) => return (false, format!("benchmark failed: {e}")),
    };
    if report.failures > 0 {
        return (
            false,
            format!("benchmark: {} of {} queries failed", report.failures, report.queries),
        );
    }
    if !source_snapshot.has_samples() {
        return (
            true,
            format!(
                "benchmark: p95 {:.2}ms, no source baseline to compare",
                report.p95_latency_ms
            ),
        );
    }
    let limit = source_snapshot.p95_latency_ms * (1.0 + rollback_threshold);
    if report.p95_latency_ms > limit {
        (
            false,
            format!(
                "benchmark: p95 {:.2}ms exceeds {:.2}ms (source {:.2}ms)",
                report.p95_latency_ms, limit, source_snapshot.p95_latency_ms
            ),
        )
    } else {
        (
            true,
            format!(
                "benchmark: p95 {:.2}ms within {:.2}ms",
                report.p95_latency_ms, limit
            ),
        )
    }
}

/// Run every check and collect the results. Does not short-circuit.
pub async fn run_checklist(
    source: &IndexVersion,
    target: &IndexVersion,
    source_snapshot: &PerformanceSnapshot,
    probe: Option<&dyn IndexProbe>,
    benchmark_queries: u32,
    rollback_threshold: f64,
    memory_budget_bytes: u64,
) -> ValidationReport {
    let mut report = ValidationReport::default();

    let (ok, reason) = check_dimensions(source, target);
    report.record(CHECK_DIMENSIONS, ok, reason);

    let (ok, reason) = check_integrity(target);
    report.record(CHECK_INTEGRITY, ok, reason);

    let (ok, reason) = check_memory(source, target, memory_budget_bytes);
    report.record(CHECK_MEMORY, ok, reason);

    let (ok, reason) = check_benchmark(
        target,
        source_snapshot,
        probe,
        benchmark_queries,
        rollback_threshold,
    )
    .await;
    report.record(CHECK_BENCHMARK, ok, reason);

    report
}
