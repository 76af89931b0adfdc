//! Domain types for the vecswap state store.
//!
//! These types represent the persisted state of index versions, swap
//! operations, and closed metrics windows. All types are serializable
//! to/from JSON for storage in redb tables.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub use vecswap_core::{IndexKind, VersionId};

/// Unique identifier for a swap operation.
pub type SwapId = String;

// ── Index versions ─────────────────────────────────────────────────

/// Lifecycle status of an index version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    Building,
    Ready,
    Active,
    Retiring,
    Failed,
}

impl VersionStatus {
    /// Whether `next` is directly reachable from this status.
    pub fn can_transition_to(self, next: VersionStatus) -> bool {
        use VersionStatus::*;
        matches!(
            (self, next),
            (Building, Ready) | (Building, Failed) | (Ready, Active) | (Active, Retiring)
        )
    }

    /// Whether a version in this status may be deleted from the registry.
    pub fn is_removable(self) -> bool {
        matches!(self, VersionStatus::Retiring | VersionStatus::Failed)
    }

    pub fn label(&self) -> &'static str {
        match self {
            VersionStatus::Building => "building",
            VersionStatus::Ready => "ready",
            VersionStatus::Active => "active",
            VersionStatus::Retiring => "retiring",
            VersionStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One built (or building) index and its lifecycle record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexVersion {
    pub id: VersionId,
    pub index_kind: IndexKind,
    pub dimensions: u32,
    pub vector_count: u64,
    /// Vector count the build was asked to index, when known.
    pub expected_vector_count: Option<u64>,
    pub memory_bytes: u64,
    pub build_duration_ms: u64,
    pub status: VersionStatus,
    /// Where the embeddings for this build came from.
    pub embedding_source: Option<String>,
    /// Set when a live regression rolled this version back.
    pub review_reason: Option<String>,
    /// Set when the build failed.
    pub failure_reason: Option<String>,
    /// Unix timestamp when the version was registered.
    pub created_at: u64,
    /// Unix timestamp of the last status change.
    pub status_changed_at: u64,
}

impl IndexVersion {
    /// A freshly requested build.
    pub fn building(id: &str, index_kind: IndexKind, dimensions: u32, now: u64) -> Self {
        Self {
            id: id.to_string(),
            index_kind,
            dimensions,
            vector_count: 0,
            expected_vector_count: None,
            memory_bytes: 0,
            build_duration_ms: 0,
            status: VersionStatus::Building,
            embedding_source: None,
            review_reason: None,
            failure_reason: None,
            created_at: now,
            status_changed_at: now,
        }
    }

    /// Ready to be swapped in: built, not flagged for review.
    pub fn is_swappable(&self) -> bool {
        self.status == VersionStatus::Ready && self.review_reason.is_none()
    }
}

/// Emitted by the registry whenever a version changes status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub version_id: VersionId,
    /// `None` when the version was just registered.
    pub from: Option<VersionStatus>,
    /// `None` when the version was removed.
    pub to: Option<VersionStatus>,
    pub at: u64,
}

// ── Metrics ────────────────────────────────────────────────────────

/// Aggregated performance of one version over one closed window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerformanceSnapshot {
    pub version_id: VersionId,
    /// Unix timestamp when the window opened.
    pub window_start: u64,
    /// Unix timestamp when the window closed.
    pub window_end: u64,
    pub sample_count: u64,
    pub error_count: u64,
    /// Error rate (0.0–1.0).
    pub error_rate: f64,
    pub p50_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
    pub throughput_qps: f64,
    pub memory_usage_percent: f64,
    /// Search time as a share of end-to-end request time (0–100), over the
    /// samples that reported a request time. 0 when none did.
    #[serde(default)]
    pub search_latency_percent: f64,
}

impl PerformanceSnapshot {
    /// A window in which nothing was recorded.
    pub fn empty(version_id: &str, window_start: u64, window_end: u64) -> Self {
        Self {
            version_id: version_id.to_string(),
            window_start,
            window_end,
            sample_count: 0,
            error_count: 0,
            error_rate: 0.0,
            p50_latency_ms: 0.0,
            p95_latency_ms: 0.0,
            p99_latency_ms: 0.0,
            throughput_qps: 0.0,
            memory_usage_percent: 0.0,
            search_latency_percent: 0.0,
        }
    }

    pub fn has_samples(&self) -> bool {
        self.sample_count > 0
    }

    /// Build the composite key for the snapshots table.
    pub fn table_key(&self) -> String {
        snapshot_key(&self.version_id, self.window_end)
    }
}

/// Snapshot key with a zero-padded epoch so keys sort chronologically.
pub fn snapshot_key(version_id: &str, window_end: u64) -> String {
    format!("{version_id}:{window_end:020}")
}

// ── Swap operations ────────────────────────────────────────────────

/// Phase of a swap operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapPhase {
    Validating,
    Migrating,
    Completed,
    RollingBack,
    RolledBack,
    Failed,
    Cancelled,
}

impl SwapPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SwapPhase::Completed | SwapPhase::RolledBack | SwapPhase::Failed | SwapPhase::Cancelled
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            SwapPhase::Validating => "validating",
            SwapPhase::Migrating => "migrating",
            SwapPhase::Completed => "completed",
            SwapPhase::RollingBack => "rolling_back",
            SwapPhase::RolledBack => "rolled_back",
            SwapPhase::Failed => "failed",
            SwapPhase::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SwapPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Why a migrating swap is being rolled back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackCause {
    /// Target p95 exceeded the allowed regression.
    Regression,
    /// Operator cancelled the swap.
    Cancelled,
    /// The controller restarted mid-swap.
    Restart,
    /// The target version left `Ready` underneath the swap.
    TargetLost,
    /// The source never produced a baseline window to judge against.
    NoBaseline,
}

/// A single attempt to replace the active version with a target version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SwapOperation {
    pub id: SwapId,
    pub source_version_id: VersionId,
    pub target_version_id: VersionId,
    pub phase: SwapPhase,
    /// Target's share of traffic (0–100).
    pub traffic_percentage: u8,
    /// Check name → passed.
    pub validation_results: BTreeMap<String, bool>,
    /// Allowed p95 regression as a fraction of the baseline.
    pub rollback_threshold: f64,
    /// Source p95 captured when migration began.
    pub baseline_p95_ms: Option<f64>,
    pub rollback_cause: Option<RollbackCause>,
    /// Human-readable account of every decision taken.
    pub reasons: Vec<String>,
    pub started_at: u64,
    pub ended_at: Option<u64>,
    /// Unix timestamp of the last traffic shift.
    pub last_shift_at: Option<u64>,
    /// Shift traffic in steps; when false the target takes all traffic at once.
    #[serde(default = "enabled")]
    pub gradual_migration: bool,
    /// Roll back on a p95 regression; when false regressions are only recorded.
    #[serde(default = "enabled")]
    pub rollback_on_regression: bool,
}

fn enabled() -> bool {
    true
}

impl SwapOperation {
    pub fn new(id: &str, source: &str, target: &str, rollback_threshold: f64, now: u64) -> Self {
        Self {
            id: id.to_string(),
            source_version_id: source.to_string(),
            target_version_id: target.to_string(),
            phase: SwapPhase::Validating,
            traffic_percentage: 0,
            validation_results: BTreeMap::new(),
            rollback_threshold,
            baseline_p95_ms: None,
            rollback_cause: None,
            reasons: Vec::new(),
            started_at: now,
            ended_at: None,
            last_shift_at: None,
            gradual_migration: true,
            rollback_on_regression: true,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }
}
