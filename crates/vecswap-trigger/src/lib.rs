//! vecswap-trigger — decides when the active index has outgrown itself.
//!
//! Compares the active version's last closed metrics window and its
//! vector count against `MigrationTriggerConfig` and returns a
//! [`TriggerDecision`] with every reason that applied.
//!
//! # Rules
//!
//! ```text
//! Recommended  if vector_count > vector_count_threshold
//!              or p95          > p95_latency_threshold_ms
//!              or memory %     > memory_threshold_percent
//! EarlyWarning if vector_count > early_warning_vector_count
//!              or p95 / memory > 80% of their threshold
//! ```
//!
//! After a `Recommended`, further recommendations are downgraded to
//! `EarlyWarning` until `cooldown_secs` has elapsed.

pub mod evaluator;

pub use evaluator::{
    RecommendCallback, RecommendFuture, TriggerAssessment, TriggerDecision, TriggerEvaluator, assess,
};
