//! vecswap-metrics — per-version query performance for vecswap.
//!
//! Every query served by an index version is recorded against that
//! version. Samples accumulate into an open window; on a fixed interval
//! the window closes into an immutable [`PerformanceSnapshot`] that is
//! persisted and becomes what [`MetricsAggregator::snapshot`] returns.
//!
//! # Architecture
//!
//! ```text
//! MetricsAggregator
//!   ├── record_sample()  ← hot query path, atomics only
//!   ├── close_windows()  → PerformanceSnapshot per version, persisted
//!   ├── snapshot()       → last closed window (zero-sample if none)
//!   └── run()            → window rollover loop
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain for /metrics
//! ```
//!
//! [`PerformanceSnapshot`]: vecswap_state::PerformanceSnapshot

pub mod aggregator;
pub mod histogram;
pub mod prometheus;

pub use aggregator::MetricsAggregator;
pub use histogram::LatencyHistogram;
pub use prometheus::render_prometheus;
