//! vecswap-build — the boundary to the external build-job system.
//!
//! Index builds and isolated benchmarks run in other services. This crate
//! submits work to them and records the outcome in the registry.
//!
//! # Architecture
//!
//! ```text
//! BuildCoordinator
//!   ├── request_build() → next id, register Building, submit job
//!   └── complete()      → Ready / Failed from the job callback
//!
//! BuildExecutor (trait) ── HttpBuildExecutor: RetryPolicy + CircuitBreaker
//! IndexProbe    (trait) ── HttpIndexProbe: isolated benchmark queries
//! ```

pub mod client;
pub mod coordinator;
pub mod error;
pub mod policy;

pub use client::{
    BenchmarkReport, BoxFuture, BuildExecutor, BuildJob, DetachedExecutor, HttpBuildExecutor, HttpIndexProbe,
    IndexProbe, post_json,
};
pub use coordinator::{BuildCoordinator, BuildOutcome, BuildRequest, CoordinatorError};
pub use error::{BuildError, BuildResult};
pub use policy::{CircuitBreaker, CircuitState, RetryPolicy};
