//! vecswapd — the vecswap control plane.
//!
//! Wires the registry, metrics aggregator, trigger evaluator, router,
//! swap controller, and build coordinator together and serves the
//! control API. The binary in `main.rs` only parses flags and config.

pub mod daemon;

pub use daemon::{Services, run};
