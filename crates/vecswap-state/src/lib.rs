//! vecswap-state — version registry and persistence for vecswap.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for index versions, swap operations, and closed metrics windows.
//!
//! # Architecture
//!
//! ```text
//! VersionRegistry ── lifecycle rules, status-change events
//!   └── Arc<dyn IndexRepository>
//!         ├── StateStore        (redb, on-disk or in-memory backend)
//!         └── MemoryRepository  (plain maps, for tests)
//! ```
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Snapshot keys are `{version_id}:{window_end}` with a zero-padded epoch
//! so a prefix scan returns windows in chronological order.

pub mod error;
pub mod registry;
pub mod repository;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{RegistryError, RegistryResult, StateError, StateResult};
pub use registry::{BuildStats, VersionRegistry};
pub use repository::{IndexRepository, MemoryRepository};
pub use store::StateStore;
pub use types::*;
