//! Shared types used across vecswap crates.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Unique identifier for an index version (e.g. `v3`).
pub type VersionId = String;

/// Structure of a similarity-search index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    /// Exhaustive scan over every vector.
    Flat,
    /// Clustered inverted file; probes a subset of lists.
    InvertedFile,
}

impl IndexKind {
    pub fn label(&self) -> &'static str {
        match self {
            IndexKind::Flat => "flat",
            IndexKind::InvertedFile => "inverted_file",
        }
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Current wall-clock time as unix seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
