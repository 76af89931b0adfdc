//! redb table definitions for the vecswap state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Index versions keyed by `{version_id}`.
pub const VERSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("versions");

/// Swap operations keyed by `{swap_id}`.
pub const SWAPS: TableDefinition<&str, &[u8]> = TableDefinition::new("swaps");

/// Closed metrics windows keyed by `{version_id}:{window_end:020}`.
pub const SNAPSHOTS: TableDefinition<&str, &[u8]> = TableDefinition::new("snapshots");
