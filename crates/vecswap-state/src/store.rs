//! StateStore — redb-backed state persistence for vecswap.
//!
//! Provides typed CRUD operations over versions, swap operations, and
//! metrics snapshots. All values are JSON-serialized into redb's
//! `&[u8]` value columns. The store supports both on-disk and in-memory
//! backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::repository::IndexRepository;
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Every table maps a string key to a JSON document.
type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(VERSIONS).map_err(map_err!(Table))?;
        txn.open_table(SWAPS).map_err(map_err!(Table))?;
        txn.open_table(SNAPSHOTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn put<T: Serialize>(
        &self,
        table_def: JsonTable,
        key: &str,
        value: &T,
    ) -> StateResult<()> {
        let value = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(table_def).map_err(map_err!(Table))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(
        &self,
        table_def: JsonTable,
        key: &str,
    ) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table_def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Scan a table, keeping entries whose key starts with `prefix`.
    fn scan<T: DeserializeOwned>(
        &self,
        table_def: JsonTable,
        prefix: &str,
    ) -> StateResult<Vec<(String, T)>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table_def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(prefix) {
                let item: T =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push((key.value().to_string(), item));
            }
        }
        Ok(results)
    }

    fn delete_keys(
        &self,
        table_def: JsonTable,
        keys: &[String],
    ) -> StateResult<u32> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut count = 0;
        {
            let mut table = txn.open_table(table_def).map_err(map_err!(Table))?;
            for key in keys {
                if table.remove(key.as_str()).map_err(map_err!(Write))?.is_some() {
                    count += 1;
                }
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(count)
    }
}

impl IndexRepository for StateStore {
    // ── Versions ───────────────────────────────────────────────────

    fn put_version(&self, version: &IndexVersion) -> StateResult<()> {
        self.put(VERSIONS, &version.id, version)?;
        debug!(version = %version.id, status = %version.status, "version stored");
        Ok(())
    }

    fn get_version(&self, id: &str) -> StateResult<Option<IndexVersion>> {
        self.get(VERSIONS, id)
    }

    fn list_versions(&self) -> StateResult<Vec<IndexVersion>> {
        Ok(self
            .scan(VERSIONS, "")?
            .into_iter()
            .map(|(_, v)| v)
            .collect())
    }

    fn delete_version(&self, id: &str) -> StateResult<bool> {
        let deleted = self.delete_keys(VERSIONS, &[id.to_string()])?;
        debug!(version = %id, existed = deleted > 0, "version deleted");
        Ok(deleted > 0)
    }

    // ── Swap operations ────────────────────────────────────────────

    fn put_swap(&self, op: &SwapOperation) -> StateResult<()> {
        self.put(SWAPS, &op.id, op)
    }

    fn get_swap(&self, id: &str) -> StateResult<Option<SwapOperation>> {
        self.get(SWAPS, id)
    }

    fn list_swaps(&self) -> StateResult<Vec<SwapOperation>> {
        let mut swaps: Vec<SwapOperation> = self
            .scan(SWAPS, "")?
            .into_iter()
            .map(|(_, op)| op)
            .collect();
        swaps.sort_by_key(|op: &SwapOperation| op.started_at);
        Ok(swaps)
    }

    // ── Snapshots ──────────────────────────────────────────────────

    fn put_snapshot(&self, snapshot: &PerformanceSnapshot) -> StateResult<()> {
        self.put(SNAPSHOTS, &snapshot.table_key(), snapshot)
    }

    fn list_snapshots(
        &self,
        version_id: &str,
        limit: usize,
    ) -> StateResult<Vec<PerformanceSnapshot>> {
        let prefix = format!("{version_id}:");
        let mut snapshots: Vec<PerformanceSnapshot> = self
            .scan(SNAPSHOTS, &prefix)?
            .into_iter()
            .map(|(_, s)| s)
            .collect();
        snapshots.reverse();
        snapshots.truncate(limit);
        Ok(snapshots)
    }

    fn prune_snapshots(&self, version_id: &str, keep: usize) -> StateResult<u32> {
        let prefix = format!("{version_id}:");
        // Keys come back in ascending (oldest first) order.
        let keys: Vec<String> = self
            .scan::<PerformanceSnapshot>(SNAPSHOTS, &prefix)?
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        let excess = keys.len().saturating_sub(keep);
        if excess == 0 {
            return Ok(0);
        }
        self.delete_keys(SNAPSHOTS, &keys[..excess])
    }
}
