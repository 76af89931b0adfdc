//! Repository seam between the registry/controller and storage.
//!
//! `StateStore` is the production implementation; `MemoryRepository`
//! keeps everything in maps and is handed to components under test.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use crate::error::StateResult;
use crate::types::*;

/// Typed storage for versions, swap operations, and closed windows.
pub trait IndexRepository: Send + Sync {
    fn put_version(&self, version: &IndexVersion) -> StateResult<()>;
    fn get_version(&self, id: &str) -> StateResult<Option<IndexVersion>>;
    fn list_versions(&self) -> StateResult<Vec<IndexVersion>>;
    /// Returns true if the version existed.
    fn delete_version(&self, id: &str) -> StateResult<bool>;

    fn put_swap(&self, op: &SwapOperation) -> StateResult<()>;
    fn get_swap(&self, id: &str) -> StateResult<Option<SwapOperation>>;
    fn list_swaps(&self) -> StateResult<Vec<SwapOperation>>;

    fn put_snapshot(&self, snapshot: &PerformanceSnapshot) -> StateResult<()>;
    /// Most recent first, at most `limit` entries.
    fn list_snapshots(&self, version_id: &str, limit: usize)
    -> StateResult<Vec<PerformanceSnapshot>>;
    /// Drop all but the newest `keep` snapshots of a version. Returns number deleted.
    fn prune_snapshots(&self, version_id: &str, keep: usize) -> StateResult<u32>;
}

/// Map-backed repository with no persistence.
#[derive(Default)]
pub struct MemoryRepository {
    versions: RwLock<HashMap<String, IndexVersion>>,
    swaps: RwLock<HashMap<String, SwapOperation>>,
    snapshots: RwLock<BTreeMap<String, PerformanceSnapshot>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IndexRepository for MemoryRepository {
    fn put_version(&self, version: &IndexVersion) -> StateResult<()> {
        let mut versions = self.versions.write().expect("versions lock");
        versions.insert(version.id.clone(), version.clone());
        Ok(())
    }

    fn get_version(&self, id: &str) -> StateResult<Option<IndexVersion>> {
        let versions = self.versions.read().expect("versions lock");
        Ok(versions.get(id).cloned())
    }

    fn list_versions(&self) -> StateResult<Vec<IndexVersion>> {
        let versions = self.versions.read().expect("versions lock");
        let mut all: Vec<IndexVersion> = versions.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }

    fn delete_version(&self, id: &str) -> StateResult<bool> {
        let mut versions = self.versions.write().expect("versions lock");
        Ok(versions.remove(id).is_some())
    }

    fn put_swap(&self, op: &SwapOperation) -> StateResult<()> {
        let mut swaps = self.swaps.write().expect("swaps lock");
        swaps.insert(op.id.clone(), op.clone());
        Ok(())
    }

    fn get_swap(&self, id: &str) -> StateResult<Option<SwapOperation>> {
        let swaps = self.swaps.read().expect("swaps lock");
        Ok(swaps.get(id).cloned())
    }

    fn list_swaps(&self) -> StateResult<Vec<SwapOperation>> {
        let swaps = self.swaps.read().expect("swaps lock");
        let mut all: Vec<SwapOperation> = swaps.values().cloned().collect();
        all.sort_by_key(|op| op.started_at);
        Ok(all)
    }

    fn put_snapshot(&self, snapshot: &PerformanceSnapshot) -> StateResult<()> {
        let mut snapshots = self.snapshots.write().expect("snapshots lock");
        snapshots.insert(snapshot.table_key(), snapshot.clone());
        Ok(())
    }

    fn list_snapshots(
        &self,
        version_id: &str,
        limit: usize,
    ) -> StateResult<Vec<PerformanceSnapshot>> {
        let prefix = format!("{version_id}:");
        let snapshots = self.snapshots.read().expect("snapshots lock");
        Ok(snapshots
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .map(|(_, s)| s.clone())
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .take(limit)
            .collect())
    }

    fn prune_snapshots(&self, version_id: &str, keep: usize) -> StateResult<u32> {
        let prefix = format!("{version_id}:");
        let mut snapshots = self.snapshots.write().expect("snapshots lock");
        let keys: Vec<String> = snapshots
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .map(|(key, _)| key.clone())
            .collect();
        let excess = keys.len().saturating_sub(keep);
        for key in &keys[..excess] {
            snapshots.remove(key);
        }
        Ok(excess as u32)
    }
}
