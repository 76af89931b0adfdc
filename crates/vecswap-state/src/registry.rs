//! VersionRegistry — authoritative lifecycle record of every index version.
//!
//! Writes are serialized by a registry-wide mutex so check-then-write
//! sequences (duplicate id, single active version) are atomic within the
//! process. Every status change is published on a broadcast channel.

use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use vecswap_core::epoch_secs;

use crate::error::{RegistryError, RegistryResult};
use crate::repository::IndexRepository;
use crate::types::*;

const EVENT_CAPACITY: usize = 256;

/// Facts reported by the build-job system for a finished build.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BuildStats {
    pub vector_count: u64,
    pub expected_vector_count: Option<u64>,
    pub memory_bytes: u64,
    pub build_duration_ms: u64,
}

pub struct VersionRegistry {
    repo: Arc<dyn IndexRepository>,
    write_lock: Mutex<()>,
    events: broadcast::Sender<StatusChange>,
}

impl VersionRegistry {
    pub fn new(repo: Arc<dyn IndexRepository>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            repo,
            write_lock: Mutex::new(()),
            events,
        }
    }

    /// Subscribe to status-change events.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusChange> {
        self.events.subscribe()
    }

    /// The repository backing this registry.
    pub fn repository(&self) -> &Arc<dyn IndexRepository> {
        &self.repo
    }

    /// Register a new version. It must be in `Building` status.
    pub fn register(&self, version: IndexVersion) -> RegistryResult<VersionId> {
        if version.status != VersionStatus::Building {
            return Err(RegistryError::InvalidInitialStatus(version.status));
        }
        let _guard = self.write_lock.lock().expect("registry lock");
        if self.repo.get_version(&version.id)?.is_some() {
            return Err(RegistryError::DuplicateVersion(version.id));
        }
        self.repo.put_version(&version)?;
        info!(version = %version.id, kind = %version.index_kind, "version registered");
        self.publish(&version.id, None, Some(version.status), version.created_at);
        Ok(version.id)
    }

    /// Register the very first version directly as `Active`.
    ///
    /// Only valid while no version is active.
    pub fn bootstrap(&self, mut version: IndexVersion) -> RegistryResult<VersionId> {
        let _guard = self.write_lock.lock().expect("registry lock");
        if let Some(active) = self.find_active()? {
            return Err(RegistryError::ActiveVersionExists(active.id));
        }
        if self.repo.get_version(&version.id)?.is_some() {
            return Err(RegistryError::DuplicateVersion(version.id));
        }
        version.status = VersionStatus::Active;
        self.repo.put_version(&version)?;
        info!(version = %version.id, "bootstrapped active version");
        self.publish(&version.id, None, Some(VersionStatus::Active), version.status_changed_at);
        Ok(version.id)
    }

    pub fn get(&self, id: &str) -> RegistryResult<IndexVersion> {
        self.repo
            .get_version(id)?
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    pub fn list(&self) -> RegistryResult<Vec<IndexVersion>> {
        Ok(self.repo.list_versions()?)
    }

    /// Move a version to `status`.
    ///
    /// Setting the status a version already has is a no-op, so retried
    /// transitions converge instead of failing.
    pub fn set_status(&self, id: &str, status: VersionStatus) -> RegistryResult<IndexVersion> {
        self.set_status_at(id, status, epoch_secs())
    }

    pub fn set_status_at(
        &self,
        id: &str,
        status: VersionStatus,
        now: u64,
    ) -> RegistryResult<IndexVersion> {
        let _guard = self.write_lock.lock().expect("registry lock");
        self.transition(id, status, now, |_| {})
    }

    /// Record a successful build and move the version to `Ready`.
    pub fn complete_build(&self, id: &str, stats: &BuildStats) -> RegistryResult<IndexVersion> {
        let _guard = self.write_lock.lock().expect("registry lock");
        self.transition(id, VersionStatus::Ready, epoch_secs(), |v| {
            v.vector_count = stats.vector_count;
            v.expected_vector_count = stats.expected_vector_count;
            v.memory_bytes = stats.memory_bytes;
            v.build_duration_ms = stats.build_duration_ms;
        })
    }

    /// Record a failed build and move the version to `Failed`.
    pub fn fail_build(&self, id: &str, reason: &str) -> RegistryResult<IndexVersion> {
        let _guard = self.write_lock.lock().expect("registry lock");
        let version = self.transition(id, VersionStatus::Failed, epoch_secs(), |v| {
            v.failure_reason = Some(reason.to_string());
        })?;
        warn!(version = %id, %reason, "build failed");
        Ok(version)
    }

    /// Demote `source` to `Retiring` and promote `target` to `Active`.
    ///
    /// Each half is skipped if it already happened, so a retry after a
    /// partial failure finishes the job without duplicating effects.
    pub fn promote(&self, source: &str, target: &str, now: u64) -> RegistryResult<()> {
        let _guard = self.write_lock.lock().expect("registry lock");
        let src = self.get(source)?;
        if src.status != VersionStatus::Retiring {
            self.transition(source, VersionStatus::Retiring, now, |_| {})?;
        }
        self.transition(target, VersionStatus::Active, now, |_| {})?;
        info!(from = %source, to = %target, "active version promoted");
        Ok(())
    }

    /// Delete a `Retiring` or `Failed` version.
    pub fn remove(&self, id: &str) -> RegistryResult<()> {
        let _guard = self.write_lock.lock().expect("registry lock");
        let version = self.get(id)?;
        if !version.status.is_removable() {
            return Err(RegistryError::InvalidTransition {
                id: id.to_string(),
                from: version.status,
                to: VersionStatus::Retiring,
            });
        }
        self.repo.delete_version(id)?;
        info!(version = %id, "version removed");
        self.publish(id, Some(version.status), None, epoch_secs());
        Ok(())
    }

    /// Remove every version that has been `Retiring` for at least `grace_secs`.
    pub fn reap_retired(&self, grace_secs: u64, now: u64) -> RegistryResult<Vec<VersionId>> {
        let expired: Vec<VersionId> = self
            .list()?
            .into_iter()
            .filter(|v| {
                v.status == VersionStatus::Retiring
                    && now.saturating_sub(v.status_changed_at) >= grace_secs
            })
            .map(|v| v.id)
            .collect();
        for id in &expired {
            self.remove(id)?;
        }
        Ok(expired)
    }

    /// Flag a version so it is not swapped in again without operator review.
    pub fn flag_for_review(&self, id: &str, reason: &str) -> RegistryResult<IndexVersion> {
        self.update(id, |v| v.review_reason = Some(reason.to_string()))
    }

    pub fn clear_review(&self, id: &str) -> RegistryResult<IndexVersion> {
        self.update(id, |v| v.review_reason = None)
    }

    /// The version currently serving traffic.
    pub fn active_version(&self) -> RegistryResult<IndexVersion> {
        self.find_active()?.ok_or(RegistryError::NoActiveVersion)
    }

    /// Newest `Ready`, unflagged version with the given dimensionality.
    pub fn newest_swappable(&self, dimensions: u32) -> RegistryResult<Option<IndexVersion>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|v| v.is_swappable() && v.dimensions == dimensions)
            .max_by_key(|v| v.created_at))
    }

    /// Next sequential version id (`v1`, `v2`, ...).
    pub fn next_version_id(&self) -> RegistryResult<VersionId> {
        let highest = self
            .list()?
            .iter()
            .filter_map(|v| v.id.strip_prefix('v').and_then(|n| n.parse::<u64>().ok()))
            .max()
            .unwrap_or(0);
        Ok(format!("v{}", highest + 1))
    }

    fn find_active(&self) -> RegistryResult<Option<IndexVersion>> {
        Ok(self
            .repo
            .list_versions()?
            .into_iter()
            .find(|v| v.status == VersionStatus::Active))
    }

    /// Apply a field update that does not change status.
    fn update(
        &self,
        id: &str,
        apply: impl FnOnce(&mut IndexVersion),
    ) -> RegistryResult<IndexVersion> {
        let _guard = self.write_lock.lock().expect("registry lock");
        let mut version = self.get(id)?;
        apply(&mut version);
        self.repo.put_version(&version)?;
        Ok(version)
    }

    /// Caller must hold `write_lock`.
    fn transition(
        &self,
        id: &str,
        status: VersionStatus,
        now: u64,
        apply: impl FnOnce(&mut IndexVersion),
    ) -> RegistryResult<IndexVersion> {
        let mut version = self.get(id)?;
        let from = version.status;
        if from == status {
            debug!(version = %id, %status, "status unchanged");
            return Ok(version);
        }
        if !from.can_transition_to(status) {
            return Err(RegistryError::InvalidTransition {
                id: id.to_string(),
                from,
                to: status,
            });
        }
        if status == VersionStatus::Active {
            if let Some(active) = self.find_active()? {
                return Err(RegistryError::ActiveVersionExists(active.id));
            }
        }
        apply(&mut version);
        version.status = status;
        version.status_changed_at = now;
        self.repo.put_version(&version)?;
        info!(version = %id, %from, to = %status, "version status changed");
        self.publish(id, Some(from), Some(status), now);
        Ok(version)
    }

    fn publish(&self, id: &str, from: Option<VersionStatus>, to: Option<VersionStatus>, at: u64) {
        // No subscribers is fine.
        let _ = self.events.send(StatusChange {
            version_id: id.to_string(),
            from,
            to,
            at,
        });
    }
}
