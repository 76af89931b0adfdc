//! Traffic router — split table between the active and target versions.

use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use vecswap_core::VersionId;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RouterError {
    #[error("traffic percentage {0} is outside 0..=100")]
    InvalidPercentage(u32),

    #[error("no active version to route to")]
    NoActiveVersion,

    #[error("version {0} is already the active version")]
    TargetIsActive(String),
}

pub type RouterResult<T> = Result<T, RouterError>;

/// One immutable routing configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingTable {
    pub active: Option<VersionId>,
    pub target: Option<VersionId>,
    /// Target's share of traffic (0–100).
    pub target_percentage: u8,
}

impl RoutingTable {
    /// Version serving `key` under this table.
    pub fn route(&self, key: &str) -> Option<&str> {
        let active = self.active.as_deref()?;
        match self.target.as_deref() {
            Some(target) if bucket_of(key) < self.target_percentage => Some(target),
            _ => Some(active),
        }
    }

    /// Live versions with their shares. Shares always sum to 100.
    pub fn split(&self) -> Vec<(VersionId, u8)> {
        let Some(active) = &self.active else {
            return Vec::new();
        };
        match &self.target {
            Some(target) => vec![
                (active.clone(), 100 - self.target_percentage),
                (target.clone(), self.target_percentage),
            ],
            None => vec![(active.clone(), 100)],
        }
    }
}

/// Stable bucket in `0..100` for a query key.
pub fn bucket_of(key: &str) -> u8 {
    let digest = Sha256::digest(key.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(head) % 100) as u8
}

pub struct TrafficRouter {
    table: ArcSwap<RoutingTable>,
}

impl Default for TrafficRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl TrafficRouter {
    /// A router with no active version.
    pub fn new() -> Self {
        Self {
            table: ArcSwap::from_pointee(RoutingTable::default()),
        }
    }

    pub fn with_active(version_id: &str) -> Self {
        let router = Self::new();
        router.set_active(version_id);
        router
    }

    /// Current table. Never blocks.
    pub fn table(&self) -> Arc<RoutingTable> {
        self.table.load_full()
    }

    /// Route everything to `version_id`, dropping any split.
    pub fn set_active(&self, version_id: &str) {
        self.table.store(Arc::new(RoutingTable {
            active: Some(version_id.to_string()),
            target: None,
            target_percentage: 0,
        }));
        info!(version = %version_id, "routing all traffic to active version");
    }

    /// Send `percentage` of traffic to `target`, the rest to the active version.
    pub fn set_split(&self, target: &str, percentage: u32) -> RouterResult<()> {
        if percentage > 100 {
            return Err(RouterError::InvalidPercentage(percentage));
        }
        let current = self.table.load();
        let active = current.active.clone().ok_or(RouterError::NoActiveVersion)?;
        if active == target {
            return Err(RouterError::TargetIsActive(active));
        }
        self.table.store(Arc::new(RoutingTable {
            active: Some(active),
            target: Some(target.to_string()),
            target_percentage: percentage as u8,
        }));
        debug!(target = %target, percentage, "traffic split updated");
        Ok(())
    }

    /// Drop the target; the active version gets all traffic.
    pub fn clear_split(&self) {
        let current = self.table.load();
        if current.target.is_none() {
            return;
        }
        self.table.store(Arc::new(RoutingTable {
            active: current.active.clone(),
            target: None,
            target_percentage: 0,
        }));
        debug!("traffic split cleared");
    }

    pub fn route(&self, key: &str) -> RouterResult<VersionId> {
        self.table
            .load()
            .route(key)
            .map(str::to_string)
            .ok_or(RouterError::NoActiveVersion)
    }

    pub fn split(&self) -> Vec<(VersionId, u8)> {
        self.table.load().split()
    }

    /// Target's current share, 0 when no split is in place.
    pub fn target_percentage(&self) -> u8 {
        self.table.load().target_percentage
    }
}
