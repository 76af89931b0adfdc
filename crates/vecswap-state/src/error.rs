//! Error types for the vecswap state store and version registry.

use thiserror::Error;

use crate::types::VersionStatus;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Result type alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors that can occur during state store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),
}

/// Errors surfaced by the version registry.
///
/// Everything except `Storage` is fatal for the request that caused it:
/// no state was changed and retrying the same call fails the same way.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("version {0} already exists")]
    DuplicateVersion(String),

    #[error("version {0} not found")]
    NotFound(String),

    #[error("version {id}: invalid transition {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: VersionStatus,
        to: VersionStatus,
    },

    #[error("new versions must be registered as building, got {0}")]
    InvalidInitialStatus(VersionStatus),

    #[error("no active version")]
    NoActiveVersion,

    #[error("version {0} is already active")]
    ActiveVersionExists(String),

    #[error(transparent)]
    Storage(#[from] StateError),
}
