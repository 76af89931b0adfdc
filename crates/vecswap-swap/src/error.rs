use vecswap_router::RouterError;
use vecswap_state::{RegistryError, StateError, SwapPhase, VersionStatus};

#[derive(Debug, thiserror::Error)]
pub enum SwapError {
    #[error("swap {0} is already in progress")]
    SwapAlreadyInProgress(String),

    #[error("version {id} is {status}, not ready")]
    VersionNotReady { id: String, status: VersionStatus },

    #[error("version {id} is flagged for review: {reason}")]
    UnderReview { id: String, reason: String },

    #[error("dimension mismatch: active has {active}, target has {target}")]
    DimensionMismatch { active: u32, target: u32 },

    #[error("swap {id} is {phase} and cannot be cancelled")]
    NotCancellable { id: String, phase: SwapPhase },

    #[error("swap not found: {0}")]
    NotFound(String),

    #[error("rollback threshold must be a positive fraction, got {0}")]
    InvalidThreshold(f64),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Router(#[from] RouterError),

    #[error(transparent)]
    State(#[from] StateError),
}

pub type SwapResult<T> = Result<T, SwapError>;
