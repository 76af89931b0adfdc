/// Errors talking to the build-job system or the index probe.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("connection to {address} failed: {reason}")]
    Connect { address: String, reason: String },

    #[error("request to {uri} failed: {reason}")]
    Request { uri: String, reason: String },

    #[error("{uri} returned {status}: {body}")]
    Status { uri: String, status: u16, body: String },

    #[error("request to {uri} timed out")]
    Timeout { uri: String },

    #[error("invalid response from {uri}: {reason}")]
    Decode { uri: String, reason: String },

    #[error("circuit open, retry after {retry_after_secs}s")]
    CircuitOpen { retry_after_secs: u64 },

    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: Box<BuildError> },
}

impl BuildError {
    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            BuildError::Connect { .. } | BuildError::Request { .. } | BuildError::Timeout { .. } => true,
            BuildError::Status { status, .. } => *status >= 500 || *status == 429,
            BuildError::Decode { .. } | BuildError::CircuitOpen { .. } | BuildError::Exhausted { .. } => {
                false
            }
        }
    }
}

pub type BuildResult<T> = Result<T, BuildError>;
