//! RPC error types.

use fleetcron_models::ModelError;
use thiserror::Error;

pub type RpcResult<T> = Result<T, RpcError>;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("Invalid coordinator URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid signing key: {0}")]
    InvalidKey(String),

    #[error("Transport failed: {0}")]
    Transport(String),

    #[error("Coordinator returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Session digest mismatch")]
    BadDigest,

    #[error("Request time is {skew_secs}s away from coordinator clock")]
    StaleTimestamp { skew_secs: i64 },

    #[error("Malformed envelope: {0}")]
    Malformed(String),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RpcError {
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }

    /// Authentication failures, as opposed to structural ones.
    pub fn is_auth(&self) -> bool {
        matches!(self, RpcError::BadDigest | RpcError::StaleTimestamp { .. })
    }

    /// Whether retrying on a later tick can succeed without any change.
    pub fn is_transient(&self) -> bool {
        match self {
            RpcError::Transport(_) => true,
            RpcError::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for RpcError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}
