//! Job error types.

use thiserror::Error;

pub type JobResult<T> = Result<T, JobError>;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("Unknown job: {0}")]
    UnknownJob(String),

    #[error("Malformed payload: {0}")]
    Malformed(String),

    #[error("Fetch failed: {0}")]
    FetchFailed(String),

    #[error("Mail delivery failed: {0}")]
    DeliveryFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Storage error: {0}")]
    Storage(#[from] fleetcron_storage::StorageError),

    #[error("Media error: {0}")]
    Media(#[from] fleetcron_media::MediaError),

    #[error("RPC error: {0}")]
    Rpc(#[from] fleetcron_rpc::RpcError),

    #[error("Model error: {0}")]
    Model(#[from] fleetcron_models::ModelError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl JobError {
    pub fn job_failed(msg: impl Into<String>) -> Self {
        Self::JobFailed(msg.into())
    }

    pub fn unknown_job(name: impl Into<String>) -> Self {
        Self::UnknownJob(name.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }

    pub fn fetch_failed(msg: impl Into<String>) -> Self {
        Self::FetchFailed(msg.into())
    }

    pub fn delivery_failed(msg: impl Into<String>) -> Self {
        Self::DeliveryFailed(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Failures that go away on their own: network, remote services and
    /// external tools. The work item is retried on a later tick.
    pub fn is_transient(&self) -> bool {
        match self {
            JobError::FetchFailed(_) | JobError::DeliveryFailed(_) | JobError::Storage(_) | JobError::Io(_) => true,
            JobError::Rpc(e) => e.is_transient(),
            JobError::Media(e) => !e.is_tool_missing(),
            _ => false,
        }
    }

    /// Failures that affect every item on this node, not just the one being
    /// worked on: missing tools and bad configuration.
    pub fn is_fatal(&self) -> bool {
        match self {
            JobError::ConfigError(_) => true,
            JobError::Media(e) => e.is_tool_missing(),
            _ => false,
        }
    }

    /// The caller sent something unusable; nothing was changed.
    pub fn is_malformed(&self) -> bool {
        matches!(self, JobError::Malformed(_) | JobError::Json(_) | JobError::Model(_))
    }
}
