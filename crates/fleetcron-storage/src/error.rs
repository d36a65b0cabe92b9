//! Errors of the staging area, feed store and index shards.

use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage misconfigured: {0}")]
    ConfigError(String),

    #[error("Write to staging failed: {0}")]
    UploadFailed(String),

    #[error("Read from staging failed: {0}")]
    DownloadFailed(String),

    #[error("Delete from staging failed: {0}")]
    DeleteFailed(String),

    #[error("Listing staging failed: {0}")]
    ListFailed(String),

    #[error("Key escapes the staging root: {0}")]
    InvalidKey(String),

    #[error("Feed store error: {0}")]
    Database(String),

    #[error("Index shard error: {0}")]
    Index(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("R2 request failed: {0}")]
    AwsSdk(String),
}

impl StorageError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn invalid_key(key: impl Into<String>) -> Self {
        Self::InvalidKey(key.into())
    }

    pub fn upload_failed(msg: impl Into<String>) -> Self {
        Self::UploadFailed(msg.into())
    }

    pub fn delete_failed(msg: impl Into<String>) -> Self {
        Self::DeleteFailed(msg.into())
    }
}

impl From<tokio_rusqlite::Error> for StorageError {
    fn from(e: tokio_rusqlite::Error) -> Self {
        Self::Database(e.to_string())
    }
}
