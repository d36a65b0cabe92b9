//! Model-level error types.

use thiserror::Error;

pub type ModelResult<T> = Result<T, ModelError>;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Unsupported envelope version: {0}")]
    UnsupportedVersion(u16),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ModelError {
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField(field.into())
    }

    pub fn invalid_value(msg: impl Into<String>) -> Self {
        Self::InvalidValue(msg.into())
    }
}
