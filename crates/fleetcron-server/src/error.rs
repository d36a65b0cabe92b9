//! RPC endpoint error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use fleetcron_jobs::JobError;
use fleetcron_models::ModelError;
use fleetcron_rpc::RpcError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Payload too large")]
    PayloadTooLarge,

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Job error: {0}")]
    Job(JobError),
}

impl ApiError {
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Job(e) if e.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Job(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn hides_detail(&self) -> bool {
        matches!(self, ApiError::Internal(_) | ApiError::Job(_))
    }
}

impl From<RpcError> for ApiError {
    fn from(e: RpcError) -> Self {
        if e.is_auth() {
            ApiError::Unauthorized(e.to_string())
        } else {
            ApiError::BadRequest(e.to_string())
        }
    }
}

impl From<ModelError> for ApiError {
    fn from(e: ModelError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl From<JobError> for ApiError {
    fn from(e: JobError) -> Self {
        match e {
            JobError::UnknownJob(name) => ApiError::NotFound(format!("job {} is not registered", name)),
            e if e.is_malformed() => ApiError::BadRequest(e.to_string()),
            e => ApiError::Job(e),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Don't expose job internals in production
        let detail = if self.hides_detail() && std::env::var("ENVIRONMENT").unwrap_or_default() == "production" {
            "An internal error occurred".to_string()
        } else {
            self.to_string()
        };

        (status, Json(ErrorResponse { detail })).into_response()
    }
}
