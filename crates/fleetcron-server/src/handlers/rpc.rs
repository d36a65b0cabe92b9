//! Coordinator side of the worker RPC channel.

use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::Value;
use tracing::warn;

use fleetcron_models::{NodeRole, RpcEnvelope, RpcResponse};

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

/// `POST /rpc`: verify the envelope, dispatch it to the named job and return
/// the job's answer. Every rejection happens before the job is touched.
pub async fn rpc(State(state): State<AppState>, body: Result<Bytes, BytesRejection>) -> ApiResult<Json<RpcResponse>> {
    let body = body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge
        } else {
            ApiError::bad_request(rejection.body_text())
        }
    })?;

    let envelope: RpcEnvelope =
        serde_json::from_slice(&body).map_err(|e| ApiError::bad_request(format!("invalid envelope: {}", e)))?;
    let command = envelope.command;

    let result = handle(&state, &envelope).await;
    let status = match &result {
        Ok(_) => StatusCode::OK,
        Err(e) => e.status_code(),
    };
    metrics::record_rpc_request(command.as_str(), status.as_u16());
    if let Err(e) = &result {
        warn!(
            job = %envelope.job,
            worker = %envelope.machine_id,
            command = %command,
            status = status.as_u16(),
            "RPC rejected: {}",
            e
        );
    }
    result.map(Json)
}

async fn handle(state: &AppState, envelope: &RpcEnvelope) -> ApiResult<RpcResponse> {
    if state.role != NodeRole::Coordinator {
        return Err(ApiError::NotFound("this node does not coordinate jobs".to_string()));
    }
    envelope.validate()?;
    state.signer.verify(envelope, chrono::Utc::now().timestamp())?;
    let args = envelope.decode_args::<Value>()?;
    let reply = state
        .registry
        .dispatch(&envelope.machine_id, &envelope.job, envelope.command, args)
        .await?;

    Ok(match reply {
        Some(value) => RpcResponse::with_result(&value)?,
        None => RpcResponse::empty(),
    })
}
