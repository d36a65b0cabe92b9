//! HTTP implementation of [`TaskChannel`].

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;
use url::Url;

use fleetcron_models::{MachineId, RpcCommand, RpcEnvelope, RpcResponse};

use crate::auth::SessionSigner;
use crate::channel::{TaskChannel, RPC_PATH};
use crate::error::{RpcError, RpcResult};

/// Longest error body kept in [`RpcError::Status`].
const MAX_ERROR_BODY: usize = 512;

/// Talks to a remote coordinator over HTTP.
#[derive(Debug, Clone)]
pub struct RemoteChannel {
    http: reqwest::Client,
    endpoint: Url,
    machine_id: MachineId,
    signer: SessionSigner,
}

impl RemoteChannel {
    pub fn new(
        coordinator_url: &str,
        machine_id: MachineId,
        signer: SessionSigner,
        timeout: Duration,
    ) -> RpcResult<Self> {
        let base = Url::parse(coordinator_url).map_err(|e| RpcError::InvalidUrl(format!("{}: {}", coordinator_url, e)))?;
        let endpoint = base
            .join(RPC_PATH)
            .map_err(|e| RpcError::InvalidUrl(e.to_string()))?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("fleetcron/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            endpoint,
            machine_id,
            signer,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn call(&self, job: &str, command: RpcCommand, args: Option<&Value>) -> RpcResult<Option<Value>> {
        let now = chrono::Utc::now().timestamp();
        let mut envelope = RpcEnvelope::new(job, self.machine_id.clone(), command, now);
        if let Some(args) = args {
            envelope = envelope.with_args(args)?;
        }
        self.signer.sign(&mut envelope)?;

        debug!(job, command = %command, endpoint = %self.endpoint, "Calling coordinator");

        let response = self.http.post(self.endpoint.clone()).json(&envelope).send().await?;
        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let cut = (0..=MAX_ERROR_BODY).rev().find(|i| body.is_char_boundary(*i)).unwrap_or(0);
                body.truncate(cut);
            }
            return Err(RpcError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let reply: RpcResponse = response.json().await?;
        Ok(reply.decode()?)
    }
}

#[async_trait]
impl TaskChannel for RemoteChannel {
    async fn get_tasks(&self, job: &str) -> RpcResult<Option<Value>> {
        self.call(job, RpcCommand::GetTasks, None).await
    }

    async fn put_tasks(&self, job: &str, result: Value) -> RpcResult<Option<Value>> {
        self.call(job, RpcCommand::PutTasks, Some(&result)).await
    }
}
