//! In-process channel for a coordinator that also plays worker.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use fleetcron_models::{MachineId, RpcCommand};
use fleetcron_rpc::{RpcError, RpcResult, TaskChannel};

use crate::error::JobError;
use crate::registry::JobRegistry;

/// Calls the local registry directly instead of going through HTTP. Errors
/// are mapped to the status codes the endpoint would have answered with.
#[derive(Debug, Clone)]
pub struct LocalChannel {
    registry: Arc<JobRegistry>,
    machine_id: MachineId,
}

impl LocalChannel {
    pub fn new(registry: Arc<JobRegistry>, machine_id: MachineId) -> Self {
        Self { registry, machine_id }
    }

    async fn call(&self, job: &str, command: RpcCommand, args: Option<Value>) -> RpcResult<Option<Value>> {
        self.registry
            .dispatch(&self.machine_id, job, command, args)
            .await
            .map_err(into_rpc_error)
    }
}

fn into_rpc_error(err: JobError) -> RpcError {
    let status = match &err {
        JobError::UnknownJob(_) => 404,
        e if e.is_malformed() => 400,
        e if e.is_transient() => 503,
        _ => 500,
    };
    RpcError::Status {
        status,
        body: err.to_string(),
    }
}

#[async_trait]
impl TaskChannel for LocalChannel {
    async fn get_tasks(&self, job: &str) -> RpcResult<Option<Value>> {
        self.call(job, RpcCommand::GetTasks, None).await
    }

    async fn put_tasks(&self, job: &str, result: Value) -> RpcResult<Option<Value>> {
        self.call(job, RpcCommand::PutTasks, Some(result)).await
    }
}
