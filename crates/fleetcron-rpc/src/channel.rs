//! The worker's view of the coordinator.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::RpcResult;

/// Path of the coordinator endpoint.
pub const RPC_PATH: &str = "/rpc";

/// Pull-style task exchange with the coordinator. Workers call; the
/// coordinator never calls back.
#[async_trait]
pub trait TaskChannel: Send + Sync {
    /// Ask for one work item of `job`. `None` is the normal idle answer.
    async fn get_tasks(&self, job: &str) -> RpcResult<Option<Value>>;

    /// Report a finished work item.
    async fn put_tasks(&self, job: &str, result: Value) -> RpcResult<Option<Value>>;
}
