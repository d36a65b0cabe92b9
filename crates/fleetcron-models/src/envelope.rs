//! Versioned request/response envelopes for the coordinator RPC channel.
//!
//! A worker sends one [`RpcEnvelope`] per call and receives one [`RpcResponse`].
//! Envelopes carry no session state; the `session` field is an authentication
//! digest over the timestamp, routing fields and arguments, not a session
//! identifier.

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::{ModelError, ModelResult};
use crate::machine::MachineId;

/// Current envelope schema version. Peers on a different version are rejected.
pub const ENVELOPE_VERSION: u16 = 1;

/// Commands a worker may issue against a job on the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RpcCommand {
    /// Ask the coordinator for one unit of work.
    GetTasks,
    /// Report the result of a finished unit of work.
    PutTasks,
}

impl RpcCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            RpcCommand::GetTasks => "get_tasks",
            RpcCommand::PutTasks => "put_tasks",
        }
    }
}

impl fmt::Display for RpcCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outbound worker request.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RpcEnvelope {
    /// Envelope schema version
    pub version: u16,
    /// Registered job name
    pub job: String,
    /// Identity of the calling worker
    pub machine_id: MachineId,
    /// Command to run
    pub command: RpcCommand,
    /// Unix timestamp (seconds) at which the request was signed
    pub time: i64,
    /// Hex HMAC-SHA256 digest of [`RpcEnvelope::signing_payload`]
    pub session: String,
    /// JSON-serialized command arguments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<String>,
}

impl RpcEnvelope {
    /// Build an unsigned envelope; the caller fills `session` afterwards.
    pub fn new(job: impl Into<String>, machine_id: MachineId, command: RpcCommand, time: i64) -> Self {
        Self {
            version: ENVELOPE_VERSION,
            job: job.into(),
            machine_id,
            command,
            time,
            session: String::new(),
            args: None,
        }
    }

    /// Attach serialized arguments.
    pub fn with_args<T: Serialize>(mut self, args: &T) -> ModelResult<Self> {
        self.args = Some(serde_json::to_string(args)?);
        Ok(self)
    }

    /// Bytes covered by the session digest.
    pub fn signing_payload(&self) -> String {
        signing_payload(self.time, &self.machine_id, &self.job, self.command, self.args.as_deref())
    }

    /// Structural validation, independent of authentication.
    pub fn validate(&self) -> ModelResult<()> {
        if self.version != ENVELOPE_VERSION {
            return Err(ModelError::UnsupportedVersion(self.version));
        }
        if self.job.trim().is_empty() {
            return Err(ModelError::missing_field("job"));
        }
        if self.machine_id.as_str().trim().is_empty() {
            return Err(ModelError::missing_field("machine_id"));
        }
        if self.session.trim().is_empty() {
            return Err(ModelError::missing_field("session"));
        }
        if self.command == RpcCommand::PutTasks && self.args.is_none() {
            return Err(ModelError::missing_field("args"));
        }
        Ok(())
    }

    /// Decode the argument blob into a typed value.
    pub fn decode_args<T: DeserializeOwned>(&self) -> ModelResult<Option<T>> {
        match &self.args {
            Some(raw) => Ok(Some(serde_json::from_str(raw)?)),
            None => Ok(None),
        }
    }
}

/// Canonical string signed by both sides. The arguments enter as their
/// SHA-256 hex; absent arguments leave the last field empty.
pub fn signing_payload(
    time: i64,
    machine_id: &MachineId,
    job: &str,
    command: RpcCommand,
    args: Option<&str>,
) -> String {
    let args_digest = args
        .map(|raw| format!("{:x}", Sha256::digest(raw.as_bytes())))
        .unwrap_or_default();
    format!("{}|{}|{}|{}|{}", time, machine_id, job, command, args_digest)
}

/// Inbound coordinator response.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RpcResponse {
    /// Envelope schema version
    pub version: u16,
    /// JSON-serialized return value; absent when the coordinator had nothing to return
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

impl RpcResponse {
    pub fn empty() -> Self {
        Self {
            version: ENVELOPE_VERSION,
            result: None,
        }
    }

    pub fn with_result<T: Serialize>(value: &T) -> ModelResult<Self> {
        Ok(Self {
            version: ENVELOPE_VERSION,
            result: Some(serde_json::to_string(value)?),
        })
    }

    pub fn decode<T: DeserializeOwned>(&self) -> ModelResult<Option<T>> {
        if self.version != ENVELOPE_VERSION {
            return Err(ModelError::UnsupportedVersion(self.version));
        }
        match &self.result {
            Some(raw) => Ok(Some(serde_json::from_str(raw)?)),
            None => Ok(None),
        }
    }
}

/// JSON schema of the request envelope, published alongside the endpoint.
pub fn envelope_schema() -> schemars::schema::RootSchema {
    schemars::schema_for!(RpcEnvelope)
}
