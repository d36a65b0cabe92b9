//! The job lifecycle contract.
//!
//! A job is written against [`Job`] with its own task and outcome types.
//! The registry, the driver and the RPC endpoint only see [`DynJob`], which
//! moves those payloads as JSON values.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use fleetcron_models::{Ack, JobMode, MachineId, NodeRole, Roster};
use fleetcron_storage::StagingStore;

use crate::error::{JobError, JobResult};

/// What a job needs to know about the node it runs on.
#[derive(Clone)]
pub struct JobContext {
    pub machine_id: MachineId,
    pub role: NodeRole,
    /// Ordered worker roster; empty in single-node mode
    pub roster: Roster,
    pub staging: Arc<dyn StagingStore>,
}

impl JobContext {
    pub fn new(machine_id: MachineId, role: NodeRole, roster: Roster, staging: Arc<dyn StagingStore>) -> Self {
        Self {
            machine_id,
            role,
            roster,
            staging,
        }
    }

    pub fn is_coordinator(&self) -> bool {
        self.role == NodeRole::Coordinator
    }

    pub fn single_node(&self) -> bool {
        self.roster.is_empty()
    }
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("machine_id", &self.machine_id)
            .field("role", &self.role)
            .field("roster", &self.roster)
            .field("staging", &self.staging.describe())
            .finish()
    }
}

/// A recurring fleet job.
///
/// Coordinator phases: `prepare_tasks`, `finish_tasks`, `get_tasks`,
/// `put_tasks`. Worker phase: `do_tasks`. Single-node deployments run only
/// `nondistributed_tasks`.
#[async_trait]
pub trait Job: Send + Sync + 'static {
    /// Work item handed to a worker.
    type Task: Serialize + DeserializeOwned + Send + Sync;
    /// Result reported back by a worker.
    type Outcome: Serialize + DeserializeOwned + Send + Sync;

    fn name(&self) -> &str;

    fn mode(&self) -> JobMode {
        JobMode::default()
    }

    /// Cheap, side-effect-free gate evaluated before every tick.
    async fn check_prerequisites(&self) -> bool {
        true
    }

    /// Whole job on one node.
    async fn nondistributed_tasks(&self) -> JobResult<()>;

    async fn prepare_tasks(&self) -> JobResult<()> {
        Ok(())
    }

    async fn finish_tasks(&self) -> JobResult<()> {
        Ok(())
    }

    /// Hand one work item to `worker`. `None` means nothing to do.
    async fn get_tasks(&self, worker: &MachineId) -> JobResult<Option<Self::Task>>;

    /// Execute a work item. `None` leaves the item for a later retry.
    async fn do_tasks(&self, task: Self::Task) -> JobResult<Option<Self::Outcome>>;

    /// Accept a finished work item from `worker`.
    async fn put_tasks(&self, worker: &MachineId, outcome: Self::Outcome) -> JobResult<Ack>;
}

/// Object-safe view of a [`Job`].
#[async_trait]
pub trait DynJob: Send + Sync {
    fn name(&self) -> &str;
    fn mode(&self) -> JobMode;
    async fn check_prerequisites(&self) -> bool;
    async fn nondistributed_tasks(&self) -> JobResult<()>;
    async fn prepare_tasks(&self) -> JobResult<()>;
    async fn finish_tasks(&self) -> JobResult<()>;
    async fn get_tasks(&self, worker: &MachineId) -> JobResult<Option<Value>>;
    async fn do_tasks(&self, task: Value) -> JobResult<Option<Value>>;
    async fn put_tasks(&self, worker: &MachineId, outcome: Value) -> JobResult<Value>;
}

/// Adapts a typed job to [`DynJob`].
pub struct ErasedJob<J: Job>(Arc<J>);

impl<J: Job> ErasedJob<J> {
    pub fn new(job: Arc<J>) -> Self {
        Self(job)
    }
}

fn decode<T: DeserializeOwned>(job: &str, what: &str, value: Value) -> JobResult<T> {
    serde_json::from_value(value).map_err(|e| JobError::malformed(format!("{} {}: {}", job, what, e)))
}

#[async_trait]
impl<J: Job> DynJob for ErasedJob<J> {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn mode(&self) -> JobMode {
        self.0.mode()
    }

    async fn check_prerequisites(&self) -> bool {
        self.0.check_prerequisites().await
    }

    async fn nondistributed_tasks(&self) -> JobResult<()> {
        self.0.nondistributed_tasks().await
    }

    async fn prepare_tasks(&self) -> JobResult<()> {
        self.0.prepare_tasks().await
    }

    async fn finish_tasks(&self) -> JobResult<()> {
        self.0.finish_tasks().await
    }

    async fn get_tasks(&self, worker: &MachineId) -> JobResult<Option<Value>> {
        match self.0.get_tasks(worker).await? {
            Some(task) => Ok(Some(serde_json::to_value(task)?)),
            None => Ok(None),
        }
    }

    async fn do_tasks(&self, task: Value) -> JobResult<Option<Value>> {
        let task: J::Task = decode(self.name(), "task", task)?;
        match self.0.do_tasks(task).await? {
            Some(outcome) => Ok(Some(serde_json::to_value(outcome)?)),
            None => Ok(None),
        }
    }

    async fn put_tasks(&self, worker: &MachineId, outcome: Value) -> JobResult<Value> {
        let outcome: J::Outcome = decode(self.name(), "result", outcome)?;
        let ack = self.0.put_tasks(worker, outcome).await?;
        Ok(serde_json::to_value(ack)?)
    }
}
