//! Ordered set of jobs known to a node.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use fleetcron_models::{MachineId, RpcCommand};

use crate::error::{JobError, JobResult};
use crate::job::{DynJob, ErasedJob, Job};

/// Jobs in registration order; ticks run them in this order.
#[derive(Clone, Default)]
pub struct JobRegistry {
    jobs: Vec<Arc<dyn DynJob>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a typed job. A job with the same name replaces the old one
    /// in place.
    pub fn register<J: Job>(&mut self, job: Arc<J>) -> &mut Self {
        self.register_dyn(Arc::new(ErasedJob::new(job)))
    }

    pub fn register_dyn(&mut self, job: Arc<dyn DynJob>) -> &mut Self {
        match self.jobs.iter().position(|j| j.name() == job.name()) {
            Some(index) => self.jobs[index] = job,
            None => self.jobs.push(job),
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn DynJob>> {
        self.jobs.iter().find(|j| j.name() == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.jobs.iter().map(|j| j.name().to_string()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn DynJob>> {
        self.jobs.iter()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Answer one worker call on the coordinator.
    ///
    /// `get_tasks` returns the work item or `None`; `put_tasks` requires
    /// `args` and returns the job's acknowledgement.
    pub async fn dispatch(
        &self,
        worker: &MachineId,
        job: &str,
        command: RpcCommand,
        args: Option<Value>,
    ) -> JobResult<Option<Value>> {
        let target = self.get(job).ok_or_else(|| JobError::unknown_job(job))?;
        debug!(job, worker = %worker, command = %command, "Dispatching worker call");
        match command {
            RpcCommand::GetTasks => target.get_tasks(worker).await,
            RpcCommand::PutTasks => {
                let args = args.ok_or_else(|| JobError::malformed("put_tasks requires args"))?;
                Ok(Some(target.put_tasks(worker, args).await?))
            }
        }
    }
}

impl std::fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRegistry").field("jobs", &self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingJob;
    use serde_json::json;

    #[tokio::test]
    async fn test_dispatch_routes_by_name() {
        let mut registry = JobRegistry::new();
        registry.register(Arc::new(RecordingJob::new("a")));
        registry.register(Arc::new(RecordingJob::new("b").with_task(json!(7))));
        assert_eq!(registry.names(), vec!["a", "b"]);

        let worker = MachineId::from("w");
        let task = registry.dispatch(&worker, "b", RpcCommand::GetTasks, None).await.unwrap();
        assert_eq!(task, Some(json!(7)));
        assert_eq!(registry.dispatch(&worker, "a", RpcCommand::GetTasks, None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unknown_job_and_missing_args() {
        let mut registry = JobRegistry::new();
        registry.register(Arc::new(RecordingJob::new("a")));
        let worker = MachineId::from("w");

        let err = registry.dispatch(&worker, "zzz", RpcCommand::GetTasks, None).await.unwrap_err();
        assert!(matches!(err, JobError::UnknownJob(_)));

        let err = registry.dispatch(&worker, "a", RpcCommand::PutTasks, None).await.unwrap_err();
        assert!(err.is_malformed());
    }

    #[test]
    fn test_register_same_name_replaces() {
        let mut registry = JobRegistry::new();
        registry.register(Arc::new(RecordingJob::new("a")));
        registry.register(Arc::new(RecordingJob::new("b")));
        registry.register(Arc::new(RecordingJob::new("a")));
        assert_eq!(registry.names(), vec!["a", "b"]);
    }
}
