//! Test doubles shared by the unit tests.

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use fleetcron_models::{Ack, JobMode, JobPhase, MachineId};

use crate::error::{JobError, JobResult};
use crate::job::Job;

/// Job that records which phases ran and what workers reported.
pub struct RecordingJob {
    name: String,
    mode: JobMode,
    ready: bool,
    task: Option<Value>,
    yields: bool,
    fail_phase: Option<(JobPhase, bool)>,
    calls: Mutex<Vec<JobPhase>>,
    reported: Mutex<Vec<Value>>,
}

impl RecordingJob {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            mode: JobMode::default(),
            ready: true,
            task: None,
            yields: true,
            fail_phase: None,
            calls: Mutex::new(Vec::new()),
            reported: Mutex::new(Vec::new()),
        }
    }

    pub fn with_mode(mut self, mode: JobMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_task(mut self, task: Value) -> Self {
        self.task = Some(task);
        self
    }

    pub fn not_ready(mut self) -> Self {
        self.ready = false;
        self
    }

    /// `do_tasks` returns `None`.
    pub fn yielding_nothing(mut self) -> Self {
        self.yields = false;
        self
    }

    pub fn failing_in(mut self, phase: JobPhase, transient: bool) -> Self {
        self.fail_phase = Some((phase, transient));
        self
    }

    pub fn calls(&self) -> Vec<JobPhase> {
        self.calls.lock().unwrap().clone()
    }

    pub fn reported(&self) -> Vec<Value> {
        self.reported.lock().unwrap().clone()
    }

    fn enter(&self, phase: JobPhase) -> JobResult<()> {
        self.calls.lock().unwrap().push(phase);
        match self.fail_phase {
            Some((failing, true)) if failing == phase => Err(JobError::fetch_failed("upstream unreachable")),
            Some((failing, false)) if failing == phase => Err(JobError::job_failed("broken")),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Job for RecordingJob {
    type Task = Value;
    type Outcome = Value;

    fn name(&self) -> &str {
        &self.name
    }

    fn mode(&self) -> JobMode {
        self.mode
    }

    async fn check_prerequisites(&self) -> bool {
        self.calls.lock().unwrap().push(JobPhase::CheckPrerequisites);
        self.ready
    }

    async fn nondistributed_tasks(&self) -> JobResult<()> {
        self.enter(JobPhase::Nondistributed)
    }

    async fn prepare_tasks(&self) -> JobResult<()> {
        self.enter(JobPhase::Prepare)
    }

    async fn finish_tasks(&self) -> JobResult<()> {
        self.enter(JobPhase::Finish)
    }

    async fn get_tasks(&self, _worker: &MachineId) -> JobResult<Option<Value>> {
        self.enter(JobPhase::GetTasks)?;
        Ok(self.task.clone())
    }

    async fn do_tasks(&self, task: Value) -> JobResult<Option<Value>> {
        self.enter(JobPhase::DoTasks)?;
        Ok(self.yields.then_some(task))
    }

    async fn put_tasks(&self, _worker: &MachineId, outcome: Value) -> JobResult<Ack> {
        self.enter(JobPhase::PutTasks)?;
        self.reported.lock().unwrap().push(outcome);
        Ok(Ack::accepted())
    }
}
