//! Per-tick job driver and the scheduler loop.
//!
//! The driver is the job boundary: every phase error is logged, counted and
//! swallowed here, so one job never stops another job's tick.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{info, Instrument};

use fleetcron_models::{Ack, JobPhase, MachineId, NodeRole};
use fleetcron_rpc::TaskChannel;

use crate::error::{JobError, JobResult};
use crate::job::DynJob;
use crate::logging::JobLogger;
use crate::metrics;
use crate::registry::JobRegistry;

/// What the worker side of a job did this tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerStep {
    /// The coordinator had nothing to hand out.
    Idle,
    /// A work item ran but produced nothing to report.
    NoResult,
    /// The result was reported to the coordinator.
    Reported { accepted: bool },
}

/// Summary of one job within one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTick {
    pub job: String,
    /// `check_prerequisites` passed
    pub ready: bool,
    /// Phases that ran to completion, in order
    pub completed: Vec<JobPhase>,
    pub worker: Option<WorkerStep>,
    /// Phase that failed and whether the failure was transient
    pub failure: Option<(JobPhase, bool)>,
}

impl JobTick {
    fn new(job: &str) -> Self {
        Self {
            job: job.to_string(),
            ready: false,
            completed: Vec::new(),
            worker: None,
            failure: None,
        }
    }
}

/// Drives every registered job through one tick on this node.
pub struct TickDriver {
    registry: Arc<JobRegistry>,
    channel: Arc<dyn TaskChannel>,
    machine_id: MachineId,
    role: NodeRole,
    single_node: bool,
}

impl TickDriver {
    pub fn new(
        registry: Arc<JobRegistry>,
        channel: Arc<dyn TaskChannel>,
        machine_id: MachineId,
        role: NodeRole,
        single_node: bool,
    ) -> Self {
        Self {
            registry,
            channel,
            machine_id,
            role,
            single_node,
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Run all jobs sequentially, in registration order.
    pub async fn tick(&self) -> Vec<JobTick> {
        metrics::record_tick(self.role.as_str());
        let mut ticks = Vec::with_capacity(self.registry.len());
        for job in self.registry.iter() {
            let span = tracing::info_span!("tick", job = job.name(), role = %self.role);
            ticks.push(self.run_job(job.as_ref()).instrument(span).await);
        }
        ticks
    }

    /// Drive one job through its lifecycle.
    pub async fn run_job(&self, job: &dyn DynJob) -> JobTick {
        let name = job.name().to_string();
        let mut tick = JobTick::new(&name);

        if !job.check_prerequisites().await {
            JobLogger::new(&name, JobPhase::CheckPrerequisites).log_idle("prerequisites not met");
            metrics::record_job_run(&name, "skipped");
            return tick;
        }
        tick.ready = true;

        if self.single_node {
            if self.role == NodeRole::Coordinator {
                metrics::record_job_run(&name, "single_node");
                self.run_phase(job, JobPhase::Nondistributed, &mut tick).await;
            }
            return tick;
        }

        let mode = job.mode();
        if self.role == NodeRole::Coordinator && !mode.worker_only {
            metrics::record_job_run(&name, "coordinator");
            if !self.run_phase(job, JobPhase::Prepare, &mut tick).await {
                return tick;
            }
            if !self.run_phase(job, JobPhase::Finish, &mut tick).await {
                return tick;
            }
        }

        let plays_worker = match self.role {
            NodeRole::Worker => !mode.coordinator_only,
            NodeRole::Coordinator => mode.runs_coordinator_side_worker_tasks,
        };
        if plays_worker {
            metrics::record_job_run(&name, "worker");
            self.run_worker(job, &mut tick).await;
        }
        tick
    }

    async fn run_phase(&self, job: &dyn DynJob, phase: JobPhase, tick: &mut JobTick) -> bool {
        let started = Instant::now();
        let result = match phase {
            JobPhase::Nondistributed => job.nondistributed_tasks().await,
            JobPhase::Prepare => job.prepare_tasks().await,
            JobPhase::Finish => job.finish_tasks().await,
            _ => Ok(()),
        };
        metrics::record_phase_duration(job.name(), phase, started.elapsed().as_secs_f64());
        self.settle(job.name(), phase, result, tick).is_some()
    }

    /// get -> do -> put, once.
    async fn run_worker(&self, job: &dyn DynJob, tick: &mut JobTick) {
        let name = job.name();

        let task = self.channel.get_tasks(name).await.map_err(JobError::from);
        let Some(task) = self.settle(name, JobPhase::GetTasks, task, tick) else {
            return;
        };
        let Some(task) = task else {
            JobLogger::new(name, JobPhase::GetTasks).log_idle("no work item");
            tick.worker = Some(WorkerStep::Idle);
            return;
        };

        let started = Instant::now();
        let outcome = job.do_tasks(task).await;
        metrics::record_phase_duration(name, JobPhase::DoTasks, started.elapsed().as_secs_f64());
        let Some(outcome) = self.settle(name, JobPhase::DoTasks, outcome, tick) else {
            return;
        };
        let Some(outcome) = outcome else {
            JobLogger::new(name, JobPhase::DoTasks).log_idle("work item produced no result");
            tick.worker = Some(WorkerStep::NoResult);
            return;
        };

        let reply = match self.channel.put_tasks(name, outcome).await {
            Ok(reply) => decode_ack(reply),
            Err(e) => Err(JobError::from(e)),
        };
        let Some(ack) = self.settle(name, JobPhase::PutTasks, reply, tick) else {
            return;
        };
        if !ack.accepted {
            JobLogger::new(name, JobPhase::PutTasks).log_warning(&format!(
                "coordinator rejected result: {}",
                ack.message.as_deref().unwrap_or("no reason given")
            ));
        }
        tick.worker = Some(WorkerStep::Reported { accepted: ack.accepted });
    }

    /// Record a phase result. Errors are logged and counted, never propagated.
    fn settle<T>(&self, job: &str, phase: JobPhase, result: JobResult<T>, tick: &mut JobTick) -> Option<T> {
        match result {
            Ok(value) => {
                tick.completed.push(phase);
                Some(value)
            }
            Err(e) => {
                let transient = e.is_transient();
                let logger = JobLogger::new(job, phase);
                if transient {
                    logger.log_warning(&format!("{} (will retry next tick)", e));
                } else {
                    logger.log_error(&e.to_string());
                }
                metrics::record_phase_failure(job, phase, transient);
                tick.failure = Some((phase, transient));
                None
            }
        }
    }
}

/// An empty reply counts as accepted; a reply that is not an [`Ack`] is a
/// failed report.
fn decode_ack(reply: Option<serde_json::Value>) -> JobResult<Ack> {
    match reply {
        None => Ok(Ack::accepted()),
        Some(value) => serde_json::from_value::<Ack>(value)
            .map_err(|e| JobError::Malformed(format!("unreadable acknowledgement: {}", e))),
    }
}

/// Runs [`TickDriver::tick`] on a fixed interval until shut down.
pub struct Scheduler {
    driver: Arc<TickDriver>,
    interval: Duration,
    shutdown: watch::Sender<bool>,
}

impl Scheduler {
    pub fn new(driver: Arc<TickDriver>, interval: Duration) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            driver,
            interval,
            shutdown,
        }
    }

    /// Tick until [`Scheduler::shutdown`] is called. The first tick runs immediately.
    pub async fn run(&self) {
        info!(
            interval_secs = self.interval.as_secs(),
            jobs = ?self.driver.registry().names(),
            "Starting scheduler"
        );

        let mut shutdown_rx = self.shutdown.subscribe();
        if *shutdown_rx.borrow_and_update() {
            info!("Scheduler shut down before the first tick");
            return;
        }
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Scheduler shutting down");
                        break;
                    }
                }
                _ = interval.tick() => {
                    let ticks = self.driver.tick().await;
                    let failed = ticks.iter().filter(|t| t.failure.is_some()).count();
                    tracing::debug!(jobs = ticks.len(), failed, "Tick finished");
                }
            }
        }
    }

    /// Signal shutdown. A tick in progress finishes first. Takes effect even
    /// when [`Scheduler::run`] has not started yet.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_channel::LocalChannel;
    use crate::testing::RecordingJob;
    use async_trait::async_trait;
    use fleetcron_models::JobMode;
    use fleetcron_rpc::RpcResult;
    use serde_json::{json, Value};

    /// Hands out one task and answers every report with `reply`.
    struct FixedReplyChannel {
        reply: Option<Value>,
    }

    #[async_trait]
    impl TaskChannel for FixedReplyChannel {
        async fn get_tasks(&self, _job: &str) -> RpcResult<Option<Value>> {
            Ok(Some(json!({"item": 1})))
        }

        async fn put_tasks(&self, _job: &str, _result: Value) -> RpcResult<Option<Value>> {
            Ok(self.reply.clone())
        }
    }

    fn driver_replying(job: Arc<RecordingJob>, reply: Option<Value>) -> TickDriver {
        TickDriver::new(
            Arc::new(single(job)),
            Arc::new(FixedReplyChannel { reply }),
            MachineId::from("node"),
            NodeRole::Worker,
            false,
        )
    }

    fn driver(registry: JobRegistry, role: NodeRole, single_node: bool) -> TickDriver {
        let registry = Arc::new(registry);
        let machine = MachineId::from("node");
        let channel = Arc::new(LocalChannel::new(registry.clone(), machine.clone()));
        TickDriver::new(registry, channel, machine, role, single_node)
    }

    fn single(job: Arc<RecordingJob>) -> JobRegistry {
        let mut registry = JobRegistry::new();
        registry.register(job);
        registry
    }

    #[tokio::test]
    async fn test_prerequisites_gate_everything() {
        let job = Arc::new(RecordingJob::new("a").not_ready());
        let ticks = driver(single(job.clone()), NodeRole::Coordinator, false).tick().await;
        assert!(!ticks[0].ready);
        assert_eq!(job.calls(), vec![JobPhase::CheckPrerequisites]);
    }

    #[tokio::test]
    async fn test_single_node_runs_nondistributed_on_coordinator_only() {
        let job = Arc::new(RecordingJob::new("a").with_task(json!(1)));
        driver(single(job.clone()), NodeRole::Coordinator, true).tick().await;
        assert_eq!(job.calls(), vec![JobPhase::CheckPrerequisites, JobPhase::Nondistributed]);

        let job = Arc::new(RecordingJob::new("a"));
        driver(single(job.clone()), NodeRole::Worker, true).tick().await;
        assert_eq!(job.calls(), vec![JobPhase::CheckPrerequisites]);
    }

    #[tokio::test]
    async fn test_coordinator_runs_prepare_then_finish() {
        let job = Arc::new(RecordingJob::new("a").with_task(json!(1)));
        let ticks = driver(single(job.clone()), NodeRole::Coordinator, false).tick().await;
        assert_eq!(
            job.calls(),
            vec![JobPhase::CheckPrerequisites, JobPhase::Prepare, JobPhase::Finish]
        );
        assert_eq!(ticks[0].worker, None);
    }

    #[tokio::test]
    async fn test_coordinator_side_worker_runs_full_cycle() {
        let job = Arc::new(
            RecordingJob::new("a")
                .with_mode(JobMode::default().with_coordinator_worker(true))
                .with_task(json!({"item": 3})),
        );
        let ticks = driver(single(job.clone()), NodeRole::Coordinator, false).tick().await;
        assert_eq!(
            job.calls(),
            vec![
                JobPhase::CheckPrerequisites,
                JobPhase::Prepare,
                JobPhase::Finish,
                JobPhase::GetTasks,
                JobPhase::DoTasks,
                JobPhase::PutTasks,
            ]
        );
        assert_eq!(ticks[0].worker, Some(WorkerStep::Reported { accepted: true }));
        assert_eq!(job.reported(), vec![json!({"item": 3})]);
    }

    #[tokio::test]
    async fn test_worker_skips_coordinator_only_jobs() {
        let job = Arc::new(RecordingJob::new("a").with_mode(JobMode::coordinator_only()));
        driver(single(job.clone()), NodeRole::Worker, false).tick().await;
        assert_eq!(job.calls(), vec![JobPhase::CheckPrerequisites]);
    }

    #[tokio::test]
    async fn test_worker_only_job_skips_coordinator_phases() {
        let job = Arc::new(
            RecordingJob::new("a").with_mode(JobMode::worker_only().with_coordinator_worker(true)),
        );
        let ticks = driver(single(job.clone()), NodeRole::Coordinator, false).tick().await;
        assert_eq!(job.calls(), vec![JobPhase::CheckPrerequisites, JobPhase::GetTasks]);
        assert_eq!(ticks[0].worker, Some(WorkerStep::Idle));
    }

    #[tokio::test]
    async fn test_idle_and_no_result_are_not_failures() {
        let job = Arc::new(RecordingJob::new("a"));
        let ticks = driver(single(job), NodeRole::Worker, false).tick().await;
        assert_eq!(ticks[0].worker, Some(WorkerStep::Idle));
        assert_eq!(ticks[0].failure, None);

        let job = Arc::new(RecordingJob::new("a").with_task(json!(1)).yielding_nothing());
        let ticks = driver(single(job.clone()), NodeRole::Worker, false).tick().await;
        assert_eq!(ticks[0].worker, Some(WorkerStep::NoResult));
        assert!(!job.calls().contains(&JobPhase::PutTasks));
    }

    #[tokio::test]
    async fn test_failure_stays_inside_its_job() {
        let broken = Arc::new(RecordingJob::new("broken").failing_in(JobPhase::Prepare, false));
        let flaky = Arc::new(RecordingJob::new("flaky").failing_in(JobPhase::Finish, true));
        let healthy = Arc::new(RecordingJob::new("healthy"));
        let mut registry = JobRegistry::new();
        registry.register(broken.clone());
        registry.register(flaky);
        registry.register(healthy.clone());

        let ticks = driver(registry, NodeRole::Coordinator, false).tick().await;
        assert_eq!(ticks[0].failure, Some((JobPhase::Prepare, false)));
        assert!(!broken.calls().contains(&JobPhase::Finish));
        assert_eq!(ticks[1].failure, Some((JobPhase::Finish, true)));
        assert_eq!(ticks[2].failure, None);
        assert_eq!(ticks[2].completed, vec![JobPhase::Prepare, JobPhase::Finish]);
        assert!(healthy.calls().contains(&JobPhase::Finish));
    }

    #[tokio::test]
    async fn test_scheduler_stops_on_shutdown() {
        let job = Arc::new(RecordingJob::new("a"));
        let driver = Arc::new(driver(single(job.clone()), NodeRole::Coordinator, false));
        let scheduler = Arc::new(Scheduler::new(driver, Duration::from_millis(10)));

        let runner = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.run().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.shutdown();
        tokio::time::timeout(Duration::from_secs(2), runner).await.unwrap().unwrap();
        assert!(job.calls().contains(&JobPhase::Prepare));
    }

    #[tokio::test]
    async fn test_unreadable_ack_is_a_put_tasks_failure() {
        let job = Arc::new(RecordingJob::new("a"));
        let ticks = driver_replying(job, Some(json!("ok"))).tick().await;
        assert_eq!(ticks[0].failure, Some((JobPhase::PutTasks, false)));
        assert_eq!(ticks[0].worker, None);
        assert!(!ticks[0].completed.contains(&JobPhase::PutTasks));
    }

    #[tokio::test]
    async fn test_empty_and_rejecting_acks() {
        let ticks = driver_replying(Arc::new(RecordingJob::new("a")), None).tick().await;
        assert_eq!(ticks[0].worker, Some(WorkerStep::Reported { accepted: true }));

        let rejected = json!({"accepted": false, "message": "stale"});
        let ticks = driver_replying(Arc::new(RecordingJob::new("a")), Some(rejected)).tick().await;
        assert_eq!(ticks[0].worker, Some(WorkerStep::Reported { accepted: false }));
        assert_eq!(ticks[0].failure, None);
    }

    #[tokio::test]
    async fn test_shutdown_before_run_returns_promptly() {
        let job = Arc::new(RecordingJob::new("a"));
        let driver = Arc::new(driver(single(job.clone()), NodeRole::Coordinator, false));
        let scheduler = Scheduler::new(driver, Duration::from_secs(60));

        scheduler.shutdown();
        tokio::time::timeout(Duration::from_secs(2), scheduler.run()).await.unwrap();
        assert!(job.calls().is_empty());
    }
}
