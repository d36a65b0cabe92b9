//! Outbound mail delivery.
//!
//! The web layer queues batch files under `mail/`. A worker is handed one
//! batch at a time, guarded by a `mail/taken-<batch>.txt` lease, and reports
//! how many messages went out. The coordinator then deletes the batch and
//! re-queues whatever the transport refused.

mod queue;
mod transport;

pub use queue::MailQueue;
pub use transport::{HttpMailRelay, MailTransport};

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};

use fleetcron_models::mail::decode_batch;
use fleetcron_models::{Ack, JobPhase, MachineId, MailBatch, MailReport, NodeRole};
use fleetcron_storage::{file_name, join_key, LeaseManager};

use crate::config::MailConfig;
use crate::error::{JobError, JobResult};
use crate::job::{Job, JobContext};
use crate::logging::JobLogger;
use crate::metrics;

use queue::batch_key;

pub const JOB_NAME: &str = "mail";
/// Staging prefix for queued batches.
pub const MAIL_DIR: &str = "mail";
const TAKEN_PREFIX: &str = "taken-";

fn marker_key(batch: &str) -> String {
    join_key(&[MAIL_DIR, &format!("{}{}.txt", TAKEN_PREFIX, batch)])
}

/// Batch names are file stems; nothing that could address another key.
fn validate_batch(batch: &str) -> JobResult<()> {
    if batch.is_empty() || batch.contains('/') || batch.contains("..") || batch.starts_with(TAKEN_PREFIX) {
        return Err(JobError::malformed(format!("invalid mail batch name: {:?}", batch)));
    }
    Ok(())
}

pub struct MailJob {
    ctx: JobContext,
    config: MailConfig,
    transport: Option<Arc<dyn MailTransport>>,
    queue: MailQueue,
}

impl MailJob {
    pub fn new(ctx: JobContext, config: MailConfig, transport: Option<Arc<dyn MailTransport>>) -> Self {
        let queue = MailQueue::new(ctx.staging.clone(), config.batch_size);
        Self {
            ctx,
            config,
            transport,
            queue,
        }
    }

    pub fn queue(&self) -> &MailQueue {
        &self.queue
    }

    fn lease_for(&self, holder: &MachineId) -> LeaseManager {
        LeaseManager::new(
            self.ctx.staging.clone(),
            holder.clone(),
            Duration::from_std(self.config.timestamp_limit).unwrap_or_else(|_| Duration::seconds(300)),
        )
    }

    /// Queued batch names, oldest first.
    async fn pending_batches(&self) -> JobResult<Vec<String>> {
        let keys = self.ctx.staging.list(&format!("{}/", MAIL_DIR)).await?;
        Ok(keys
            .iter()
            .map(|key| file_name(key))
            .filter(|name| !name.starts_with(TAKEN_PREFIX))
            .filter_map(|name| name.strip_suffix(".txt"))
            .map(str::to_string)
            .collect())
    }

    fn does_worker_work(&self) -> bool {
        self.ctx.single_node() || self.ctx.role == NodeRole::Worker
    }
}

#[async_trait]
impl Job for MailJob {
    type Task = MailBatch;
    type Outcome = MailReport;

    fn name(&self) -> &str {
        JOB_NAME
    }

    async fn check_prerequisites(&self) -> bool {
        !self.does_worker_work() || self.transport.is_some()
    }

    async fn nondistributed_tasks(&self) -> JobResult<()> {
        let logger = JobLogger::new(JOB_NAME, JobPhase::Nondistributed);
        let me = self.ctx.machine_id.clone();
        let mut delivered = 0;
        while let Some(batch) = self.get_tasks(&me).await? {
            let Some(report) = self.do_tasks(batch).await? else {
                continue;
            };
            delivered += report.sent;
            self.put_tasks(&me, report).await?;
        }
        if delivered > 0 {
            logger.log_completion(&format!("{} messages sent", delivered));
        }
        Ok(())
    }

    async fn get_tasks(&self, worker: &MachineId) -> JobResult<Option<MailBatch>> {
        let logger = JobLogger::new(JOB_NAME, JobPhase::GetTasks);
        let lease = self.lease_for(worker);

        for batch in self.pending_batches().await? {
            let marker = marker_key(&batch);
            let outcome = lease.claim(&marker).await?;
            metrics::record_lease_claim(JOB_NAME, outcome.as_str());
            if !outcome.is_acquired() {
                continue;
            }

            let Some(bytes) = self.ctx.staging.get(&batch_key(&batch)).await? else {
                // Completed by someone else between listing and claiming.
                lease.release(&marker).await?;
                continue;
            };
            let messages = decode_batch(&bytes);
            if messages.is_empty() {
                logger.log_warning(&format!("dropping empty or unreadable batch {}", batch));
                self.ctx.staging.delete(&batch_key(&batch)).await?;
                lease.release(&marker).await?;
                continue;
            }

            logger.log_progress(&format!("batch {} ({} messages) to {}", batch, messages.len(), worker));
            return Ok(Some(MailBatch { batch, messages }));
        }
        Ok(None)
    }

    async fn do_tasks(&self, task: MailBatch) -> JobResult<Option<MailReport>> {
        let transport = self
            .transport
            .as_ref()
            .ok_or_else(|| JobError::config_error("no mail transport configured"))?;
        let logger = JobLogger::new(JOB_NAME, JobPhase::DoTasks);

        let mut sent = 0;
        let mut failed = Vec::new();
        for message in task.messages {
            match transport.send_immediate(&message).await {
                Ok(()) => sent += 1,
                Err(e) => {
                    logger.log_warning(&format!("{}: {}", message.recipient, e));
                    failed.push(message);
                }
            }
        }

        if sent == 0 && !failed.is_empty() {
            // Nothing went out; let the lease expire and retry the whole batch.
            logger.log_warning(&format!("batch {} failed entirely", task.batch));
            return Ok(None);
        }
        Ok(Some(MailReport {
            batch: task.batch,
            sent,
            failed,
        }))
    }

    async fn put_tasks(&self, worker: &MachineId, outcome: MailReport) -> JobResult<Ack> {
        validate_batch(&outcome.batch)?;
        let marker = marker_key(&outcome.batch);
        let lease = self.lease_for(worker);

        if let Some(record) = lease.inspect(&marker).await? {
            if record.holder != *worker && record.is_live(Utc::now(), lease.limit()) {
                return Ok(Ack::rejected(format!("batch {} is leased to {}", outcome.batch, record.holder)));
            }
        }
        if !self.ctx.staging.exists(&batch_key(&outcome.batch)).await? {
            lease.release(&marker).await?;
            return Ok(Ack::rejected(format!("batch {} already completed", outcome.batch)));
        }

        if !outcome.failed.is_empty() {
            self.queue.enqueue(&outcome.failed).await?;
        }
        self.ctx.staging.delete(&batch_key(&outcome.batch)).await?;
        lease.release(&marker).await?;

        metrics::record_mail(outcome.sent, outcome.failed.len());
        JobLogger::new(JOB_NAME, JobPhase::PutTasks).log_completion(&format!(
            "batch {} from {}: {} sent, {} re-queued",
            outcome.batch,
            worker,
            outcome.sent,
            outcome.failed.len()
        ));
        Ok(Ack::accepted())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetcron_models::{MailMessage, Roster};
    use fleetcron_storage::{LocalStaging, StagingStore};
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Fails for recipients in `refuse`, records the rest.
    #[derive(Default)]
    struct FakeTransport {
        refuse: HashSet<String>,
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MailTransport for FakeTransport {
        async fn send_immediate(&self, message: &MailMessage) -> JobResult<()> {
            if self.refuse.contains(&message.recipient) {
                return Err(JobError::delivery_failed("refused"));
            }
            self.sent.lock().unwrap().push(message.recipient.clone());
            Ok(())
        }
    }

    fn setup(role: NodeRole, roster: Roster, transport: Option<Arc<FakeTransport>>) -> (tempfile::TempDir, MailJob) {
        let dir = tempfile::tempdir().unwrap();
        let staging: Arc<dyn StagingStore> = Arc::new(LocalStaging::new(dir.path()));
        let ctx = JobContext::new(MachineId::from("coord"), role, roster, staging);
        let transport = transport.map(|t| t as Arc<dyn MailTransport>);
        (dir, MailJob::new(ctx, MailConfig::default(), transport))
    }

    fn messages(recipients: &[&str]) -> Vec<MailMessage> {
        recipients.iter().map(|r| MailMessage::new("s", "b", *r)).collect()
    }

    fn fleet() -> Roster {
        Roster::new(vec![MachineId::from("w0"), MachineId::from("w1")])
    }

    #[tokio::test]
    async fn test_batch_goes_to_one_worker() {
        let (_dir, job) = setup(NodeRole::Coordinator, fleet(), None);
        job.queue().enqueue(&messages(&["a@x", "b@x"])).await.unwrap();

        let batch = job.get_tasks(&MachineId::from("w0")).await.unwrap().unwrap();
        assert_eq!(batch.messages.len(), 2);
        assert!(job.get_tasks(&MachineId::from("w1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_report_deletes_batch_and_requeues_failures() {
        let transport = Arc::new(FakeTransport {
            refuse: HashSet::from(["b@x".to_string()]),
            ..Default::default()
        });
        let (_dir, job) = setup(NodeRole::Coordinator, fleet(), Some(transport.clone()));
        job.queue().enqueue(&messages(&["a@x", "b@x"])).await.unwrap();
        let w0 = MachineId::from("w0");

        let batch = job.get_tasks(&w0).await.unwrap().unwrap();
        let name = batch.batch.clone();
        let report = job.do_tasks(batch).await.unwrap().unwrap();
        assert_eq!(report.sent, 1);
        assert_eq!(report.failed.len(), 1);

        assert!(job.put_tasks(&w0, report).await.unwrap().accepted);
        let pending = job.pending_batches().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_ne!(pending[0], name);
        assert!(!job.ctx.staging.exists(&marker_key(&name)).await.unwrap());

        let retry = job.get_tasks(&w0).await.unwrap().unwrap();
        assert_eq!(retry.messages, messages(&["b@x"]));
    }

    #[tokio::test]
    async fn test_total_failure_yields_no_result() {
        let transport = Arc::new(FakeTransport {
            refuse: HashSet::from(["a@x".to_string()]),
            ..Default::default()
        });
        let (_dir, job) = setup(NodeRole::Worker, fleet(), Some(transport));
        let batch = MailBatch {
            batch: "b1".to_string(),
            messages: messages(&["a@x"]),
        };
        assert!(job.do_tasks(batch).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_report_from_non_holder_is_rejected() {
        let (_dir, job) = setup(NodeRole::Coordinator, fleet(), None);
        job.queue().enqueue(&messages(&["a@x"])).await.unwrap();
        let batch = job.get_tasks(&MachineId::from("w0")).await.unwrap().unwrap();

        let report = MailReport {
            batch: batch.batch.clone(),
            sent: 1,
            failed: Vec::new(),
        };
        let ack = job.put_tasks(&MachineId::from("w1"), report).await.unwrap();
        assert!(!ack.accepted);
        assert!(job.ctx.staging.exists(&batch_key(&batch.batch)).await.unwrap());
    }

    #[tokio::test]
    async fn test_bad_batch_name_is_malformed() {
        let (_dir, job) = setup(NodeRole::Coordinator, fleet(), None);
        let report = MailReport {
            batch: "../secrets".to_string(),
            sent: 0,
            failed: Vec::new(),
        };
        assert!(job.put_tasks(&MachineId::from("w0"), report).await.unwrap_err().is_malformed());
    }

    #[tokio::test]
    async fn test_single_node_sends_everything() {
        let transport = Arc::new(FakeTransport::default());
        let (_dir, job) = setup(NodeRole::Coordinator, Roster::default(), Some(transport.clone()));
        job.queue().enqueue(&messages(&["a@x", "b@x", "c@x"])).await.unwrap();

        assert!(job.check_prerequisites().await);
        job.nondistributed_tasks().await.unwrap();
        assert_eq!(transport.sent.lock().unwrap().len(), 3);
        assert!(job.pending_batches().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_worker_without_transport_is_not_ready() {
        let (_dir, job) = setup(NodeRole::Worker, fleet(), None);
        assert!(!job.check_prerequisites().await);
        let (_dir, job) = setup(NodeRole::Coordinator, fleet(), None);
        assert!(job.check_prerequisites().await);
    }
}
