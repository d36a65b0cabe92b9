//! Producer side of the mail job.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use fleetcron_models::mail::encode_batch;
use fleetcron_models::MailMessage;
use fleetcron_storage::{join_key, StagingStore};

use crate::error::JobResult;
use crate::mail::MAIL_DIR;

/// Writes outgoing mail into the staging area as batch files.
#[derive(Clone)]
pub struct MailQueue {
    staging: Arc<dyn StagingStore>,
    batch_size: usize,
}

impl MailQueue {
    pub fn new(staging: Arc<dyn StagingStore>, batch_size: usize) -> Self {
        Self {
            staging,
            batch_size: batch_size.max(1),
        }
    }

    /// Queue messages in batches of at most `batch_size`. Returns the batch names.
    pub async fn enqueue(&self, messages: &[MailMessage]) -> JobResult<Vec<String>> {
        let mut batches = Vec::new();
        for chunk in messages.chunks(self.batch_size) {
            let batch = new_batch_name();
            let key = batch_key(&batch);
            self.staging.put(&key, &encode_batch(chunk)).await?;
            batches.push(batch);
        }
        if !batches.is_empty() {
            info!(batches = batches.len(), messages = messages.len(), "Mail queued");
        }
        Ok(batches)
    }
}

/// Sortable and unique: `<utc timestamp>-<uuid>`.
fn new_batch_name() -> String {
    format!("{}-{}", Utc::now().format("%Y%m%d%H%M%S"), Uuid::new_v4().simple())
}

pub(crate) fn batch_key(batch: &str) -> String {
    join_key(&[MAIL_DIR, &format!("{}.txt", batch)])
}
