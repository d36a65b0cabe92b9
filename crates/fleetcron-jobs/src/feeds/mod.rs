//! Feed ingestion and index maintenance.
//!
//! Sources are spread over the roster with the partition function. Each
//! worker fetches its own shard, inserts unseen items into the feed store and
//! merges them into one index shard per source. The coordinator prunes
//! expired rows once per run.

mod fetch;
mod maintain;
mod parse;
mod sources;

pub use fetch::{FeedFetcher, FetchedFeed, HttpFetcher};
pub use maintain::{IndexMaintainer, MergeStats};
pub use parse::{clean_text, json_to_markup, parse_date, parse_feed};
pub use sources::{load_sources, parse_sources};

use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;

use fleetcron_models::partition::shard_for;
use fleetcron_models::{partition_index, Ack, FeedReport, FeedShard, FeedSource, JobPhase, MachineId};
use fleetcron_storage::FeedStore;

use crate::config::FeedConfig;
use crate::error::JobResult;
use crate::job::{Job, JobContext};
use crate::logging::JobLogger;
use crate::metrics;

pub const JOB_NAME: &str = "feeds";

pub struct FeedJob {
    ctx: JobContext,
    config: FeedConfig,
    sources: Vec<FeedSource>,
    fetcher: Arc<dyn FeedFetcher>,
    store: Arc<dyn FeedStore>,
    index: IndexMaintainer,
    last_run: Mutex<Option<Instant>>,
}

impl FeedJob {
    pub fn new(
        ctx: JobContext,
        config: FeedConfig,
        sources: Vec<FeedSource>,
        fetcher: Arc<dyn FeedFetcher>,
        store: Arc<dyn FeedStore>,
        index: IndexMaintainer,
    ) -> Self {
        let sources = sources.iter().map(FeedSource::normalized).collect();
        Self {
            ctx,
            config,
            sources,
            fetcher,
            store,
            index,
            last_run: Mutex::new(None),
        }
    }

    pub fn sources(&self) -> &[FeedSource] {
        &self.sources
    }

    fn mark_run(&self) {
        if let Ok(mut last) = self.last_run.lock() {
            *last = Some(Instant::now());
        }
    }

    /// Fetch, parse, store and index `sources`.
    async fn ingest(&self, sources: &[FeedSource]) -> JobResult<FeedReport> {
        let logger = JobLogger::new(JOB_NAME, JobPhase::DoTasks);
        let mut report = FeedReport {
            sources: sources.iter().map(|s| s.name.clone()).collect(),
            ..Default::default()
        };
        if sources.is_empty() {
            return Ok(report);
        }

        let now = Utc::now();
        let cutoff = self.index.cutoff(now);
        for fetched in self.fetcher.fetch_all(sources).await {
            let Some(source) = sources.iter().find(|s| s.name == fetched.source) else {
                continue;
            };
            let items = match fetched.body.and_then(|body| parse_feed(source, &body, now)) {
                Ok(items) => items,
                Err(e) => {
                    logger.log_warning(&format!("source {}: {}", source.name, e));
                    metrics::record_feed_source_failure(&source.name);
                    report.failed_sources.push(source.name.clone());
                    continue;
                }
            };

            let items: Vec<_> = items.into_iter().filter(|item| item.pub_date >= cutoff).collect();
            let (mut inserted, mut skipped) = (0, 0);
            for item in &items {
                if self.store.insert_if_absent(item).await? {
                    inserted += 1;
                } else {
                    skipped += 1;
                }
            }
            let merged = self.index.merge(&source.name, &items, now).await?;

            metrics::record_feed_items(&source.name, inserted, skipped);
            logger.log_progress(&format!(
                "source {}: {} new, {} known, {} indexed, {} pruned",
                source.name, inserted, skipped, merged.added, merged.pruned
            ));
            report.inserted += inserted;
            report.skipped += skipped;
        }
        Ok(report)
    }

    /// Drop rows past the expiry age.
    async fn expire(&self) -> JobResult<usize> {
        let cutoff = self.index.cutoff(Utc::now());
        Ok(self.store.delete_older_than(cutoff).await?)
    }
}

#[async_trait]
impl Job for FeedJob {
    type Task = FeedShard;
    type Outcome = FeedReport;

    fn name(&self) -> &str {
        JOB_NAME
    }

    async fn check_prerequisites(&self) -> bool {
        if self.sources.is_empty() {
            return false;
        }
        match self.last_run.lock() {
            Ok(last) => last.map_or(true, |at| at.elapsed() >= self.config.update_interval),
            Err(_) => true,
        }
    }

    async fn nondistributed_tasks(&self) -> JobResult<()> {
        let report = self.ingest(&self.sources).await?;
        let expired = self.expire().await?;
        self.mark_run();
        JobLogger::new(JOB_NAME, JobPhase::Nondistributed).log_completion(&format!(
            "{} sources, {} new items, {} expired",
            report.sources.len(),
            report.inserted,
            expired
        ));
        Ok(())
    }

    async fn finish_tasks(&self) -> JobResult<()> {
        let expired = self.expire().await?;
        self.mark_run();
        if expired > 0 {
            JobLogger::new(JOB_NAME, JobPhase::Finish).log_progress(&format!("{} expired items removed", expired));
        }
        Ok(())
    }

    async fn get_tasks(&self, worker: &MachineId) -> JobResult<Option<FeedShard>> {
        let roster = &self.ctx.roster;
        let Some(position) = roster.position(worker) else {
            JobLogger::new(JOB_NAME, JobPhase::GetTasks).log_warning(&format!("{} is not in the roster", worker));
            return Ok(None);
        };
        let shard: Vec<FeedSource> = shard_for(&self.sources, |s| s.name.as_str(), position, roster.len())
            .into_iter()
            .cloned()
            .collect();
        if shard.is_empty() {
            return Ok(None);
        }
        Ok(Some(FeedShard {
            roster: roster.clone(),
            sources: shard,
        }))
    }

    async fn do_tasks(&self, task: FeedShard) -> JobResult<Option<FeedReport>> {
        let logger = JobLogger::new(JOB_NAME, JobPhase::DoTasks);
        let Some(position) = task.roster.position(&self.ctx.machine_id) else {
            logger.log_warning("handed a shard for a roster this node is not part of");
            return Ok(None);
        };

        let (owned, foreign): (Vec<FeedSource>, Vec<FeedSource>) = task
            .sources
            .into_iter()
            .map(|s| s.normalized())
            .partition(|s| partition_index(&s.name, task.roster.len()) == Some(position));
        for source in &foreign {
            logger.log_warning(&format!("discarding {}: owned by another worker", source.name));
        }
        if owned.is_empty() {
            return Ok(None);
        }

        let report = self.ingest(&owned).await?;
        self.mark_run();
        Ok(Some(report))
    }

    async fn put_tasks(&self, worker: &MachineId, outcome: FeedReport) -> JobResult<Ack> {
        JobLogger::new(JOB_NAME, JobPhase::PutTasks).log_completion(&format!(
            "{} ingested {} sources: {} new, {} known, {} failed",
            worker,
            outcome.sources.len(),
            outcome.inserted,
            outcome.skipped,
            outcome.failed_sources.len()
        ));
        Ok(Ack::accepted())
    }
}
