//! Assembles a node from its configuration.

use std::sync::Arc;

use tracing::{info, warn};

use fleetcron_media::FfmpegTools;
use fleetcron_models::{EncodingConfig, NodeRole};
use fleetcron_rpc::{RemoteChannel, SessionSigner, TaskChannel};
use fleetcron_storage::{
    FeedStore, FileIndexEngine, InMemoryFeedStore, LocalStaging, R2Staging, SqliteFeedStore, StagingStore,
};

use crate::config::{FleetConfig, StagingBackend};
use crate::driver::{Scheduler, TickDriver};
use crate::error::{JobError, JobResult};
use crate::feeds::{self, FeedJob, HttpFetcher, IndexMaintainer};
use crate::job::JobContext;
use crate::local_channel::LocalChannel;
use crate::mail::{HttpMailRelay, MailJob, MailTransport};
use crate::media::MediaJob;
use crate::registry::JobRegistry;

/// A fully wired node: jobs, the channel workers pull through, and the driver.
pub struct Node {
    pub config: FleetConfig,
    pub context: JobContext,
    pub registry: Arc<JobRegistry>,
    pub driver: Arc<TickDriver>,
}

impl Node {
    pub async fn build(config: FleetConfig) -> JobResult<Self> {
        config.node.validate()?;

        let staging = open_staging(&config.node.staging)?;
        staging.check().await?;

        let context = JobContext::new(
            config.node.machine_id(),
            config.node.role,
            config.node.roster(),
            staging,
        );
        let registry = Arc::new(build_registry(&config, &context).await?);
        let channel = open_channel(&config, &context, registry.clone())?;

        let driver = Arc::new(TickDriver::new(
            registry.clone(),
            channel,
            context.machine_id.clone(),
            context.role,
            config.node.single_node(),
        ));

        info!(
            machine_id = %context.machine_id,
            role = %context.role,
            workers = context.roster.len(),
            staging = %context.staging.describe(),
            jobs = ?registry.names(),
            "Node assembled"
        );

        Ok(Self {
            config,
            context,
            registry,
            driver,
        })
    }

    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(self.driver.clone(), self.config.node.tick_interval)
    }

    /// Session signer shared by the RPC client and endpoint.
    pub fn signer(&self) -> SessionSigner {
        SessionSigner::new(&self.config.node.secret, self.config.node.rpc_max_skew_secs)
    }
}

pub fn open_staging(backend: &StagingBackend) -> JobResult<Arc<dyn StagingStore>> {
    Ok(match backend {
        StagingBackend::Local(root) => Arc::new(LocalStaging::new(root.clone())),
        StagingBackend::R2 => Arc::new(R2Staging::from_env()?),
    })
}

pub async fn open_feed_store(config: &FleetConfig) -> JobResult<Arc<dyn FeedStore>> {
    Ok(match &config.feeds.db_path {
        Some(path) => Arc::new(SqliteFeedStore::open(path).await?),
        None => Arc::new(InMemoryFeedStore::new()),
    })
}

/// Register every enabled job, in tick order.
pub async fn build_registry(config: &FleetConfig, context: &JobContext) -> JobResult<JobRegistry> {
    let mut registry = JobRegistry::new();
    let enabled = |name: &str| config.node.is_enabled(name);

    if enabled(crate::mail::JOB_NAME) {
        let transport = match &config.mail.relay_url {
            Some(url) => {
                let relay = HttpMailRelay::new(url, config.mail.from.clone(), config.node.rpc_timeout)?;
                Some(Arc::new(relay) as Arc<dyn MailTransport>)
            }
            None => None,
        };
        registry.register(Arc::new(MailJob::new(context.clone(), config.mail.clone(), transport)));
    }

    if enabled(feeds::JOB_NAME) {
        let sources = match &config.feeds.sources_path {
            Some(path) => feeds::load_sources(path).await?,
            None => {
                warn!("FEED_SOURCES_PATH is not set; the feed job has nothing to ingest");
                Vec::new()
            }
        };
        let fetcher = HttpFetcher::new(config.feeds.fetch_timeout, config.feeds.fetch_concurrency)?;
        let expiry = chrono::Duration::from_std(config.feeds.expiry)
            .map_err(|e| JobError::config_error(format!("FEED_EXPIRY_SECS: {}", e)))?;
        let index = IndexMaintainer::new(Arc::new(FileIndexEngine::new(config.feeds.index_dir.clone())), expiry);
        registry.register(Arc::new(FeedJob::new(
            context.clone(),
            config.feeds.clone(),
            sources,
            Arc::new(fetcher),
            open_feed_store(config).await?,
            index,
        )));
    }

    if enabled(crate::media::JOB_NAME) {
        let tools = FfmpegTools::new(EncodingConfig::default()).with_timeout(config.media.tool_timeout.as_secs());
        registry.register(Arc::new(MediaJob::new(context.clone(), config.media.clone(), Arc::new(tools))));
    }

    Ok(registry)
}

/// Workers call the coordinator over HTTP; the coordinator calls its own registry.
fn open_channel(
    config: &FleetConfig,
    context: &JobContext,
    registry: Arc<JobRegistry>,
) -> JobResult<Arc<dyn TaskChannel>> {
    match (&context.role, &config.node.coordinator_url) {
        (NodeRole::Worker, Some(url)) => {
            let signer = SessionSigner::new(&config.node.secret, config.node.rpc_max_skew_secs);
            let channel = RemoteChannel::new(url, context.machine_id.clone(), signer, config.node.rpc_timeout)?;
            info!(endpoint = %channel.endpoint(), "Worker channel ready");
            Ok(Arc::new(channel))
        }
        _ => Ok(Arc::new(LocalChannel::new(registry, context.machine_id.clone()))),
    }
}
