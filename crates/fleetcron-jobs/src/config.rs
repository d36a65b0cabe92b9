//! Node and job configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use fleetcron_models::{MachineId, NodeRole, Roster};

use crate::error::{JobError, JobResult};

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

fn env_list(key: &str) -> Vec<String> {
    std::env::var(key)
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Where the staging area lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StagingBackend {
    /// Directory shared by all nodes
    Local(PathBuf),
    /// R2 bucket configured through `R2_*` variables
    R2,
}

/// Node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Role of this node
    pub role: NodeRole,
    /// Address other nodes know this node by; the machine identity derives from it
    pub advertised_url: String,
    /// Coordinator base URL (workers only)
    pub coordinator_url: Option<String>,
    /// Advertised URLs of every worker, in roster order; empty means single-node mode
    pub workers: Vec<String>,
    /// Shared secret for RPC session digests
    pub secret: String,
    /// Staging area backend
    pub staging: StagingBackend,
    /// Time between scheduler ticks
    pub tick_interval: Duration,
    /// Jobs to run; `None` runs every registered job
    pub enabled_jobs: Option<Vec<String>>,
    /// Accepted distance between request time and coordinator clock
    pub rpc_max_skew_secs: i64,
    /// Transport timeout for worker RPC calls
    pub rpc_timeout: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            role: NodeRole::Coordinator,
            advertised_url: "http://127.0.0.1:8000".to_string(),
            coordinator_url: None,
            workers: Vec::new(),
            secret: String::new(),
            staging: StagingBackend::Local(PathBuf::from("/tmp/fleetcron/staging")),
            tick_interval: Duration::from_secs(60),
            enabled_jobs: None,
            rpc_max_skew_secs: 300,
            rpc_timeout: Duration::from_secs(120),
        }
    }
}

impl NodeConfig {
    /// Create config from environment variables.
    pub fn from_env() -> JobResult<Self> {
        let defaults = Self::default();

        let role = match std::env::var("NODE_ROLE") {
            Ok(value) => NodeRole::parse(&value)
                .ok_or_else(|| JobError::config_error(format!("Unknown NODE_ROLE: {}", value)))?,
            Err(_) => defaults.role,
        };

        let staging = match std::env::var("STAGING_BACKEND").map(|v| v.to_lowercase()) {
            Ok(backend) if backend == "r2" => StagingBackend::R2,
            Ok(backend) if backend != "local" => {
                return Err(JobError::config_error(format!("Unknown STAGING_BACKEND: {}", backend)));
            }
            _ => std::env::var("STAGING_DIR")
                .map(|dir| StagingBackend::Local(PathBuf::from(dir)))
                .unwrap_or(defaults.staging),
        };

        let enabled = env_list("ENABLED_JOBS");

        Ok(Self {
            role,
            advertised_url: std::env::var("NODE_ADVERTISED_URL").unwrap_or(defaults.advertised_url),
            coordinator_url: std::env::var("COORDINATOR_URL").ok().filter(|s| !s.trim().is_empty()),
            workers: env_list("FLEET_WORKERS"),
            secret: std::env::var("FLEET_SECRET").unwrap_or_default(),
            staging,
            tick_interval: Duration::from_secs(env_parse("TICK_INTERVAL_SECS", 60)),
            enabled_jobs: if enabled.is_empty() { None } else { Some(enabled) },
            rpc_max_skew_secs: env_parse("RPC_MAX_SKEW_SECS", defaults.rpc_max_skew_secs),
            rpc_timeout: Duration::from_secs(env_parse("RPC_TIMEOUT_SECS", 120)),
        })
    }

    /// Identity of this node.
    pub fn machine_id(&self) -> MachineId {
        MachineId::from_address(&self.advertised_url)
    }

    /// Ordered worker roster.
    pub fn roster(&self) -> Roster {
        Roster::from_addresses(&self.workers)
    }

    /// No workers configured: the coordinator runs every job on its own.
    pub fn single_node(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn is_enabled(&self, job: &str) -> bool {
        self.enabled_jobs
            .as_ref()
            .map(|jobs| jobs.iter().any(|j| j == job))
            .unwrap_or(true)
    }

    /// Reject combinations that cannot work.
    pub fn validate(&self) -> JobResult<()> {
        if self.tick_interval.is_zero() {
            return Err(JobError::config_error("TICK_INTERVAL_SECS must be positive"));
        }
        if self.single_node() {
            return Ok(());
        }
        if self.secret.trim().is_empty() {
            return Err(JobError::config_error("FLEET_SECRET is required when FLEET_WORKERS is set"));
        }
        if self.role == NodeRole::Worker && self.coordinator_url.is_none() {
            return Err(JobError::config_error("COORDINATOR_URL is required on worker nodes"));
        }
        Ok(())
    }
}

/// Mail job configuration.
#[derive(Debug, Clone)]
pub struct MailConfig {
    /// HTTP relay that performs the actual delivery
    pub relay_url: Option<String>,
    /// Sender address
    pub from: String,
    /// Staleness limit for batch leases
    pub timestamp_limit: Duration,
    /// Messages per queued batch
    pub batch_size: usize,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            relay_url: None,
            from: "noreply@localhost".to_string(),
            timestamp_limit: Duration::from_secs(300),
            batch_size: 50,
        }
    }
}

impl MailConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            relay_url: std::env::var("MAIL_RELAY_URL").ok().filter(|s| !s.trim().is_empty()),
            from: std::env::var("MAIL_FROM").unwrap_or(defaults.from),
            timestamp_limit: Duration::from_secs(env_parse("MAIL_TIMESTAMP_LIMIT_SECS", 300)),
            batch_size: env_parse("MAIL_BATCH_SIZE", defaults.batch_size).max(1),
        }
    }
}

/// Feed ingestion configuration.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// JSON file listing feed sources
    pub sources_path: Option<PathBuf>,
    /// Minimum time between ingestion runs on a node
    pub update_interval: Duration,
    /// Items older than this are pruned from the store and the index
    pub expiry: Duration,
    /// SQLite database; in-memory when unset
    pub db_path: Option<PathBuf>,
    /// Directory holding index shards
    pub index_dir: PathBuf,
    /// Per-request fetch timeout
    pub fetch_timeout: Duration,
    /// Sources fetched concurrently
    pub fetch_concurrency: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            sources_path: None,
            update_interval: Duration::from_secs(3600),
            expiry: Duration::from_secs(30 * 24 * 3600),
            db_path: None,
            index_dir: PathBuf::from("/tmp/fleetcron/index"),
            fetch_timeout: Duration::from_secs(20),
            fetch_concurrency: 8,
        }
    }
}

impl FeedConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            sources_path: std::env::var("FEED_SOURCES_PATH").ok().map(PathBuf::from),
            update_interval: Duration::from_secs(env_parse("FEED_UPDATE_INTERVAL_SECS", 3600)),
            expiry: Duration::from_secs(env_parse("FEED_EXPIRY_SECS", 30 * 24 * 3600)),
            db_path: std::env::var("FEED_DB_PATH").ok().map(PathBuf::from),
            index_dir: std::env::var("FEED_INDEX_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.index_dir),
            fetch_timeout: Duration::from_secs(env_parse("FEED_FETCH_TIMEOUT_SECS", 20)),
            fetch_concurrency: env_parse("FEED_FETCH_CONCURRENCY", defaults.fetch_concurrency).max(1),
        }
    }
}

/// Media transcoding configuration.
#[derive(Debug, Clone)]
pub struct MediaConfig {
    /// Nominal segment length
    pub segment_seconds: u32,
    /// Staleness limit for segment leases
    pub file_timestamp_limit: Duration,
    /// Upload extensions picked up for conversion (lowercase, no dot)
    pub convertible_extensions: Vec<String>,
    /// The coordinator also converts segments
    pub coordinator_runs_worker_tasks: bool,
    /// Kill a single ffmpeg invocation after this long
    pub tool_timeout: Duration,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            segment_seconds: 150,
            file_timestamp_limit: Duration::from_secs(1800),
            convertible_extensions: vec!["mov".to_string(), "avi".to_string()],
            coordinator_runs_worker_tasks: false,
            tool_timeout: Duration::from_secs(1800),
        }
    }
}

impl MediaConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let extensions: Vec<String> = env_list("MEDIA_CONVERTIBLE_EXTENSIONS")
            .into_iter()
            .map(|e| e.trim_start_matches('.').to_lowercase())
            .collect();
        Self {
            segment_seconds: env_parse("MEDIA_SEGMENT_SECONDS", defaults.segment_seconds).max(1),
            file_timestamp_limit: Duration::from_secs(env_parse("MEDIA_FILE_TIMESTAMP_LIMIT_SECS", 1800)),
            convertible_extensions: if extensions.is_empty() {
                defaults.convertible_extensions
            } else {
                extensions
            },
            coordinator_runs_worker_tasks: env_bool("MEDIA_COORDINATOR_RUNS_WORKER_TASKS", false),
            tool_timeout: Duration::from_secs(env_parse("MEDIA_TOOL_TIMEOUT_SECS", 1800)),
        }
    }

    pub fn is_convertible(&self, ext: &str) -> bool {
        let ext = ext.to_lowercase();
        self.convertible_extensions.iter().any(|e| *e == ext)
    }
}

/// Everything a node needs to assemble its jobs.
#[derive(Debug, Clone, Default)]
pub struct FleetConfig {
    pub node: NodeConfig,
    pub mail: MailConfig,
    pub feeds: FeedConfig,
    pub media: MediaConfig,
}

impl FleetConfig {
    pub fn from_env() -> JobResult<Self> {
        Ok(Self {
            node: NodeConfig::from_env()?,
            mail: MailConfig::from_env(),
            feeds: FeedConfig::from_env(),
            media: MediaConfig::from_env(),
        })
    }
}
