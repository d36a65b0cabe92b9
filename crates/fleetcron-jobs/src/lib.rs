//! Fleet jobs and the machinery that drives them.
//!
//! This crate provides:
//! - The [`Job`] lifecycle contract and the [`JobRegistry`]
//! - The tick driver and its interval scheduler
//! - The mail, feed ingestion and media transcoding jobs
//! - Node assembly from environment configuration

pub mod config;
pub mod driver;
pub mod error;
pub mod feeds;
pub mod job;
pub mod local_channel;
pub mod logging;
pub mod mail;
pub mod media;
pub mod metrics;
pub mod node;
pub mod registry;

#[cfg(test)]
mod testing;

pub use config::{FeedConfig, FleetConfig, MailConfig, MediaConfig, NodeConfig, StagingBackend};
pub use driver::{JobTick, Scheduler, TickDriver, WorkerStep};
pub use error::{JobError, JobResult};
pub use feeds::FeedJob;
pub use job::{DynJob, ErasedJob, Job, JobContext};
pub use local_channel::LocalChannel;
pub use logging::JobLogger;
pub use mail::{MailJob, MailQueue};
pub use media::MediaJob;
pub use node::Node;
pub use registry::JobRegistry;
