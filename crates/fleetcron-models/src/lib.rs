//! Shared data models for the fleetcron scheduler.
//!
//! This crate provides Serde-serializable types for:
//! - Machine identity, the worker roster and the partition function
//! - Versioned RPC envelopes exchanged between workers and the coordinator
//! - Lease marker records
//! - Mail, feed and media job payloads

pub mod codec;
pub mod encoding;
pub mod envelope;
pub mod error;
pub mod feed;
pub mod job;
pub mod lease;
pub mod machine;
pub mod mail;
pub mod media;
pub mod partition;

// Re-export common types
pub use encoding::EncodingConfig;
pub use envelope::{envelope_schema, RpcCommand, RpcEnvelope, RpcResponse, ENVELOPE_VERSION};
pub use error::{ModelError, ModelResult};
pub use feed::{guid_hash, FeedItem, FeedKind, FeedReport, FeedShard, FeedSource};
pub use job::{Ack, JobMode, JobPhase, NodeRole};
pub use lease::LeaseRecord;
pub use machine::{MachineId, Roster};
pub use mail::{MailBatch, MailMessage, MailReport};
pub use media::{ConvertedSegment, SegmentManifest, SegmentName, SegmentTask, VideoStage};
pub use partition::{partition_index, stable_hash};
