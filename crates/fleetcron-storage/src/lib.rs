//! Shared state for the fleet scheduler.
//!
//! This crate provides:
//! - The work staging area (local disk or R2) with atomic create-if-absent
//! - Lease markers with per-job staleness limits
//! - The feed item store (in-memory or SQLite)
//! - Search index shards with atomic swap

pub mod error;
pub mod feed_store;
pub mod index;
pub mod lease;
pub mod local;
pub mod r2;
pub mod staging;

pub use error::{StorageError, StorageResult};
pub use feed_store::{FeedStore, InMemoryFeedStore, SqliteFeedStore};
pub use index::{FileIndexEngine, IndexDocument, IndexEngine, IndexShard};
pub use lease::{ClaimOutcome, LeaseManager};
pub use local::LocalStaging;
pub use r2::{R2Config, R2Staging};
pub use staging::{file_name, join_key, StagingStore};
