//! Search index shards.
//!
//! A shard is rebuilt off to the side and swapped in with a rename, so a
//! reader opening the live file always sees either the old or the new shard.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use fleetcron_models::partition::stable_hash;
use fleetcron_models::FeedItem;

use crate::error::{StorageError, StorageResult};

/// Shortest term kept in the postings.
const MIN_TERM_LEN: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDocument {
    pub guid_hash: String,
    pub title: String,
    pub link: String,
    pub source_name: String,
    pub pub_date: DateTime<Utc>,
}

/// One searchable shard: documents plus a term -> document postings map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexShard {
    pub name: String,
    pub documents: BTreeMap<String, IndexDocument>,
    pub postings: BTreeMap<String, BTreeSet<String>>,
}

impl IndexShard {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Merge items into the shard. Returns how many were new.
    pub fn add_documents(&mut self, items: &[FeedItem]) -> usize {
        let mut added = 0;
        for item in items {
            if self.documents.contains_key(&item.guid_hash) {
                continue;
            }
            for term in tokenize(&item.title).into_iter().chain(tokenize(&item.description)) {
                self.postings.entry(term).or_default().insert(item.guid_hash.clone());
            }
            self.documents.insert(
                item.guid_hash.clone(),
                IndexDocument {
                    guid_hash: item.guid_hash.clone(),
                    title: item.title.clone(),
                    link: item.link.clone(),
                    source_name: item.source_name.clone(),
                    pub_date: item.pub_date,
                },
            );
            added += 1;
        }
        added
    }

    /// Drop documents published before `cutoff`. Returns how many were removed.
    pub fn prune_older_than(&mut self, cutoff: DateTime<Utc>) -> usize {
        let expired: BTreeSet<String> = self
            .documents
            .values()
            .filter(|doc| doc.pub_date < cutoff)
            .map(|doc| doc.guid_hash.clone())
            .collect();
        if expired.is_empty() {
            return 0;
        }
        self.documents.retain(|guid, _| !expired.contains(guid));
        self.postings.retain(|_, docs| {
            docs.retain(|guid| !expired.contains(guid));
            !docs.is_empty()
        });
        expired.len()
    }

    /// Documents containing every term of `query`, newest first.
    pub fn search(&self, query: &str) -> Vec<&IndexDocument> {
        let terms = tokenize(query);
        let Some((first, rest)) = terms.split_first() else {
            return Vec::new();
        };
        let Some(mut hits) = self.postings.get(first).cloned() else {
            return Vec::new();
        };
        for term in rest {
            match self.postings.get(term) {
                Some(docs) => hits.retain(|guid| docs.contains(guid)),
                None => return Vec::new(),
            }
        }
        let mut docs: Vec<&IndexDocument> = hits.iter().filter_map(|guid| self.documents.get(guid)).collect();
        docs.sort_by(|a, b| b.pub_date.cmp(&a.pub_date));
        docs
    }
}

/// Lowercased alphanumeric terms.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= MIN_TERM_LEN)
        .map(str::to_lowercase)
        .collect()
}

/// Storage side of the index: load a live shard, serialize a rebuilt one and
/// swap it in.
#[async_trait]
pub trait IndexEngine: Send + Sync {
    /// The live shard, or an empty one when none exists yet.
    async fn load(&self, shard: &str) -> StorageResult<IndexShard>;

    fn save(&self, shard: &IndexShard) -> StorageResult<Vec<u8>>;

    /// Replace the live shard with `blob` in one step.
    async fn atomic_swap(&self, blob: Vec<u8>, shard: &str) -> StorageResult<()>;
}

/// Shards stored as JSON files in one directory.
#[derive(Debug, Clone)]
pub struct FileIndexEngine {
    dir: PathBuf,
}

impl FileIndexEngine {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the live shard file.
    pub fn live_path(&self, shard: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_shard_name(shard)))
    }
}

/// Filesystem-safe file stem. The hash of the raw name keeps names that
/// sanitize to the same text apart.
fn sanitize_shard_name(shard: &str) -> String {
    let cleaned: String = shard
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("{}-{:08x}", cleaned, stable_hash(shard) >> 32)
}

fn write_and_rename(dir: &Path, live: &Path, blob: &[u8]) -> StorageResult<()> {
    std::fs::create_dir_all(dir)?;
    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(blob)?;
    temp.as_file().sync_all()?;
    temp.persist(live).map_err(|e| StorageError::Index(e.to_string()))?;
    Ok(())
}

#[async_trait]
impl IndexEngine for FileIndexEngine {
    async fn load(&self, shard: &str) -> StorageResult<IndexShard> {
        match tokio::fs::read(self.live_path(shard)).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(IndexShard::new(shard)),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, shard: &IndexShard) -> StorageResult<Vec<u8>> {
        Ok(serde_json::to_vec(shard)?)
    }

    async fn atomic_swap(&self, blob: Vec<u8>, shard: &str) -> StorageResult<()> {
        let dir = self.dir.clone();
        let live = self.live_path(shard);
        let size = blob.len();
        tokio::task::spawn_blocking(move || write_and_rename(&dir, &live, &blob))
            .await
            .map_err(|e| StorageError::Index(e.to_string()))??;
        debug!(shard, bytes = size, "Index shard swapped");
        Ok(())
    }
}
