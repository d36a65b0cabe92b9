//! Index shard maintenance for ingested items.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use fleetcron_models::FeedItem;
use fleetcron_storage::IndexEngine;

use crate::error::JobResult;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub added: usize,
    pub pruned: usize,
}

impl MergeStats {
    pub fn changed(&self) -> bool {
        self.added > 0 || self.pruned > 0
    }
}

/// Rebuilds a shard off to the side and swaps it in.
#[derive(Clone)]
pub struct IndexMaintainer {
    engine: Arc<dyn IndexEngine>,
    expiry: Duration,
}

impl IndexMaintainer {
    pub fn new(engine: Arc<dyn IndexEngine>, expiry: Duration) -> Self {
        Self { engine, expiry }
    }

    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.expiry
    }

    /// Merge `items` into `shard` and drop expired documents. The live shard
    /// is only replaced when something changed.
    pub async fn merge(&self, shard: &str, items: &[FeedItem], now: DateTime<Utc>) -> JobResult<MergeStats> {
        let mut live = self.engine.load(shard).await?;
        let stats = MergeStats {
            added: live.add_documents(items),
            pruned: live.prune_older_than(self.cutoff(now)),
        };
        if stats.changed() {
            let blob = self.engine.save(&live)?;
            self.engine.atomic_swap(blob, shard).await?;
        }
        debug!(shard, added = stats.added, pruned = stats.pruned, documents = live.len(), "Index shard merged");
        Ok(stats)
    }

    /// Prune without adding anything.
    pub async fn prune(&self, shard: &str, now: DateTime<Utc>) -> JobResult<usize> {
        Ok(self.merge(shard, &[], now).await?.pruned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetcron_models::guid_hash;
    use fleetcron_storage::FileIndexEngine;

    fn item(guid: &str, age_days: i64) -> FeedItem {
        FeedItem {
            guid_hash: guid_hash(guid),
            title: format!("story {}", guid),
            link: guid.to_string(),
            description: String::new(),
            image_link: None,
            pub_date: Utc::now() - Duration::days(age_days),
            source_name: "news".to_string(),
        }
    }

    #[tokio::test]
    async fn test_merge_then_noop() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(FileIndexEngine::new(dir.path()));
        let maintainer = IndexMaintainer::new(engine.clone(), Duration::days(30));
        let now = Utc::now();

        let stats = maintainer
            .merge("news", &[item("a", 1), item("b", 45)], now)
            .await
            .unwrap();
        assert_eq!(stats, MergeStats { added: 2, pruned: 1 });
        assert_eq!(engine.load("news").await.unwrap().len(), 1);

        let modified = std::fs::metadata(engine.live_path("news")).unwrap().modified().unwrap();
        let stats = maintainer.merge("news", &[item("a", 1)], now).await.unwrap();
        assert!(!stats.changed());
        let after = std::fs::metadata(engine.live_path("news")).unwrap().modified().unwrap();
        assert_eq!(modified, after);
    }

    #[tokio::test]
    async fn test_prune_missing_shard_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(FileIndexEngine::new(dir.path()));
        let maintainer = IndexMaintainer::new(engine.clone(), Duration::days(30));
        assert_eq!(maintainer.prune("absent", Utc::now()).await.unwrap(), 0);
        assert!(!engine.live_path("absent").exists());
    }
}
