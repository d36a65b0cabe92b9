//! Relational store for ingested feed items.
//!
//! The GUID hash is the unique key, so concurrent ingesters serialize on the
//! store's own insert-if-absent rather than on a lease.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::params;
use tokio::sync::RwLock;
use tokio_rusqlite::Connection;

use fleetcron_models::FeedItem;

use crate::error::StorageResult;

#[async_trait]
pub trait FeedStore: Send + Sync {
    /// Insert unless an item with the same GUID hash exists. Returns whether
    /// a row was written.
    async fn insert_if_absent(&self, item: &FeedItem) -> StorageResult<bool>;

    /// Number of rows with this GUID hash (0 or 1).
    async fn count_where(&self, guid_hash: &str) -> StorageResult<usize>;

    /// Delete items published before `cutoff`. Returns the number removed.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> StorageResult<usize>;

    /// All items of one source, newest first.
    async fn items_for_source(&self, source_name: &str) -> StorageResult<Vec<FeedItem>>;

    async fn len(&self) -> StorageResult<usize>;
}

/// Process-local store, used in single-node deployments without a database
/// path and in tests.
#[derive(Debug, Default)]
pub struct InMemoryFeedStore {
    items: RwLock<HashMap<String, FeedItem>>,
}

impl InMemoryFeedStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FeedStore for InMemoryFeedStore {
    async fn insert_if_absent(&self, item: &FeedItem) -> StorageResult<bool> {
        let mut items = self.items.write().await;
        if items.contains_key(&item.guid_hash) {
            return Ok(false);
        }
        items.insert(item.guid_hash.clone(), item.clone());
        Ok(true)
    }

    async fn count_where(&self, guid_hash: &str) -> StorageResult<usize> {
        Ok(usize::from(self.items.read().await.contains_key(guid_hash)))
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> StorageResult<usize> {
        let mut items = self.items.write().await;
        let before = items.len();
        items.retain(|_, item| item.pub_date >= cutoff);
        Ok(before - items.len())
    }

    async fn items_for_source(&self, source_name: &str) -> StorageResult<Vec<FeedItem>> {
        let items = self.items.read().await;
        let mut found: Vec<FeedItem> = items
            .values()
            .filter(|item| item.source_name == source_name)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.pub_date.cmp(&a.pub_date));
        Ok(found)
    }

    async fn len(&self) -> StorageResult<usize> {
        Ok(self.items.read().await.len())
    }
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS feed_items (
    guid_hash   TEXT PRIMARY KEY NOT NULL,
    title       TEXT NOT NULL,
    link        TEXT NOT NULL,
    description TEXT NOT NULL,
    image_link  TEXT,
    pub_date    INTEGER NOT NULL,
    source_name TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_feed_items_pub_date ON feed_items(pub_date);
CREATE INDEX IF NOT EXISTS idx_feed_items_source ON feed_items(source_name);
";

/// SQLite-backed store.
pub struct SqliteFeedStore {
    conn: Connection,
}

impl SqliteFeedStore {
    /// Create a new in-memory database.
    pub async fn in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    /// Open (or create) a file-backed database.
    pub async fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let conn = Connection::open(path).await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> StorageResult<Self> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }
}

fn row_to_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<FeedItem> {
    let pub_ts: i64 = row.get(5)?;
    Ok(FeedItem {
        guid_hash: row.get(0)?,
        title: row.get(1)?,
        link: row.get(2)?,
        description: row.get(3)?,
        image_link: row.get(4)?,
        pub_date: DateTime::from_timestamp(pub_ts, 0).unwrap_or_default(),
        source_name: row.get(6)?,
    })
}

#[async_trait]
impl FeedStore for SqliteFeedStore {
    async fn insert_if_absent(&self, item: &FeedItem) -> StorageResult<bool> {
        let item = item.clone();
        let written = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "INSERT OR IGNORE INTO feed_items
                     (guid_hash, title, link, description, image_link, pub_date, source_name)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        item.guid_hash,
                        item.title,
                        item.link,
                        item.description,
                        item.image_link,
                        item.pub_date.timestamp(),
                        item.source_name
                    ],
                )?;
                Ok(changed == 1)
            })
            .await?;
        Ok(written)
    }

    async fn count_where(&self, guid_hash: &str) -> StorageResult<usize> {
        let guid_hash = guid_hash.to_string();
        let count = self
            .conn
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM feed_items WHERE guid_hash = ?1",
                    [&guid_hash],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await?;
        Ok(count as usize)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> StorageResult<usize> {
        let cutoff = cutoff.timestamp();
        let removed = self
            .conn
            .call(move |conn| Ok(conn.execute("DELETE FROM feed_items WHERE pub_date < ?1", [cutoff])?))
            .await?;
        Ok(removed)
    }

    async fn items_for_source(&self, source_name: &str) -> StorageResult<Vec<FeedItem>> {
        let source_name = source_name.to_string();
        let items = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT guid_hash, title, link, description, image_link, pub_date, source_name
                     FROM feed_items WHERE source_name = ?1 ORDER BY pub_date DESC",
                )?;
                let items = stmt
                    .query_map([&source_name], row_to_item)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(items)
            })
            .await?;
        Ok(items)
    }

    async fn len(&self) -> StorageResult<usize> {
        let count = self
            .conn
            .call(|conn| {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM feed_items", [], |row| row.get(0))?;
                Ok(count)
            })
            .await?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use fleetcron_models::guid_hash;

    fn item(guid: &str, source: &str, age_days: i64) -> FeedItem {
        FeedItem {
            guid_hash: guid_hash(guid),
            title: format!("title {}", guid),
            link: guid.to_string(),
            description: "body".to_string(),
            image_link: None,
            pub_date: Utc::now() - Duration::days(age_days),
            source_name: source.to_string(),
        }
    }

    async fn exercise(store: &dyn FeedStore) {
        let first = item("https://a/1", "a", 1);
        assert!(store.insert_if_absent(&first).await.unwrap());
        assert!(!store.insert_if_absent(&first).await.unwrap());
        assert_eq!(store.count_where(&first.guid_hash).await.unwrap(), 1);
        assert_eq!(store.len().await.unwrap(), 1);

        store.insert_if_absent(&item("https://a/2", "a", 40)).await.unwrap();
        store.insert_if_absent(&item("https://b/1", "b", 2)).await.unwrap();
        assert_eq!(store.items_for_source("a").await.unwrap().len(), 2);

        let removed = store.delete_older_than(Utc::now() - Duration::days(30)).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.len().await.unwrap(), 2);
        assert_eq!(store.count_where(&guid_hash("https://a/2")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_in_memory_store() {
        exercise(&InMemoryFeedStore::new()).await;
    }

    #[tokio::test]
    async fn test_sqlite_store() {
        exercise(&SqliteFeedStore::in_memory().await.unwrap()).await;
    }

    #[tokio::test]
    async fn test_sqlite_file_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feeds/items.db");
        {
            let store = SqliteFeedStore::open(&path).await.unwrap();
            store.insert_if_absent(&item("https://a/1", "a", 0)).await.unwrap();
        }
        let reopened = SqliteFeedStore::open(&path).await.unwrap();
        assert_eq!(reopened.len().await.unwrap(), 1);
    }
}
