//! The shared work staging area.
//!
//! Keys are slash-separated relative paths (`media_convert/<folder>/<file>`).
//! Backends differ in where bytes live but agree on two guarantees: `put`
//! never exposes a partially written object, and `put_if_absent` is an
//! atomic create-if-absent, which is what lease markers are built on.

use async_trait::async_trait;

use crate::error::{StorageError, StorageResult};

#[async_trait]
pub trait StagingStore: Send + Sync {
    /// Human-readable location, for logs.
    fn describe(&self) -> String;

    /// Verify the backend is reachable (or the root directory can be created).
    async fn check(&self) -> StorageResult<()>;

    /// Create or replace an object.
    async fn put(&self, key: &str, data: &[u8]) -> StorageResult<()>;

    /// Create an object only if no object exists under `key`.
    /// Returns `false` when one already exists.
    async fn put_if_absent(&self, key: &str, data: &[u8]) -> StorageResult<bool>;

    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Returns `false` when there was nothing to delete.
    async fn delete(&self, key: &str) -> StorageResult<bool>;

    /// All object keys starting with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>>;

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Delete every object under `prefix`. Returns the number removed.
    async fn delete_prefix(&self, prefix: &str) -> StorageResult<usize> {
        let keys = self.list(prefix).await?;
        let mut removed = 0;
        for key in keys {
            if self.delete(&key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Join key segments with `/`, skipping empty ones.
pub fn join_key(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Reject keys that could escape the staging root.
pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() || key.starts_with('/') || key.contains('\\') || key.contains('\0') {
        return Err(StorageError::invalid_key(key));
    }
    if key.split('/').any(|segment| segment.is_empty() || segment == "." || segment == "..") {
        return Err(StorageError::invalid_key(key));
    }
    Ok(())
}

/// Last path segment of a key.
pub fn file_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}
