//! Local-disk staging area.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::StorageResult;
use crate::staging::{validate_key, StagingStore};

/// Prefix of in-flight temporary files; never listed.
const TEMP_PREFIX: &str = ".staging-";

/// Staging area rooted at a directory shared by every node (local disk or a
/// network mount).
#[derive(Debug, Clone)]
pub struct LocalStaging {
    root: PathBuf,
}

impl LocalStaging {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    /// Write `data` to a hidden temp file next to `target`.
    async fn write_temp(&self, target: &Path, data: &[u8]) -> StorageResult<PathBuf> {
        let parent = target.parent().unwrap_or(&self.root);
        fs::create_dir_all(parent).await?;
        let temp = parent.join(format!("{}{}", TEMP_PREFIX, uuid::Uuid::new_v4()));
        let mut file = fs::File::create(&temp).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        Ok(temp)
    }
}

#[async_trait]
impl StagingStore for LocalStaging {
    fn describe(&self) -> String {
        format!("local:{}", self.root.display())
    }

    async fn check(&self) -> StorageResult<()> {
        fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    async fn put(&self, key: &str, data: &[u8]) -> StorageResult<()> {
        let target = self.path_for(key)?;
        let temp = self.write_temp(&target, data).await?;
        if let Err(e) = fs::rename(&temp, &target).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }
        debug!("Stored {} ({} bytes)", key, data.len());
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, data: &[u8]) -> StorageResult<bool> {
        let target = self.path_for(key)?;
        let temp = self.write_temp(&target, data).await?;
        // hard_link fails atomically when the target exists, and readers never
        // see the marker before its contents are complete.
        let result = fs::hard_link(&temp, &target).await;
        let _ = fs::remove_file(&temp).await;
        match result {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        // Walk from the deepest directory named by the prefix.
        let dir_part = match prefix.rfind('/') {
            Some(idx) => &prefix[..idx],
            None => "",
        };
        let start = if dir_part.is_empty() {
            self.root.clone()
        } else {
            self.path_for(dir_part)?
        };

        let mut keys = Vec::new();
        let mut stack = vec![start];
        while let Some(dir) = stack.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name();
                if name.to_string_lossy().starts_with(TEMP_PREFIX) {
                    continue;
                }
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    stack.push(path);
                    continue;
                }
                let Ok(relative) = path.strip_prefix(&self.root) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.path_for(key)?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_prefix(&self, prefix: &str) -> StorageResult<usize> {
        let keys = self.list(prefix).await?;
        let mut removed = 0;
        for key in &keys {
            if self.delete(key).await? {
                removed += 1;
            }
        }
        // A folder prefix also takes its (now empty) directory tree with it.
        let trimmed = prefix.trim_end_matches('/');
        if prefix.ends_with('/') && !trimmed.is_empty() {
            let dir = self.path_for(trimmed)?;
            match fs::remove_dir_all(&dir).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, LocalStaging) {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStaging::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let (_dir, store) = store();
        store.put("mail/a.txt", b"hello").await.unwrap();
        assert_eq!(store.get("mail/a.txt").await.unwrap(), Some(b"hello".to_vec()));
        assert!(store.exists("mail/a.txt").await.unwrap());
        assert!(store.delete("mail/a.txt").await.unwrap());
        assert!(!store.delete("mail/a.txt").await.unwrap());
        assert_eq!(store.get("mail/a.txt").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_put_if_absent_is_exclusive() {
        let (_dir, store) = store();
        assert!(store.put_if_absent("mail/taken-a.txt", b"first").await.unwrap());
        assert!(!store.put_if_absent("mail/taken-a.txt", b"second").await.unwrap());
        assert_eq!(store.get("mail/taken-a.txt").await.unwrap(), Some(b"first".to_vec()));
    }

    #[tokio::test]
    async fn test_concurrent_create_has_one_winner() {
        let (_dir, store) = store();
        let store = std::sync::Arc::new(store);
        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.put_if_absent("media_convert/x/a.part000.time.txt", format!("{}", i).as_bytes()).await.unwrap()
            }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_list_by_prefix_skips_temp_files() {
        let (dir, store) = store();
        store.put("media_convert/trip/a.part000.mov", b"1").await.unwrap();
        store.put("media_convert/trip/a.part001.mov", b"2").await.unwrap();
        store.put("media_converted/trip/a.part000.mp4", b"3").await.unwrap();
        std::fs::write(dir.path().join("media_convert/trip/.staging-junk"), b"x").unwrap();

        let keys = store.list("media_convert/").await.unwrap();
        assert_eq!(
            keys,
            vec!["media_convert/trip/a.part000.mov", "media_convert/trip/a.part001.mov"]
        );
        let keys = store.list("media_convert/trip/a.part001").await.unwrap();
        assert_eq!(keys.len(), 1);
        assert!(store.list("nothing/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_prefix_removes_folder() {
        let (dir, store) = store();
        store.put("media_convert/trip/a.mov", b"1").await.unwrap();
        store.put("media_convert/trip/b.mov", b"2").await.unwrap();
        assert_eq!(store.delete_prefix("media_convert/trip/").await.unwrap(), 2);
        assert!(!dir.path().join("media_convert/trip").exists());
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let (_dir, store) = store();
        assert!(store.put("../outside", b"x").await.is_err());
    }
}
