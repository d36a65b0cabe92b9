//! Staging-area layout of the transcoding pipeline.
//!
//! ```text
//! media_convert/<folder>/<upload>.<ext>            raw upload
//! media_convert/<folder>/<stem>.partNNN.<ext>      raw segment
//! media_convert/<folder>/<stem>.partNNN.time.txt   segment lease
//! media_convert/<folder>/segments.json             segment-count marker
//! media_convert/<folder>/split.txt                 split marker
//! media_converted/<folder>/<stem>.partNNN.mp4      converted segment
//! media_converted/<folder>/concat.txt              concat manifest
//! media_converted/<folder>/<stem>.mp4              final output
//! media_converted/<folder>/<stem>.jpg              thumbnail
//! ```

use std::collections::{BTreeMap, BTreeSet};

use fleetcron_models::media::{MEDIA_CONVERTED_DIR, MEDIA_CONVERT_DIR};
use fleetcron_storage::{join_key, StagingStore};

use crate::error::{JobError, JobResult};

/// Files of each folder under one root, keyed by folder name.
pub type FolderListing = BTreeMap<String, BTreeSet<String>>;

pub fn convert_key(folder: &str, file: &str) -> String {
    join_key(&[MEDIA_CONVERT_DIR, folder, file])
}

pub fn converted_key(folder: &str, file: &str) -> String {
    join_key(&[MEDIA_CONVERTED_DIR, folder, file])
}

/// A folder or file name that stays inside its folder.
pub fn validate_name(name: &str) -> JobResult<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') || name.contains('\\') {
        return Err(JobError::malformed(format!("invalid media name: {:?}", name)));
    }
    Ok(())
}

/// Group `<root>/<folder>/<file>` keys by folder. Deeper or shallower keys
/// are not part of the pipeline and are ignored.
pub async fn list_folders(staging: &dyn StagingStore, root: &str) -> JobResult<FolderListing> {
    let prefix = format!("{}/", root);
    let mut folders = FolderListing::new();
    for key in staging.list(&prefix).await? {
        let Some(rest) = key.strip_prefix(&prefix) else {
            continue;
        };
        let mut parts = rest.split('/');
        if let (Some(folder), Some(file), None) = (parts.next(), parts.next(), parts.next()) {
            folders.entry(folder.to_string()).or_default().insert(file.to_string());
        }
    }
    Ok(folders)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetcron_storage::LocalStaging;

    #[tokio::test]
    async fn test_list_folders_groups_files() {
        let dir = tempfile::tempdir().unwrap();
        let staging = LocalStaging::new(dir.path());
        staging.put("media_convert/trip/a.mov", b"1").await.unwrap();
        staging.put("media_convert/trip/split.txt", b"1").await.unwrap();
        staging.put("media_convert/party/b.avi", b"1").await.unwrap();
        staging.put("media_convert/stray.mov", b"1").await.unwrap();
        staging.put("media_convert/x/y/z.mov", b"1").await.unwrap();

        let folders = list_folders(&staging, MEDIA_CONVERT_DIR).await.unwrap();
        assert_eq!(folders.len(), 2);
        assert_eq!(folders["trip"].len(), 2);
        assert!(folders["party"].contains("b.avi"));
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("trip").is_ok());
        assert!(validate_name("..").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name("").is_err());
    }
}
