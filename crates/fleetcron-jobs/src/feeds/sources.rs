//! Feed source configuration.

use std::collections::HashSet;
use std::path::Path;

use tracing::warn;

use fleetcron_models::FeedSource;

use crate::error::{JobError, JobResult};

/// Load sources from a JSON array, normalizing their extraction paths.
///
/// Sources without a name or URL and repeated names are dropped with a
/// warning; the first definition of a name wins.
pub async fn load_sources(path: &Path) -> JobResult<Vec<FeedSource>> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| JobError::config_error(format!("Cannot read feed sources {}: {}", path.display(), e)))?;
    parse_sources(&bytes)
}

pub fn parse_sources(bytes: &[u8]) -> JobResult<Vec<FeedSource>> {
    let raw: Vec<FeedSource> = serde_json::from_slice(bytes)
        .map_err(|e| JobError::config_error(format!("Invalid feed sources file: {}", e)))?;

    let mut seen = HashSet::new();
    let mut sources = Vec::with_capacity(raw.len());
    for source in raw {
        let source = source.normalized();
        if source.name.is_empty() || source.url.is_empty() {
            warn!(name = %source.name, "Skipping feed source without name or url");
            continue;
        }
        if !seen.insert(source.name.clone()) {
            warn!(name = %source.name, "Skipping duplicate feed source");
            continue;
        }
        sources.push(source);
    }
    Ok(sources)
}
