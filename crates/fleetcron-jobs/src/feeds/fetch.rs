//! Batched retrieval of feed documents.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tracing::debug;

use fleetcron_models::FeedSource;

use crate::error::{JobError, JobResult};

/// Raw body of one source, or why it could not be fetched.
#[derive(Debug)]
pub struct FetchedFeed {
    pub source: String,
    pub body: JobResult<Vec<u8>>,
}

/// Fetches many sources in one call. Results come back in no particular order.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch_all(&self, sources: &[FeedSource]) -> Vec<FetchedFeed>;
}

/// Fetches over HTTP with bounded concurrency.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    http: reqwest::Client,
    concurrency: usize,
}

/// Largest feed document accepted.
const MAX_FEED_BYTES: usize = 8 * 1024 * 1024;

impl HttpFetcher {
    pub fn new(timeout: Duration, concurrency: usize) -> JobResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("fleetcron-feeds/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| JobError::config_error(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            concurrency: concurrency.max(1),
        })
    }

    async fn fetch_one(&self, source: &FeedSource) -> JobResult<Vec<u8>> {
        let response = self
            .http
            .get(&source.url)
            .send()
            .await
            .map_err(|e| JobError::fetch_failed(format!("{}: {}", source.url, e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(JobError::fetch_failed(format!("{} answered {}", source.url, status)));
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| JobError::fetch_failed(format!("{}: {}", source.url, e)))?;
        if body.len() > MAX_FEED_BYTES {
            return Err(JobError::malformed(format!("{} is {} bytes", source.url, body.len())));
        }
        debug!(source = %source.name, bytes = body.len(), "Feed fetched");
        Ok(body.to_vec())
    }
}

#[async_trait]
impl FeedFetcher for HttpFetcher {
    async fn fetch_all(&self, sources: &[FeedSource]) -> Vec<FetchedFeed> {
        // Owned sources keep the boxed future free of higher-ranked borrows.
        stream::iter(sources.to_vec())
            .map(|source| async move {
                let body = self.fetch_one(&source).await;
                FetchedFeed {
                    source: source.name,
                    body,
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await
    }
}
