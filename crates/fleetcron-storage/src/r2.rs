//! Cloudflare R2 (S3-compatible) staging area.
//!
//! Lets workers on separate hosts share a staging area without a network
//! filesystem. Exclusive creation uses a conditional `PutObject`
//! (`If-None-Match: *`).

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::debug;

use crate::error::{StorageError, StorageResult};
use crate::staging::{validate_key, StagingStore};

/// Configuration for the R2 client.
#[derive(Debug, Clone)]
pub struct R2Config {
    /// R2 endpoint URL (S3 API endpoint)
    pub endpoint_url: String,
    /// Access key ID
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
    /// Bucket name
    pub bucket_name: String,
    /// Region (usually "auto" for R2)
    pub region: String,
    /// Key prefix under which the staging area lives
    pub prefix: String,
}

impl R2Config {
    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Ok(Self {
            endpoint_url: std::env::var("R2_ENDPOINT_URL")
                .map_err(|_| StorageError::config_error("R2_ENDPOINT_URL not set"))?,
            access_key_id: std::env::var("R2_ACCESS_KEY_ID")
                .map_err(|_| StorageError::config_error("R2_ACCESS_KEY_ID not set"))?,
            secret_access_key: std::env::var("R2_SECRET_ACCESS_KEY")
                .map_err(|_| StorageError::config_error("R2_SECRET_ACCESS_KEY not set"))?,
            bucket_name: std::env::var("R2_BUCKET_NAME")
                .map_err(|_| StorageError::config_error("R2_BUCKET_NAME not set"))?,
            region: std::env::var("R2_REGION").unwrap_or_else(|_| "auto".to_string()),
            prefix: std::env::var("R2_STAGING_PREFIX").unwrap_or_else(|_| "staging".to_string()),
        })
    }
}

/// Staging area stored in an R2 bucket.
#[derive(Clone)]
pub struct R2Staging {
    client: Client,
    bucket: String,
    prefix: String,
}

impl R2Staging {
    pub fn new(config: R2Config) -> Self {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "r2",
        );

        let sdk_config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint_url)
            .region(Region::new(config.region))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Self {
            client: Client::from_conf(sdk_config),
            bucket: config.bucket_name,
            prefix: config.prefix.trim_matches('/').to_string(),
        }
    }

    pub fn from_env() -> StorageResult<Self> {
        Ok(Self::new(R2Config::from_env()?))
    }

    fn object_key(&self, key: &str) -> StorageResult<String> {
        validate_key(key)?;
        Ok(scoped(&self.prefix, key))
    }
}

/// Bucket key for a staging key under `root`.
fn scoped(root: &str, key: &str) -> String {
    if root.is_empty() {
        key.to_string()
    } else {
        format!("{}/{}", root, key)
    }
}

/// Staging key for a bucket key under `root`.
fn unscoped<'a>(root: &str, object_key: &'a str) -> &'a str {
    if root.is_empty() {
        return object_key;
    }
    object_key
        .strip_prefix(root)
        .and_then(|rest| rest.strip_prefix('/'))
        .unwrap_or(object_key)
}

fn is_not_found(message: &str) -> bool {
    message.contains("NoSuchKey") || message.contains("NotFound")
}

fn is_precondition_failed(message: &str) -> bool {
    message.contains("PreconditionFailed") || message.contains("ConditionalRequestConflict")
}

#[async_trait]
impl StagingStore for R2Staging {
    fn describe(&self) -> String {
        format!("r2://{}/{}", self.bucket, self.prefix)
    }

    async fn check(&self) -> StorageResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| StorageError::AwsSdk(format!("R2 connectivity check failed: {}", e)))?;
        Ok(())
    }

    async fn put(&self, key: &str, data: &[u8]) -> StorageResult<()> {
        let object_key = self.object_key(key)?;
        debug!("Uploading {} bytes to {}", data.len(), object_key);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .body(ByteStream::from(data.to_vec()))
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        Ok(())
    }

    async fn put_if_absent(&self, key: &str, data: &[u8]) -> StorageResult<bool> {
        let object_key = self.object_key(key)?;

        let result = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .if_none_match("*")
            .body(ByteStream::from(data.to_vec()))
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(e) => {
                let status = e.raw_response().map(|r| r.status().as_u16());
                let message = format!("{:?}", e);
                if status == Some(412) || status == Some(409) || is_precondition_failed(&message) {
                    Ok(false)
                } else {
                    Err(StorageError::upload_failed(e.to_string()))
                }
            }
        }
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let object_key = self.object_key(key)?;

        let response = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                let message = format!("{:?}", e);
                if is_not_found(&message) {
                    return Ok(None);
                }
                return Err(StorageError::DownloadFailed(e.to_string()));
            }
        };

        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::DownloadFailed(e.to_string()))?
            .into_bytes()
            .to_vec();

        Ok(Some(bytes))
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        // S3 deletes are idempotent and do not report whether the key existed.
        let existed = self.exists(key).await?;
        if !existed {
            return Ok(false);
        }
        let object_key = self.object_key(key)?;
        debug!("Deleting {}", object_key);

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .send()
            .await
            .map_err(|e| StorageError::delete_failed(e.to_string()))?;

        Ok(true)
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let full_prefix = scoped(&self.prefix, prefix);
        debug!("Listing objects with prefix: {}", full_prefix);

        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&full_prefix);

            if let Some(token) = continuation_token {
                request = request.continuation_token(token);
            }

            let response = request
                .send()
                .await
                .map_err(|e| StorageError::ListFailed(e.to_string()))?;

            for obj in response.contents() {
                if let Some(key) = obj.key() {
                    keys.push(unscoped(&self.prefix, key).to_string());
                }
            }

            if response.is_truncated() == Some(true) {
                continuation_token = response.next_continuation_token;
            } else {
                break;
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let object_key = self.object_key(key)?;
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                let message = format!("{:?}", e);
                if is_not_found(&message) {
                    Ok(false)
                } else {
                    Err(StorageError::AwsSdk(e.to_string()))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_mapping() {
        assert_eq!(scoped("staging", "mail/a.txt"), "staging/mail/a.txt");
        assert_eq!(unscoped("staging", "staging/mail/a.txt"), "mail/a.txt");
        assert_eq!(scoped("", "mail/a.txt"), "mail/a.txt");
        assert_eq!(unscoped("", "mail/a.txt"), "mail/a.txt");
    }

    #[test]
    fn test_error_classification() {
        assert!(is_not_found("ServiceError { NoSuchKey }"));
        assert!(is_precondition_failed("PreconditionFailed: At least one of the pre-conditions"));
        assert!(!is_precondition_failed("AccessDenied"));
    }
}
