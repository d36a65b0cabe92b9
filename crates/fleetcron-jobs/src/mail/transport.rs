//! Mail delivery seam.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;
use url::Url;

use fleetcron_models::MailMessage;

use crate::error::{JobError, JobResult};

/// Hands one message to the outside world.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send_immediate(&self, message: &MailMessage) -> JobResult<()>;
}

#[derive(Serialize)]
struct RelayRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    body: &'a str,
    headers: BTreeMap<&'a str, &'a str>,
}

/// Posts each message as JSON to an HTTP mail relay.
#[derive(Debug, Clone)]
pub struct HttpMailRelay {
    http: reqwest::Client,
    endpoint: Url,
    from: String,
}

impl HttpMailRelay {
    pub fn new(endpoint: &str, from: impl Into<String>, timeout: Duration) -> JobResult<Self> {
        let endpoint =
            Url::parse(endpoint).map_err(|e| JobError::config_error(format!("Invalid MAIL_RELAY_URL {}: {}", endpoint, e)))?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| JobError::config_error(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            endpoint,
            from: from.into(),
        })
    }
}

#[async_trait]
impl MailTransport for HttpMailRelay {
    async fn send_immediate(&self, message: &MailMessage) -> JobResult<()> {
        let request = RelayRequest {
            from: &self.from,
            to: &message.recipient,
            subject: &message.subject,
            body: &message.body,
            headers: message
                .headers
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect(),
        };

        let response = self
            .http
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await
            .map_err(|e| JobError::delivery_failed(format!("{}: {}", message.recipient, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(JobError::delivery_failed(format!(
                "relay answered {} for {}",
                status, message.recipient
            )));
        }
        debug!(recipient = %message.recipient, "Mail relayed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_relay_posts_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/send"))
            .and(body_partial_json(serde_json::json!({
                "from": "noreply@fleet",
                "to": "a@example.com",
                "subject": "Hi",
                "headers": {"X-Tag": "digest"}
            })))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let relay = HttpMailRelay::new(&format!("{}/send", server.uri()), "noreply@fleet", Duration::from_secs(5)).unwrap();
        let message = MailMessage::new("Hi", "body", "a@example.com").with_header("X-Tag", "digest");
        relay.send_immediate(&message).await.unwrap();
    }

    #[tokio::test]
    async fn test_relay_rejection_is_delivery_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let relay = HttpMailRelay::new(&server.uri(), "noreply@fleet", Duration::from_secs(5)).unwrap();
        let err = relay
            .send_immediate(&MailMessage::new("s", "b", "x@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::DeliveryFailed(_)));
        assert!(err.is_transient());
    }
}
