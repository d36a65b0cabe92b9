//! Outbound mail batches.

use serde::{Deserialize, Serialize};

/// One message handed to the mail transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailMessage {
    pub subject: String,
    pub body: String,
    pub recipient: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<(String, String)>,
}

impl MailMessage {
    pub fn new(subject: impl Into<String>, body: impl Into<String>, recipient: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
            recipient: recipient.into(),
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// A claimed batch file handed to a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailBatch {
    /// Batch name (file stem under `mail/`)
    pub batch: String,
    pub messages: Vec<MailMessage>,
}

/// Delivery report for one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailReport {
    pub batch: String,
    pub sent: usize,
    /// Messages the transport rejected; re-queued by the coordinator
    #[serde(default)]
    pub failed: Vec<MailMessage>,
}

/// Encode messages as JSON lines.
pub fn encode_batch(messages: &[MailMessage]) -> Vec<u8> {
    let mut out = Vec::new();
    for message in messages {
        if let Ok(line) = serde_json::to_vec(message) {
            out.extend_from_slice(&line);
            out.push(b'\n');
        }
    }
    out
}

/// Decode JSON lines, skipping malformed lines.
pub fn decode_batch(bytes: &[u8]) -> Vec<MailMessage> {
    String::from_utf8_lossy(bytes)
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_lines_skip_garbage() {
        let messages = vec![
            MailMessage::new("Hi", "Body", "a@example.com"),
            MailMessage::new("Hello", "Other", "b@example.com").with_header("X-Tag", "digest"),
        ];
        let mut bytes = encode_batch(&messages);
        bytes.extend_from_slice(b"{broken\n\n");

        let decoded = decode_batch(&bytes);
        assert_eq!(decoded, messages);
    }
}
