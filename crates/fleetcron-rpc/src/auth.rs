//! Session digests for RPC envelopes.
//!
//! The digest is an HMAC-SHA256 over the request time and routing fields
//! keyed with the fleet secret. Together with the clock-skew window this
//! rejects forged and replayed-long-after requests; it does not encrypt.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use fleetcron_models::RpcEnvelope;

use crate::error::{RpcError, RpcResult};

type HmacSha256 = Hmac<Sha256>;

/// Signs outgoing envelopes and verifies incoming ones.
#[derive(Clone)]
pub struct SessionSigner {
    secret: Vec<u8>,
    max_skew_secs: i64,
}

impl std::fmt::Debug for SessionSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSigner")
            .field("secret", &"[redacted]")
            .field("max_skew_secs", &self.max_skew_secs)
            .finish()
    }
}

impl SessionSigner {
    pub fn new(secret: impl AsRef<[u8]>, max_skew_secs: i64) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
            max_skew_secs,
        }
    }

    fn mac(&self) -> RpcResult<HmacSha256> {
        HmacSha256::new_from_slice(&self.secret).map_err(|e| RpcError::InvalidKey(e.to_string()))
    }

    /// Hex digest of `payload`.
    pub fn digest(&self, payload: &str) -> RpcResult<String> {
        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        Ok(mac
            .finalize()
            .into_bytes()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect())
    }

    /// Fill the envelope's `session` field.
    pub fn sign(&self, envelope: &mut RpcEnvelope) -> RpcResult<()> {
        envelope.session = self.digest(&envelope.signing_payload())?;
        Ok(())
    }

    /// Check the digest and the timestamp window as of `now` (unix seconds).
    pub fn verify(&self, envelope: &RpcEnvelope, now: i64) -> RpcResult<()> {
        let provided = decode_hex(&envelope.session).ok_or(RpcError::BadDigest)?;
        let mut mac = self.mac()?;
        mac.update(envelope.signing_payload().as_bytes());
        mac.verify_slice(&provided).map_err(|_| RpcError::BadDigest)?;

        let skew_secs = (now - envelope.time).abs();
        if skew_secs > self.max_skew_secs {
            return Err(RpcError::StaleTimestamp { skew_secs });
        }
        Ok(())
    }
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| s.get(i..i + 2).and_then(|pair| u8::from_str_radix(pair, 16).ok()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetcron_models::{MachineId, RpcCommand};

    const NOW: i64 = 1_700_000_000;

    fn signed(signer: &SessionSigner, time: i64) -> RpcEnvelope {
        let mut env = RpcEnvelope::new("feeds", MachineId::from("abcd"), RpcCommand::GetTasks, time);
        signer.sign(&mut env).unwrap();
        env
    }

    #[test]
    fn test_sign_then_verify() {
        let signer = SessionSigner::new("s3cret", 300);
        let env = signed(&signer, NOW);
        assert_eq!(env.session.len(), 64);
        assert!(signer.verify(&env, NOW + 10).is_ok());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let env = signed(&SessionSigner::new("s3cret", 300), NOW);
        let other = SessionSigner::new("other", 300);
        assert!(matches!(other.verify(&env, NOW), Err(RpcError::BadDigest)));
    }

    #[test]
    fn test_tampered_fields_rejected() {
        let signer = SessionSigner::new("s3cret", 300);
        let mut env = signed(&signer, NOW);
        env.job = "mail".to_string();
        assert!(matches!(signer.verify(&env, NOW), Err(RpcError::BadDigest)));

        let mut env = signed(&signer, NOW);
        env.command = RpcCommand::PutTasks;
        assert!(signer.verify(&env, NOW).is_err());
    }

    #[test]
    fn test_tampered_args_rejected() {
        let signer = SessionSigner::new("s3cret", 300);
        let mut env = RpcEnvelope::new("mail", MachineId::from("w1"), RpcCommand::PutTasks, NOW)
            .with_args(&serde_json::json!({"sent": 3}))
            .unwrap();
        signer.sign(&mut env).unwrap();
        tokio_test::assert_ok!(signer.verify(&env, NOW));

        env.args = Some(r#"{"sent":300}"#.to_string());
        assert!(matches!(signer.verify(&env, NOW), Err(RpcError::BadDigest)));

        env.args = None;
        assert!(matches!(signer.verify(&env, NOW), Err(RpcError::BadDigest)));
    }

    #[test]
    fn test_old_request_rejected() {
        let signer = SessionSigner::new("s3cret", 300);
        let env = signed(&signer, NOW - 301);
        assert!(matches!(
            signer.verify(&env, NOW),
            Err(RpcError::StaleTimestamp { skew_secs: 301 })
        ));
    }

    #[test]
    fn test_garbage_digest_rejected() {
        let signer = SessionSigner::new("s3cret", 300);
        let mut env = signed(&signer, NOW);
        env.session = "zz".to_string();
        assert!(signer.verify(&env, NOW).is_err());
        env.session = "abc".to_string();
        assert!(signer.verify(&env, NOW).is_err());
    }
}
