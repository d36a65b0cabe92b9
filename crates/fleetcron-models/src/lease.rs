//! Lease marker contents.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::machine::MachineId;

/// Body of a lease marker object in the staging area.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    /// Worker that holds the lease
    pub holder: MachineId,
    /// When the lease was taken
    pub claimed_at: DateTime<Utc>,
}

impl LeaseRecord {
    pub fn new(holder: MachineId, claimed_at: DateTime<Utc>) -> Self {
        Self { holder, claimed_at }
    }

    /// Age of the lease at `now`. Clock skew into the future counts as zero.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.claimed_at).max(Duration::zero())
    }

    /// A lease is live while `now - claimed_at < limit`.
    pub fn is_live(&self, now: DateTime<Utc>, limit: Duration) -> bool {
        self.age(now) < limit
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        // Serializing a struct of a string and a timestamp cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Parse a marker body; unreadable markers yield `None` and are treated as stale.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice(bytes).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_liveness_boundaries() {
        let limit = Duration::seconds(100);
        let now = Utc::now();
        let fresh = LeaseRecord::new(MachineId::from("w0"), now - Duration::seconds(50));
        let stale = LeaseRecord::new(MachineId::from("w0"), now - Duration::seconds(200));
        let exact = LeaseRecord::new(MachineId::from("w0"), now - limit);

        assert!(fresh.is_live(now, limit));
        assert!(!stale.is_live(now, limit));
        assert!(!exact.is_live(now, limit));
    }

    #[test]
    fn test_marker_roundtrip_and_garbage() {
        let record = LeaseRecord::new(MachineId::from("w1"), Utc::now());
        assert_eq!(LeaseRecord::from_bytes(&record.to_bytes()), Some(record));
        assert_eq!(LeaseRecord::from_bytes(b"not json"), None);
    }
}
