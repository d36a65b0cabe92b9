//! Time-bounded exclusive claims on staging-area items.
//!
//! A lease is a marker object created with `put_if_absent` whose body is a
//! [`LeaseRecord`]. A marker older than the staleness limit belongs to a
//! worker that crashed or stalled and may be taken over.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use fleetcron_models::partition::stable_hash;
use fleetcron_models::{LeaseRecord, MachineId};

use crate::error::StorageResult;
use crate::staging::StagingStore;

/// Result of a claim attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// No marker existed; the lease is ours.
    Claimed,
    /// A stale marker was replaced with ours.
    Reclaimed {
        /// Previous holder, when the old marker was readable
        previous: Option<MachineId>,
    },
    /// Someone else holds a live lease.
    Busy { holder: Option<MachineId> },
}

impl ClaimOutcome {
    pub fn is_acquired(&self) -> bool {
        !matches!(self, ClaimOutcome::Busy { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimOutcome::Claimed => "claimed",
            ClaimOutcome::Reclaimed { .. } => "reclaimed",
            ClaimOutcome::Busy { .. } => "busy",
        }
    }
}

/// Claims, inspects and releases lease markers for one holder and one
/// staleness limit.
#[derive(Clone)]
pub struct LeaseManager {
    store: Arc<dyn StagingStore>,
    holder: MachineId,
    limit: Duration,
}

impl LeaseManager {
    pub fn new(store: Arc<dyn StagingStore>, holder: MachineId, limit: Duration) -> Self {
        Self { store, holder, limit }
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }

    pub fn holder(&self) -> &MachineId {
        &self.holder
    }

    /// Claim the lease guarded by `marker`.
    pub async fn claim(&self, marker: &str) -> StorageResult<ClaimOutcome> {
        self.claim_at(marker, Utc::now()).await
    }

    /// Claim as of `now`.
    pub async fn claim_at(&self, marker: &str, now: DateTime<Utc>) -> StorageResult<ClaimOutcome> {
        let record = LeaseRecord::new(self.holder.clone(), now);
        let body = record.to_bytes();

        if self.store.put_if_absent(marker, &body).await? {
            debug!(marker, holder = %self.holder, "Lease claimed");
            return Ok(ClaimOutcome::Claimed);
        }

        let Some(existing) = self.store.get(marker).await? else {
            // Released between our create and our read; one more try.
            return Ok(if self.store.put_if_absent(marker, &body).await? {
                ClaimOutcome::Claimed
            } else {
                ClaimOutcome::Busy { holder: None }
            });
        };

        let current = LeaseRecord::from_bytes(&existing);
        if let Some(current) = &current {
            if current.is_live(now, self.limit) {
                debug!(
                    marker,
                    holder = %current.holder,
                    age_secs = current.age(now).num_seconds(),
                    "Lease busy"
                );
                return Ok(ClaimOutcome::Busy {
                    holder: Some(current.holder.clone()),
                });
            }
        }

        // Taking over is serialized per stale body: only the worker that
        // creates the reap marker for exactly these bytes may overwrite it.
        let reap = reap_key(marker, &existing);
        if !self.store.put_if_absent(&reap, &body).await? {
            self.clear_abandoned_reap(&reap, now).await?;
            return Ok(ClaimOutcome::Busy { holder: None });
        }
        if self.store.get(marker).await?.as_deref() != Some(existing.as_slice()) {
            return Ok(ClaimOutcome::Busy { holder: None });
        }
        self.store.put(marker, &body).await?;

        let previous = current.map(|r| r.holder);
        info!(
            marker,
            holder = %self.holder,
            previous = previous.as_ref().map(|p| p.as_str()).unwrap_or("unknown"),
            "Stale lease reclaimed"
        );
        Ok(ClaimOutcome::Reclaimed { previous })
    }

    /// A reap marker outliving the staleness limit belongs to a claimer that
    /// died mid-takeover; removing it lets the next tick try again.
    async fn clear_abandoned_reap(&self, reap: &str, now: DateTime<Utc>) -> StorageResult<()> {
        if let Some(bytes) = self.store.get(reap).await? {
            let live = LeaseRecord::from_bytes(&bytes).is_some_and(|r| r.is_live(now, self.limit));
            if !live {
                self.store.delete(reap).await?;
            }
        }
        Ok(())
    }

    /// Current lease record, if the marker exists and is readable.
    pub async fn inspect(&self, marker: &str) -> StorageResult<Option<LeaseRecord>> {
        Ok(self
            .store
            .get(marker)
            .await?
            .and_then(|bytes| LeaseRecord::from_bytes(&bytes)))
    }

    /// Whether the marker exists and is still live as of `now`.
    pub async fn is_held(&self, marker: &str, now: DateTime<Utc>) -> StorageResult<bool> {
        Ok(self
            .inspect(marker)
            .await?
            .map(|r| r.is_live(now, self.limit))
            .unwrap_or(false))
    }

    /// Refresh the timestamp of a lease we hold, pushing its expiry out.
    /// Returns `false` when the marker is gone or belongs to someone else.
    pub async fn renew(&self, marker: &str) -> StorageResult<bool> {
        match self.inspect(marker).await? {
            Some(record) if record.holder == self.holder => {
                let fresh = LeaseRecord::new(self.holder.clone(), Utc::now());
                self.store.put(marker, &fresh.to_bytes()).await?;
                debug!(marker, holder = %self.holder, "Lease renewed");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Delete the marker and any reap markers left by takeovers. Releasing
    /// an absent lease is not an error.
    pub async fn release(&self, marker: &str) -> StorageResult<()> {
        if self.store.delete(marker).await? {
            debug!(marker, holder = %self.holder, "Lease released");
        }
        self.store.delete_prefix(&format!("{}{}", marker, REAP_INFIX)).await?;
        Ok(())
    }
}

const REAP_INFIX: &str = ".reap-";

/// `<marker>.reap-<hash of the stale body>`.
fn reap_key(marker: &str, stale_body: &[u8]) -> String {
    format!(
        "{}{}{:016x}",
        marker,
        REAP_INFIX,
        stable_hash(&String::from_utf8_lossy(stale_body))
    )
}
