//! Machine identity and the ordered worker roster.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::partition::partition_index;

/// Stable identity of a node, derived from its advertised address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct MachineId(pub String);

impl MachineId {
    /// Derive the identity from an advertised address (e.g. `http://10.0.0.5:8000`).
    ///
    /// Trailing slashes are ignored so `http://a/` and `http://a` map to the same node.
    pub fn from_address(address: &str) -> Self {
        let normalized = address.trim().trim_end_matches('/');
        let digest = Sha256::digest(normalized.as_bytes());
        let hex: String = digest[..8].iter().map(|b| format!("{:02x}", b)).collect();
        Self(hex)
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MachineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MachineId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Ordered list of worker identities for one tick.
///
/// Order is significant: the partition function maps an item to a roster
/// position, so every participant must see the same ordering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct Roster(Vec<MachineId>);

impl Roster {
    pub fn new(members: Vec<MachineId>) -> Self {
        Self(members)
    }

    /// Build a roster from advertised addresses, keeping configuration order.
    pub fn from_addresses<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut members: Vec<MachineId> = Vec::new();
        for address in addresses {
            let id = MachineId::from_address(address.as_ref());
            if !members.contains(&id) {
                members.push(id);
            }
        }
        Self(members)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn members(&self) -> &[MachineId] {
        &self.0
    }

    /// Roster position of a machine, if it is a member.
    pub fn position(&self, machine: &MachineId) -> Option<usize> {
        self.0.iter().position(|m| m == machine)
    }

    pub fn contains(&self, machine: &MachineId) -> bool {
        self.position(machine).is_some()
    }

    /// The member that owns `item` this tick, or `None` for an empty roster.
    pub fn owner_of(&self, item: &str) -> Option<&MachineId> {
        partition_index(item, self.0.len()).map(|idx| &self.0[idx])
    }

    /// Whether `machine` owns `item` under this roster.
    pub fn is_owner(&self, machine: &MachineId, item: &str) -> bool {
        self.owner_of(item) == Some(machine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_machine_id_is_stable_and_normalized() {
        let a = MachineId::from_address("http://10.0.0.1:8000");
        let b = MachineId::from_address("http://10.0.0.1:8000/");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 16);
        assert_ne!(a, MachineId::from_address("http://10.0.0.2:8000"));
    }

    #[test]
    fn test_roster_keeps_order_and_dedups() {
        let roster = Roster::from_addresses(["http://w0", "http://w1", "http://w0", "http://w2"]);
        assert_eq!(roster.len(), 3);
        assert_eq!(roster.position(&MachineId::from_address("http://w1")), Some(1));
        assert_eq!(roster.position(&MachineId::from_address("http://w2")), Some(2));
        assert!(!roster.contains(&MachineId::from_address("http://w9")));
    }

    #[test]
    fn test_empty_roster_has_no_owner() {
        let roster = Roster::default();
        assert!(roster.owner_of("example-feed").is_none());
    }
}
