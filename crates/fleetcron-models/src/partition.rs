//! Deterministic assignment of named work items to roster positions.

use sha2::{Digest, Sha256};

/// Stable 64-bit hash of a work item name.
///
/// Uses the first eight bytes of SHA-256, big-endian, so the value is identical
/// across processes, platforms and releases.
pub fn stable_hash(name: &str) -> u64 {
    let digest = Sha256::digest(name.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

/// Roster index that owns `name` when `roster_size` workers participate.
///
/// Returns `None` when the roster is empty.
pub fn partition_index(name: &str, roster_size: usize) -> Option<usize> {
    if roster_size == 0 {
        return None;
    }
    Some((stable_hash(name) % roster_size as u64) as usize)
}

/// Keep only the items owned by `position` in a roster of `roster_size`.
pub fn shard_for<'a, T, F>(items: &'a [T], name_of: F, position: usize, roster_size: usize) -> Vec<&'a T>
where
    F: Fn(&T) -> &str,
{
    items
        .iter()
        .filter(|item| partition_index(name_of(item), roster_size) == Some(position))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_is_deterministic() {
        for size in 1..8 {
            let first = partition_index("example-feed", size);
            for _ in 0..10 {
                assert_eq!(partition_index("example-feed", size), first);
            }
        }
    }

    #[test]
    fn test_partition_is_total_and_disjoint() {
        let names: Vec<String> = (0..200).map(|i| format!("source-{}", i)).collect();
        for size in 1..6 {
            let mut assigned = 0;
            for position in 0..size {
                assigned += shard_for(&names, |n| n.as_str(), position, size).len();
            }
            // Every item lands in exactly one shard.
            assert_eq!(assigned, names.len());
            for name in &names {
                let idx = partition_index(name, size).unwrap();
                assert!(idx < size);
            }
        }
    }

    #[test]
    fn test_example_feed_assignment() {
        assert_eq!(partition_index("example-feed", 3), Some(1));
        assert_eq!(partition_index("example-feed", 2), Some(0));
        assert_eq!(partition_index("example-feed", 1), Some(0));
        assert_eq!(partition_index("example-feed", 0), None);
    }

    #[test]
    fn test_stable_hash_known_value() {
        assert_eq!(stable_hash("example-feed"), 10118421679603368262);
    }
}
