//! Workload ownership computed from a ring snapshot.
//!
//! Each token owns the half-open range between its predecessor on the ring
//! (exclusive) and itself (inclusive). Only instances that are ACTIVE and
//! heartbeat-healthy take part, so a LEAVING or stale instance hands its ranges
//! to its successors as soon as a snapshot reflects it.

use std::hash::Hasher;
use std::time::Duration;

use chrono::{DateTime, Utc};
use twox_hash::XxHash64;

use super::desc::RingDesc;

/// Hash a workload key into the token space.
pub fn hash_key(key: &str) -> u32 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(key.as_bytes());
    hasher.finish() as u32
}

/// Range of the hash space: `(start, end]`, wrapping past `u32::MAX`.
///
/// `start == end` covers the whole space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenRange {
    /// Exclusive lower bound.
    pub start: u32,
    /// Inclusive upper bound.
    pub end: u32,
}

impl TokenRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, hash: u32) -> bool {
        if self.start < self.end {
            hash > self.start && hash <= self.end
        } else {
            hash > self.start || hash <= self.end
        }
    }

    /// Number of hash values in the range.
    pub fn size(&self) -> u64 {
        if self.start == self.end {
            1u64 << 32
        } else {
            self.end.wrapping_sub(self.start) as u64
        }
    }
}

/// Computes which part of the workload an instance owns.
pub trait ShardingStrategy: Send + Sync {
    /// Hash ranges owned by `instance_id` in this snapshot.
    fn owned_ranges(&self, desc: &RingDesc, instance_id: &str, now: DateTime<Utc>)
        -> Vec<TokenRange>;

    /// Instance owning `hash`, if any instance is serving.
    fn owner_of<'a>(&self, desc: &'a RingDesc, hash: u32, now: DateTime<Utc>) -> Option<&'a str>;

    /// Check if `instance_id` owns `hash`.
    fn owns(&self, desc: &RingDesc, instance_id: &str, hash: u32, now: DateTime<Utc>) -> bool {
        self.owner_of(desc, hash, now) == Some(instance_id)
    }
}

/// Nearest-token ownership over serving instances.
#[derive(Debug, Clone)]
pub struct TokenRangeStrategy {
    heartbeat_timeout: Duration,
}

impl TokenRangeStrategy {
    /// Instances whose heartbeat is older than `heartbeat_timeout` are skipped.
    pub fn new(heartbeat_timeout: Duration) -> Self {
        Self { heartbeat_timeout }
    }

    fn serving_tokens<'a>(&self, desc: &'a RingDesc, now: DateTime<Utc>) -> Vec<(u32, &'a str)> {
        desc.ring_tokens(|instance| instance.is_serving(self.heartbeat_timeout, now))
    }
}

impl ShardingStrategy for TokenRangeStrategy {
    fn owned_ranges(
        &self,
        desc: &RingDesc,
        instance_id: &str,
        now: DateTime<Utc>,
    ) -> Vec<TokenRange> {
        let ring = self.serving_tokens(desc, now);
        let len = ring.len();

        ring.iter()
            .enumerate()
            .filter(|(_, (_, owner))| *owner == instance_id)
            .map(|(idx, (token, _))| {
                let prev = ring[(idx + len - 1) % len].0;
                TokenRange::new(prev, *token)
            })
            .collect()
    }

    fn owner_of<'a>(&self, desc: &'a RingDesc, hash: u32, now: DateTime<Utc>) -> Option<&'a str> {
        let ring = self.serving_tokens(desc, now);
        if ring.is_empty() {
            return None;
        }

        let idx = ring.partition_point(|(token, _)| *token < hash);
        let (_, owner) = ring[idx % ring.len()];
        Some(owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::{InstanceState, Tokens};

    fn ring(now: DateTime<Utc>) -> RingDesc {
        let mut desc = RingDesc::new();
        desc.add_instance("a", "a", "", Tokens::new(vec![100, 300]), InstanceState::Active, now);
        desc.add_instance("b", "b", "", Tokens::new(vec![200]), InstanceState::Active, now);
        desc
    }

    #[test]
    fn test_token_range_contains() {
        let range = TokenRange::new(100, 200);
        assert!(!range.contains(100));
        assert!(range.contains(101));
        assert!(range.contains(200));
        assert!(!range.contains(201));

        let wrapping = TokenRange::new(300, 100);
        assert!(wrapping.contains(u32::MAX));
        assert!(wrapping.contains(0));
        assert!(wrapping.contains(100));
        assert!(!wrapping.contains(200));

        let full = TokenRange::new(42, 42);
        assert!(full.contains(0));
        assert!(full.contains(42));
        assert_eq!(full.size(), 1u64 << 32);
    }

    #[test]
    fn test_owned_ranges() {
        let now = Utc::now();
        let desc = ring(now);
        let strategy = TokenRangeStrategy::new(Duration::from_secs(60));

        assert_eq!(
            strategy.owned_ranges(&desc, "a", now),
            vec![TokenRange::new(300, 100), TokenRange::new(200, 300)]
        );
        assert_eq!(
            strategy.owned_ranges(&desc, "b", now),
            vec![TokenRange::new(100, 200)]
        );
        assert!(strategy.owned_ranges(&desc, "missing", now).is_empty());
    }

    #[test]
    fn test_owner_of() {
        let now = Utc::now();
        let desc = ring(now);
        let strategy = TokenRangeStrategy::new(Duration::from_secs(60));

        assert_eq!(strategy.owner_of(&desc, 50, now), Some("a"));
        assert_eq!(strategy.owner_of(&desc, 100, now), Some("a"));
        assert_eq!(strategy.owner_of(&desc, 150, now), Some("b"));
        assert_eq!(strategy.owner_of(&desc, 250, now), Some("a"));
        assert_eq!(strategy.owner_of(&desc, 301, now), Some("a"));
        assert!(strategy.owns(&desc, "b", 200, now));
    }

    #[test]
    fn test_ranges_partition_hash_space() {
        let now = Utc::now();
        let desc = ring(now);
        let strategy = TokenRangeStrategy::new(Duration::from_secs(60));

        let a = strategy.owned_ranges(&desc, "a", now);
        let b = strategy.owned_ranges(&desc, "b", now);
        let total: u64 = a.iter().chain(b.iter()).map(|r| r.size()).sum();
        assert_eq!(total, 1u64 << 32);

        for key in ["tenant-1/group-a", "tenant-2/group-b", "tenant-3/group-c"] {
            let hash = hash_key(key);
            let owners = a.iter().filter(|r| r.contains(hash)).count()
                + b.iter().filter(|r| r.contains(hash)).count();
            assert_eq!(owners, 1);

            let expected = if a.iter().any(|r| r.contains(hash)) { "a" } else { "b" };
            assert_eq!(strategy.owner_of(&desc, hash, now), Some(expected));
        }
    }

    #[test]
    fn test_non_serving_instances_excluded() {
        let now = Utc::now();
        let mut desc = ring(now);
        desc.get_mut("b").unwrap().state = InstanceState::Leaving;
        let strategy = TokenRangeStrategy::new(Duration::from_secs(60));

        assert!(strategy.owned_ranges(&desc, "b", now).is_empty());
        assert_eq!(strategy.owner_of(&desc, 150, now), Some("a"));

        desc.get_mut("a").unwrap().timestamp = now.timestamp() - 3600;
        assert_eq!(strategy.owner_of(&desc, 150, now), None);
    }

    #[test]
    fn test_single_token_owns_everything() {
        let now = Utc::now();
        let mut desc = RingDesc::new();
        desc.add_instance("solo", "s", "", Tokens::new(vec![7]), InstanceState::Active, now);
        let strategy = TokenRangeStrategy::new(Duration::ZERO);

        let ranges = strategy.owned_ranges(&desc, "solo", now);
        assert_eq!(ranges, vec![TokenRange::new(7, 7)]);
        assert!(ranges[0].contains(hash_key("anything")));
    }

    #[test]
    fn test_hash_key_is_stable() {
        assert_eq!(hash_key("tenant/group"), hash_key("tenant/group"));
        assert_ne!(hash_key("tenant/group-1"), hash_key("tenant/group-2"));
    }
}
