use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::instance::{ceil_secs, InstanceDesc, InstanceState};
use super::tokens::Tokens;

/// The replicated ring: instance ID to instance record.
///
/// There is no identity beyond "the last version successfully written to the
/// store". Records are added and removed; the descriptor itself never is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingDesc {
    #[serde(default)]
    pub instances: BTreeMap<String, InstanceDesc>,
}

impl RingDesc {
    /// Create an empty ring.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the decoded ring, or an empty one if the key was absent.
    pub fn get_or_create(value: Option<RingDesc>) -> Self {
        value.unwrap_or_default()
    }

    /// Insert or replace an instance record.
    ///
    /// A replaced record keeps its original registration time.
    pub fn add_instance(
        &mut self,
        id: impl Into<String>,
        addr: impl Into<String>,
        zone: impl Into<String>,
        tokens: Tokens,
        state: InstanceState,
        now: DateTime<Utc>,
    ) -> &InstanceDesc {
        let id = id.into();
        let mut instance = InstanceDesc::new(addr, zone, tokens, state, now);
        if let Some(existing) = self.instances.get(&id) {
            if existing.registered_timestamp != 0 {
                instance.registered_timestamp = existing.registered_timestamp;
            }
        }
        self.instances.insert(id.clone(), instance);
        &self.instances[&id]
    }

    /// Remove an instance record, returning it if it was present.
    pub fn remove_instance(&mut self, id: &str) -> Option<InstanceDesc> {
        self.instances.remove(id)
    }

    /// Record of an instance, if registered.
    pub fn get(&self, id: &str) -> Option<&InstanceDesc> {
        self.instances.get(id)
    }

    /// Mutable record of an instance, if registered.
    pub fn get_mut(&mut self, id: &str) -> Option<&mut InstanceDesc> {
        self.instances.get_mut(id)
    }

    /// Check if an instance is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.instances.contains_key(id)
    }

    /// Number of registered instances.
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Check if no instance is registered.
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Number of tokens registered for an instance, zero if absent.
    pub fn num_tokens(&self, id: &str) -> usize {
        self.instances.get(id).map(|i| i.tokens.len()).unwrap_or(0)
    }

    /// All tokens claimed by instances other than `except`.
    pub fn taken_tokens(&self, except: Option<&str>) -> HashSet<u32> {
        self.instances
            .iter()
            .filter(|(id, _)| Some(id.as_str()) != except)
            .flat_map(|(_, instance)| instance.tokens.iter().copied())
            .collect()
    }

    /// IDs of instances whose last heartbeat is older than `threshold`.
    ///
    /// A zero threshold never forgets anything.
    pub fn find_instances_to_forget(
        &self,
        now: DateTime<Utc>,
        threshold: Duration,
        except: Option<&str>,
    ) -> Vec<String> {
        if threshold.is_zero() {
            return Vec::new();
        }
        let threshold_secs = ceil_secs(threshold);

        self.instances
            .iter()
            .filter(|(id, _)| Some(id.as_str()) != except)
            .filter(|(_, instance)| instance.heartbeat_age(now) > threshold_secs)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Tokens claimed by more than one instance, with the claimants.
    pub fn token_conflicts(&self) -> Vec<(u32, Vec<String>)> {
        let mut owners: HashMap<u32, Vec<String>> = HashMap::new();
        for (id, instance) in &self.instances {
            for token in &instance.tokens {
                owners.entry(*token).or_default().push(id.clone());
            }
        }

        let mut conflicts: Vec<(u32, Vec<String>)> = owners
            .into_iter()
            .filter(|(_, ids)| ids.len() > 1)
            .collect();
        conflicts.sort_by_key(|(token, _)| *token);
        conflicts
    }

    /// Merged, ascending `(token, instance_id)` list of instances matching `filter`.
    pub fn ring_tokens<F>(&self, filter: F) -> Vec<(u32, &str)>
    where
        F: Fn(&InstanceDesc) -> bool,
    {
        let mut tokens: Vec<(u32, &str)> = self
            .instances
            .iter()
            .filter(|(_, instance)| filter(instance))
            .flat_map(|(id, instance)| instance.tokens.iter().map(move |t| (*t, id.as_str())))
            .collect();
        tokens.sort_unstable();
        tokens
    }

    /// Summarize the ring by state and health.
    pub fn stats(&self, heartbeat_timeout: Duration, now: DateTime<Utc>) -> RingStats {
        let mut stats = RingStats::default();
        for instance in self.instances.values() {
            stats.total += 1;
            stats.tokens += instance.tokens.len();
            match instance.state {
                InstanceState::Active => stats.active += 1,
                InstanceState::Joining | InstanceState::Pending => stats.joining += 1,
                InstanceState::Leaving | InstanceState::Left | InstanceState::Failed => {
                    stats.leaving += 1
                }
            }
            if !instance.is_heartbeat_healthy(heartbeat_timeout, now) {
                stats.unhealthy += 1;
            }
        }
        stats
    }
}

/// Ring statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RingStats {
    /// Registered instances.
    pub total: usize,
    /// Instances in the ACTIVE state.
    pub active: usize,
    /// Instances registering.
    pub joining: usize,
    /// Instances leaving or failed.
    pub leaving: usize,
    /// Instances whose heartbeat is older than the timeout.
    pub unhealthy: usize,
    /// Tokens across all instances.
    pub tokens: usize,
}
