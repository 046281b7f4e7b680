use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::tokens::Tokens;

/// Lifecycle state of a ring instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InstanceState {
    /// Created, not yet registered.
    Pending,
    /// Registered, tokens not yet eligible for ownership.
    Joining,
    /// Healthy and owning its tokens.
    Active,
    /// Shutting down, ownership being relinquished.
    Leaving,
    /// Deregistered.
    Left,
    /// Unrecoverable error during registration or deregistration.
    Failed,
}

impl InstanceState {
    /// Convert to the string used on the wire and in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Joining => "JOINING",
            Self::Active => "ACTIVE",
            Self::Leaving => "LEAVING",
            Self::Left => "LEFT",
            Self::Failed => "FAILED",
        }
    }

    /// Parse from string, case-insensitively.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Some(Self::Pending),
            "JOINING" => Some(Self::Joining),
            "ACTIVE" => Some(Self::Active),
            "LEAVING" => Some(Self::Leaving),
            "LEFT" => Some(Self::Left),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Check if tokens in this state take part in workload ownership.
    pub fn owns_tokens(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Check if the state is terminal for a lifecycler.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Left | Self::Failed)
    }
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Record of one instance in the ring descriptor.
///
/// The instance ID is the key under which the record is stored, so it is not
/// repeated here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDesc {
    /// Network address other instances use to reach this one.
    pub addr: String,
    /// Availability zone, empty when unset.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub zone: String,
    /// Claimed hash-space positions, ascending.
    pub tokens: Tokens,
    /// Lifecycle state.
    pub state: InstanceState,
    /// Last heartbeat, unix seconds.
    pub timestamp: i64,
    /// First registration, unix seconds. Zero when unknown.
    #[serde(default)]
    pub registered_timestamp: i64,
}

impl InstanceDesc {
    /// Create a record registered and heartbeating at `now`.
    pub fn new(
        addr: impl Into<String>,
        zone: impl Into<String>,
        tokens: Tokens,
        state: InstanceState,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            addr: addr.into(),
            zone: zone.into(),
            tokens,
            state,
            timestamp: now.timestamp(),
            registered_timestamp: now.timestamp(),
        }
    }

    /// Seconds elapsed since the last heartbeat. Negative under clock skew.
    pub fn heartbeat_age(&self, now: DateTime<Utc>) -> i64 {
        now.timestamp() - self.timestamp
    }

    /// Check if the last heartbeat is within `timeout` of `now`.
    ///
    /// A zero timeout disables the check.
    pub fn is_heartbeat_healthy(&self, timeout: Duration, now: DateTime<Utc>) -> bool {
        if timeout.is_zero() {
            return true;
        }
        self.heartbeat_age(now) <= ceil_secs(timeout)
    }

    /// Check if this instance currently owns its tokens.
    pub fn is_serving(&self, heartbeat_timeout: Duration, now: DateTime<Utc>) -> bool {
        self.state.owns_tokens() && self.is_heartbeat_healthy(heartbeat_timeout, now)
    }

    /// When the instance first registered, if known.
    pub fn registered_at(&self) -> Option<DateTime<Utc>> {
        if self.registered_timestamp == 0 {
            return None;
        }
        DateTime::from_timestamp(self.registered_timestamp, 0)
    }
}

/// Whole seconds in `d`, rounded up and capped at `i64::MAX`.
///
/// Heartbeats are stored with second precision, so a 500ms timeout must not
/// turn into zero.
pub(crate) fn ceil_secs(d: Duration) -> i64 {
    let secs = d.as_secs().saturating_add(u64::from(d.subsec_nanos() > 0));
    i64::try_from(secs).unwrap_or(i64::MAX)
}
