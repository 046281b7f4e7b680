use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RulerError};

/// Ring configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RingConfig {
    /// Key of the ring descriptor in the KV store.
    #[serde(default = "default_ring_key")]
    pub key: String,

    /// Tokens claimed by each instance.
    #[serde(default = "default_num_tokens")]
    pub num_tokens: usize,

    /// Heartbeat (and auto-forget scan) interval in milliseconds.
    #[serde(default = "default_heartbeat_period")]
    pub heartbeat_period_ms: u64,

    /// Age after which an instance is unhealthy, in seconds. Zero disables.
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_secs: u64,

    /// Unhealthy instances are forgotten after this many heartbeat timeouts.
    #[serde(default = "default_auto_forget_unhealthy_periods")]
    pub auto_forget_unhealthy_periods: u32,

    /// Attempts per CAS before the store is reported unavailable.
    #[serde(default = "default_cas_max_retries")]
    pub cas_max_retries: u32,

    /// Pause between CAS attempts in milliseconds.
    #[serde(default = "default_cas_retry_delay")]
    pub cas_retry_delay_ms: u64,

    /// Bound on the final deregistration write, in seconds.
    #[serde(default = "default_leave_timeout")]
    pub leave_timeout_secs: u64,

    /// Remove the instance from the ring on shutdown.
    #[serde(default = "default_true")]
    pub unregister_on_shutdown: bool,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            key: default_ring_key(),
            num_tokens: default_num_tokens(),
            heartbeat_period_ms: default_heartbeat_period(),
            heartbeat_timeout_secs: default_heartbeat_timeout(),
            auto_forget_unhealthy_periods: default_auto_forget_unhealthy_periods(),
            cas_max_retries: default_cas_max_retries(),
            cas_retry_delay_ms: default_cas_retry_delay(),
            leave_timeout_secs: default_leave_timeout(),
            unregister_on_shutdown: true,
        }
    }
}

impl RingConfig {
    pub fn heartbeat_period(&self) -> Duration {
        Duration::from_millis(self.heartbeat_period_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    /// Heartbeat age after which peers forget an instance.
    ///
    /// Saturates at `Duration::MAX`; `validate` rejects settings that overflow.
    pub fn auto_forget_threshold(&self) -> Duration {
        self.heartbeat_timeout()
            .checked_mul(self.auto_forget_unhealthy_periods)
            .unwrap_or(Duration::MAX)
    }

    pub fn cas_retry_delay(&self) -> Duration {
        Duration::from_millis(self.cas_retry_delay_ms)
    }

    pub fn leave_timeout(&self) -> Duration {
        Duration::from_secs(self.leave_timeout_secs)
    }

    /// Reject settings the lifecycle cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.key.is_empty() {
            return Err(RulerError::Config("ring key must not be empty".into()));
        }
        if self.num_tokens == 0 {
            return Err(RulerError::Config("num_tokens must be at least 1".into()));
        }
        if self.heartbeat_period_ms == 0 {
            return Err(RulerError::Config(
                "heartbeat_period_ms must be greater than zero".into(),
            ));
        }
        if self
            .heartbeat_timeout()
            .checked_mul(self.auto_forget_unhealthy_periods)
            .is_none()
        {
            return Err(RulerError::Config(
                "heartbeat_timeout_secs * auto_forget_unhealthy_periods overflows".into(),
            ));
        }
        if self.cas_max_retries == 0 {
            return Err(RulerError::Config("cas_max_retries must be at least 1".into()));
        }
        Ok(())
    }
}

fn default_ring_key() -> String {
    "ring".to_string()
}

fn default_num_tokens() -> usize {
    128
}

fn default_heartbeat_period() -> u64 {
    5000
}

fn default_heartbeat_timeout() -> u64 {
    60
}

fn default_auto_forget_unhealthy_periods() -> u32 {
    10
}

fn default_cas_max_retries() -> u32 {
    10
}

fn default_cas_retry_delay() -> u64 {
    100
}

fn default_leave_timeout() -> u64 {
    5
}

fn default_true() -> bool {
    true
}
