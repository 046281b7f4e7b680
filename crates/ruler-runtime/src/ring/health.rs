use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use ruler_core::config::RingConfig;
use ruler_core::Result;

use super::client::RingClient;

/// Health monitor configuration.
#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    /// Interval between scans.
    pub period: Duration,
    /// Heartbeat age after which an instance is unhealthy.
    pub heartbeat_timeout: Duration,
    /// Unhealthy periods tolerated before an instance is forgotten.
    pub unhealthy_periods: u32,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(60),
            unhealthy_periods: 10,
        }
    }
}

impl From<&RingConfig> for HealthMonitorConfig {
    fn from(config: &RingConfig) -> Self {
        Self {
            period: config.heartbeat_period(),
            heartbeat_timeout: config.heartbeat_timeout(),
            unhealthy_periods: config.auto_forget_unhealthy_periods,
        }
    }
}

impl HealthMonitorConfig {
    /// Heartbeat age after which a peer is removed. Zero disables forgetting.
    ///
    /// Saturates at `Duration::MAX` instead of overflowing.
    pub fn forget_threshold(&self) -> Duration {
        self.heartbeat_timeout
            .checked_mul(self.unhealthy_periods)
            .unwrap_or(Duration::MAX)
    }
}

/// Removes peers that stopped heartbeating.
///
/// Every instance runs one. Removals go through CAS and are recomputed from
/// the ring read on each attempt, so several monitors evicting the same peer
/// converge on a single removal.
pub struct HealthMonitor {
    client: Arc<RingClient>,
    instance_id: String,
    config: HealthMonitorConfig,
    running: AtomicBool,
}

impl HealthMonitor {
    pub fn new(
        client: Arc<RingClient>,
        instance_id: impl Into<String>,
        config: HealthMonitorConfig,
    ) -> Self {
        Self {
            client,
            instance_id: instance_id.into(),
            config,
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Forget unhealthy peers as of now.
    pub async fn forget_unhealthy(&self) -> Result<Vec<String>> {
        self.forget_unhealthy_at(Utc::now()).await
    }

    /// Forget peers whose heartbeat is older than the threshold at `now`.
    ///
    /// Returns the IDs removed by this call. The own instance is never
    /// removed, whatever its timestamp.
    pub async fn forget_unhealthy_at(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let threshold = self.config.forget_threshold();
        if threshold.is_zero() {
            return Ok(Vec::new());
        }

        let mut forgotten = Vec::new();
        self.client
            .cas(|current| {
                forgotten.clear();
                let Some(mut desc) = current else {
                    return Ok(None);
                };

                forgotten = desc.find_instances_to_forget(now, threshold, Some(&self.instance_id));
                if forgotten.is_empty() {
                    return Ok(None);
                }
                for id in &forgotten {
                    desc.remove_instance(id);
                }
                Ok(Some(desc))
            })
            .await?;

        for id in &forgotten {
            tracing::warn!(
                instance_id = %id,
                forgotten_by = %self.instance_id,
                threshold_secs = threshold.as_secs(),
                "Auto-forgot unhealthy instance"
            );
        }
        Ok(forgotten)
    }

    /// Scan every period until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        self.running.store(true, Ordering::SeqCst);
        let mut interval = tokio::time::interval(self.config.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.forget_unhealthy().await {
                        tracing::warn!(error = %e, "Failed to check ring health");
                    }
                }
                _ = shutdown.cancelled() => {
                    tracing::debug!(instance_id = %self.instance_id, "Health monitor shutting down");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;

    use super::*;
    use crate::kv::InMemoryKv;
    use crate::ring::RingClientConfig;
    use ruler_core::ring::{InstanceState, RingDesc, Tokens};

    fn client() -> Arc<RingClient> {
        Arc::new(RingClient::new(
            Arc::new(InMemoryKv::new()),
            RingClientConfig {
                key: "ruler".into(),
                max_retries: 20,
                retry_delay: Duration::from_millis(1),
            },
        ))
    }

    fn config() -> HealthMonitorConfig {
        HealthMonitorConfig {
            period: Duration::from_millis(20),
            heartbeat_timeout: Duration::from_secs(60),
            unhealthy_periods: 10,
        }
    }

    async fn add(client: &RingClient, id: &str, tokens: Vec<u32>, heartbeat: DateTime<Utc>) {
        let id = id.to_string();
        client
            .cas(|current| {
                let mut desc = RingDesc::get_or_create(current);
                desc.add_instance(
                    id.clone(),
                    format!("{}:9095", id),
                    "",
                    Tokens::new(tokens.clone()),
                    InstanceState::Active,
                    heartbeat,
                );
                Ok(Some(desc))
            })
            .await
            .unwrap();
    }

    #[test]
    fn test_config_threshold() {
        assert_eq!(config().forget_threshold(), Duration::from_secs(600));

        let disabled = HealthMonitorConfig {
            heartbeat_timeout: Duration::ZERO,
            ..config()
        };
        assert!(disabled.forget_threshold().is_zero());
    }

    #[tokio::test]
    async fn test_huge_threshold_saturates() {
        let config = HealthMonitorConfig {
            heartbeat_timeout: Duration::from_secs(1 << 62),
            ..config()
        };
        assert_eq!(config.forget_threshold(), Duration::MAX);

        let client = client();
        let now = Utc::now();
        add(&client, "ruler-2", vec![1], now - ChronoDuration::days(365)).await;

        let monitor = HealthMonitor::new(client.clone(), "ruler-1", config);
        assert!(monitor.forget_unhealthy_at(now).await.unwrap().is_empty());
        assert!(client.get_or_empty().await.unwrap().contains("ruler-2"));
    }

    #[test]
    fn test_config_from_ring_config() {
        let ring = RingConfig {
            heartbeat_timeout_secs: 30,
            auto_forget_unhealthy_periods: 2,
            ..Default::default()
        };
        let config = HealthMonitorConfig::from(&ring);
        assert_eq!(config.forget_threshold(), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_forgets_stale_instance() {
        let client = client();
        let now = Utc::now();
        add(&client, "ruler-1", vec![10, 20], now).await;
        add(&client, "ruler-2", vec![30, 40], now - ChronoDuration::seconds(601)).await;

        let monitor = HealthMonitor::new(client.clone(), "ruler-1", config());
        let forgotten = monitor.forget_unhealthy_at(now).await.unwrap();
        assert_eq!(forgotten, vec!["ruler-2".to_string()]);

        let desc = client.get_or_empty().await.unwrap();
        assert!(desc.contains("ruler-1"));
        assert!(!desc.contains("ruler-2"));
    }

    #[tokio::test]
    async fn test_threshold_is_exclusive() {
        let client = client();
        let now = Utc::now();
        add(&client, "ruler-2", vec![1], now - ChronoDuration::seconds(600)).await;

        let monitor = HealthMonitor::new(client.clone(), "ruler-1", config());
        assert!(monitor.forget_unhealthy_at(now).await.unwrap().is_empty());
        assert!(client.get_or_empty().await.unwrap().contains("ruler-2"));
    }

    #[tokio::test]
    async fn test_unhealthy_but_recent_is_kept() {
        let client = client();
        let now = Utc::now();
        add(&client, "ruler-2", vec![1], now - ChronoDuration::seconds(120)).await;

        let monitor = HealthMonitor::new(client.clone(), "ruler-1", config());
        assert!(monitor.forget_unhealthy_at(now).await.unwrap().is_empty());

        let desc = client.get_or_empty().await.unwrap();
        let instance = desc.get("ruler-2").unwrap();
        assert!(!instance.is_heartbeat_healthy(Duration::from_secs(60), now));
    }

    #[tokio::test]
    async fn test_never_forgets_itself() {
        let client = client();
        let now = Utc::now();
        add(&client, "ruler-1", vec![1], now - ChronoDuration::hours(2)).await;

        let monitor = HealthMonitor::new(client.clone(), "ruler-1", config());
        assert!(monitor.forget_unhealthy_at(now).await.unwrap().is_empty());
        assert!(client.get_or_empty().await.unwrap().contains("ruler-1"));
    }

    #[tokio::test]
    async fn test_disabled_when_threshold_zero() {
        let client = client();
        let now = Utc::now();
        add(&client, "ruler-2", vec![1], now - ChronoDuration::days(1)).await;

        let monitor = HealthMonitor::new(
            client.clone(),
            "ruler-1",
            HealthMonitorConfig {
                unhealthy_periods: 0,
                ..config()
            },
        );
        assert!(monitor.forget_unhealthy_at(now).await.unwrap().is_empty());
        assert!(client.get_or_empty().await.unwrap().contains("ruler-2"));
    }

    #[tokio::test]
    async fn test_empty_ring_is_not_written() {
        let kv = Arc::new(InMemoryKv::new());
        let client = Arc::new(RingClient::new(kv.clone(), RingClientConfig::default()));

        let monitor = HealthMonitor::new(client, "ruler-1", config());
        assert!(monitor.forget_unhealthy().await.unwrap().is_empty());
        assert_eq!(kv.commits(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_monitors_converge() {
        let client = client();
        let now = Utc::now();
        for i in 1..=3 {
            add(&client, &format!("ruler-{}", i), vec![i], now).await;
        }
        add(&client, "stale", vec![99], now - ChronoDuration::hours(1)).await;

        let monitors: Vec<HealthMonitor> = (1..=3)
            .map(|i| HealthMonitor::new(client.clone(), format!("ruler-{}", i), config()))
            .collect();
        let results =
            futures::future::join_all(monitors.iter().map(|m| m.forget_unhealthy_at(now))).await;

        let removed: usize = results.into_iter().map(|r| r.unwrap().len()).sum();
        assert_eq!(removed, 1);

        let desc = client.get_or_empty().await.unwrap();
        assert_eq!(desc.len(), 3);
        assert!(!desc.contains("stale"));
    }

    #[tokio::test]
    async fn test_run_until_cancelled() {
        let client = client();
        add(
            &client,
            "stale",
            vec![1],
            Utc::now() - ChronoDuration::hours(1),
        )
        .await;

        let monitor = Arc::new(HealthMonitor::new(client.clone(), "ruler-1", config()));
        let shutdown = CancellationToken::new();
        let handle = {
            let monitor = monitor.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { monitor.run(shutdown).await })
        };

        crate::testing::poll(Duration::from_secs(2), false, || {
            let client = client.clone();
            async move { client.get_or_empty().await.unwrap().contains("stale") }
        })
        .await;
        assert!(monitor.is_running());

        shutdown.cancel();
        handle.await.unwrap();
        assert!(!monitor.is_running());
    }
}
