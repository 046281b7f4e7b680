//! Ruler service runtime.
//!
//! Ties one instance's ring membership together:
//! - Lifecycler (join, heartbeat, leave)
//! - Health monitor (auto-forget of dead peers)
//! - Sharding strategy over the latest ring snapshot

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use ruler_core::config::RulerConfig;
use ruler_core::error::{Result, RulerError};
use ruler_core::kv::KvStore;
use ruler_core::ring::{hash_key, RingDesc, ShardingStrategy, TokenRange, TokenRangeStrategy};
use ruler_runtime::kv::InMemoryKv;
use ruler_runtime::ring::{
    HealthMonitor, HealthMonitorConfig, Lifecycler, LifecyclerConfig, RingClient,
    RingClientConfig,
};

/// Prelude module for common imports.
pub mod prelude {
    pub use ruler_core::config::RulerConfig;
    pub use ruler_core::error::{Result, RulerError};
    pub use ruler_core::kv::KvStore;
    pub use ruler_core::ring::{
        hash_key, InstanceState, RingDesc, ShardingStrategy, TokenRange, TokenRangeStrategy,
        Tokens,
    };
    pub use ruler_runtime::kv::InMemoryKv;

    pub use crate::{Ruler, RulerBuilder, ServiceState};
}

/// Service state of a ruler, as seen by the process owning it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceState {
    New,
    Starting,
    Running,
    Stopping,
    Terminated,
    Failed,
}

impl ServiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Terminated => "terminated",
            Self::Failed => "failed",
        }
    }

    /// Check if the service can no longer change state.
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Terminated | Self::Failed)
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A ruler instance and its ring membership.
pub struct Ruler {
    config: RulerConfig,
    instance_id: String,
    client: Arc<RingClient>,
    lifecycler: Arc<Lifecycler>,
    health: Arc<HealthMonitor>,
    strategy: Arc<dyn ShardingStrategy>,
    state_tx: watch::Sender<ServiceState>,
    shutdown: CancellationToken,
    // Held for the whole of `start` and `stop`.
    health_task: Mutex<Option<JoinHandle<()>>>,
}

impl Ruler {
    /// Create a new builder.
    pub fn builder() -> RulerBuilder {
        RulerBuilder::new()
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn config(&self) -> &RulerConfig {
        &self.config
    }

    /// Ring client shared by every component of this instance.
    pub fn client(&self) -> &Arc<RingClient> {
        &self.client
    }

    pub fn lifecycler(&self) -> &Lifecycler {
        &self.lifecycler
    }

    pub fn service_state(&self) -> ServiceState {
        *self.state_tx.borrow()
    }

    /// Watch service state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ServiceState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, state: ServiceState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            tracing::debug!(instance_id = %self.instance_id, from = %previous, to = %state, "Service state changed");
        }
    }

    /// Join the ring and start the health monitor.
    ///
    /// Returns once the instance is ACTIVE in the ring. A concurrent
    /// [`stop`](Self::stop) waits for this to finish.
    pub async fn start(&self) -> Result<()> {
        let mut health_task = self.health_task.lock().await;
        let state = self.service_state();
        if state != ServiceState::New {
            return Err(RulerError::InvalidState(format!(
                "cannot start ruler in state {}",
                state
            )));
        }
        self.set_state(ServiceState::Starting);

        if let Err(e) = self.lifecycler.start().await {
            self.set_state(ServiceState::Failed);
            return Err(e);
        }

        let health = self.health.clone();
        let shutdown = self.shutdown.child_token();
        *health_task = Some(tokio::spawn(async move {
            health.run(shutdown).await;
        }));

        self.set_state(ServiceState::Running);
        tracing::info!(
            instance_id = %self.instance_id,
            ring_key = %self.client.key(),
            tokens = self.lifecycler.tokens().len(),
            "Ruler started"
        );
        Ok(())
    }

    /// Stop the health monitor and leave the ring.
    ///
    /// Returns after deregistration was attempted. A failed deregistration
    /// leaves the service FAILED and is returned.
    pub async fn stop(&self) -> Result<()> {
        let mut health_task = self.health_task.lock().await;
        let state = self.service_state();
        if state.is_done() {
            return Ok(());
        }
        self.set_state(ServiceState::Stopping);
        tracing::info!(instance_id = %self.instance_id, "Stopping ruler");

        self.shutdown.cancel();
        if let Some(handle) = health_task.take() {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Health monitor task ended abnormally");
            }
        }

        match self.lifecycler.stop().await {
            Ok(()) => {
                self.set_state(ServiceState::Terminated);
                tracing::info!(instance_id = %self.instance_id, "Ruler stopped");
                Ok(())
            }
            Err(e) => {
                self.set_state(ServiceState::Failed);
                Err(e)
            }
        }
    }

    /// Start, wait for Ctrl-C or [`shutdown`](Self::shutdown), then stop.
    pub async fn run(&self) -> Result<()> {
        self.start().await?;

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received shutdown signal");
            }
            _ = self.shutdown.cancelled() => {
                tracing::info!("Received shutdown notification");
            }
        }

        self.stop().await
    }

    /// Request shutdown of a ruler blocked in [`run`](Self::run).
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Latest ring snapshot.
    pub async fn ring(&self) -> Result<RingDesc> {
        self.client.get_or_empty().await
    }

    /// Hash ranges this instance owns in the latest snapshot.
    pub async fn owned_ranges(&self) -> Result<Vec<TokenRange>> {
        let desc = self.ring().await?;
        Ok(self
            .strategy
            .owned_ranges(&desc, &self.instance_id, Utc::now()))
    }

    /// Check if this instance owns the workload identified by `key`.
    pub async fn owns(&self, key: &str) -> Result<bool> {
        let desc = self.ring().await?;
        Ok(self
            .strategy
            .owns(&desc, &self.instance_id, hash_key(key), Utc::now()))
    }
}

/// Builder for configuring a ruler.
pub struct RulerBuilder {
    config: Option<RulerConfig>,
    instance_id: Option<String>,
    store: Option<Arc<dyn KvStore>>,
    strategy: Option<Arc<dyn ShardingStrategy>>,
}

impl RulerBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            config: None,
            instance_id: None,
            store: None,
            strategy: None,
        }
    }

    /// Set the configuration.
    pub fn config(mut self, config: RulerConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Override the instance ID from the configuration.
    pub fn instance_id(mut self, id: impl Into<String>) -> Self {
        self.instance_id = Some(id.into());
        self
    }

    /// Set the store holding the ring. Defaults to a private in-memory store.
    pub fn store(mut self, store: Arc<dyn KvStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the sharding strategy. Defaults to [`TokenRangeStrategy`].
    pub fn strategy(mut self, strategy: Arc<dyn ShardingStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Build the ruler.
    pub fn build(self) -> Result<Ruler> {
        let config = self
            .config
            .ok_or_else(|| RulerError::Config("Configuration is required".to_string()))?;
        config.ring.validate()?;

        let instance_id = self
            .instance_id
            .or_else(|| config.instance.id.clone())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| RulerError::Config("Instance ID is required".to_string()))?;

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryKv::new()) as Arc<dyn KvStore>);
        let client = Arc::new(RingClient::new(
            store,
            RingClientConfig::from(&config.ring),
        ));

        let lifecycler = Arc::new(Lifecycler::new(
            client.clone(),
            LifecyclerConfig::from_config(&instance_id, &config.instance, &config.ring),
        ));
        let health = Arc::new(HealthMonitor::new(
            client.clone(),
            &instance_id,
            HealthMonitorConfig::from(&config.ring),
        ));
        let strategy = self.strategy.unwrap_or_else(|| {
            Arc::new(TokenRangeStrategy::new(config.ring.heartbeat_timeout()))
                as Arc<dyn ShardingStrategy>
        });

        let (state_tx, _) = watch::channel(ServiceState::New);

        Ok(Ruler {
            config,
            instance_id,
            client,
            lifecycler,
            health,
            strategy,
            state_tx,
            shutdown: CancellationToken::new(),
            health_task: Mutex::new(None),
        })
    }
}

impl Default for RulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
