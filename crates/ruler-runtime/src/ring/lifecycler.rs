use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use ruler_core::config::{InstanceConfig, RingConfig};
use ruler_core::ring::{generate_tokens, InstanceState, RingDesc, Tokens};
use ruler_core::{Result, RulerError};

use super::client::RingClient;

/// Lifecycler configuration.
#[derive(Debug, Clone)]
pub struct LifecyclerConfig {
    /// ID of the instance in the ring.
    pub instance_id: String,
    /// Advertised address.
    pub addr: String,
    /// Availability zone.
    pub zone: String,
    /// Tokens to claim.
    pub num_tokens: usize,
    /// Interval between heartbeats.
    pub heartbeat_period: Duration,
    /// Bound on the deregistration write.
    pub leave_timeout: Duration,
    /// Remove the record on stop instead of leaving it marked LEAVING.
    pub unregister_on_shutdown: bool,
}

impl Default for LifecyclerConfig {
    fn default() -> Self {
        Self {
            instance_id: "localhost".to_string(),
            addr: "127.0.0.1:9095".to_string(),
            zone: String::new(),
            num_tokens: 128,
            heartbeat_period: Duration::from_secs(5),
            leave_timeout: Duration::from_secs(5),
            unregister_on_shutdown: true,
        }
    }
}

impl LifecyclerConfig {
    /// Build from the file configuration.
    pub fn from_config(instance_id: impl Into<String>, instance: &InstanceConfig, ring: &RingConfig) -> Self {
        Self {
            instance_id: instance_id.into(),
            addr: instance.addr.clone(),
            zone: instance.zone.clone(),
            num_tokens: ring.num_tokens,
            heartbeat_period: ring.heartbeat_period(),
            leave_timeout: ring.leave_timeout(),
            unregister_on_shutdown: ring.unregister_on_shutdown,
        }
    }
}

/// Manages one instance's membership in the ring.
///
/// The lifecycler is the only writer of its own instance record. It joins on
/// [`start`](Self::start), heartbeats in the background, and leaves on
/// [`stop`](Self::stop). Peers may delete the record if heartbeats stop; the
/// next heartbeat then registers the instance again.
///
/// `start` and `stop` are serialized: a `stop` issued while `start` is still
/// joining waits for the join and then leaves.
pub struct Lifecycler {
    inner: Arc<Inner>,
    started: AtomicBool,
    // Held for the whole of `start` and `stop`.
    task: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

struct Inner {
    client: Arc<RingClient>,
    config: LifecyclerConfig,
    state_tx: watch::Sender<InstanceState>,
    tokens_tx: watch::Sender<Tokens>,
}

impl Lifecycler {
    /// Create a lifecycler in the PENDING state.
    pub fn new(client: Arc<RingClient>, config: LifecyclerConfig) -> Self {
        let (state_tx, _) = watch::channel(InstanceState::Pending);
        let (tokens_tx, _) = watch::channel(Tokens::default());
        Self {
            inner: Arc::new(Inner {
                client,
                config,
                state_tx,
                tokens_tx,
            }),
            started: AtomicBool::new(false),
            task: Mutex::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.inner.config.instance_id
    }

    /// Current state, without blocking.
    pub fn state(&self) -> InstanceState {
        *self.inner.state_tx.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<InstanceState> {
        self.inner.state_tx.subscribe()
    }

    /// Tokens owned by this instance, ascending. Empty before registration.
    pub fn tokens(&self) -> Tokens {
        self.inner.tokens_tx.borrow().clone()
    }

    /// Register in the ring and start heartbeating.
    ///
    /// Returns once the instance is ACTIVE in the ring. A store failure leaves
    /// the lifecycler FAILED and is returned to the caller.
    pub async fn start(&self) -> Result<()> {
        let mut task = self.task.lock().await;
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(RulerError::InvalidState(format!(
                "lifecycler for {} already started",
                self.instance_id()
            )));
        }

        tracing::info!(
            instance_id = %self.instance_id(),
            num_tokens = self.inner.config.num_tokens,
            "Joining the ring"
        );

        if let Err(e) = self.join().await {
            self.inner.set_state(InstanceState::Failed);
            tracing::error!(instance_id = %self.instance_id(), error = %e, "Failed to join the ring");
            return Err(e);
        }

        let inner = self.inner.clone();
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move { inner.run_heartbeat(shutdown).await });
        *task = Some(handle);

        tracing::info!(
            instance_id = %self.instance_id(),
            tokens = self.tokens().len(),
            "Instance is ACTIVE in the ring"
        );
        Ok(())
    }

    async fn join(&self) -> Result<()> {
        self.inner.register(InstanceState::Joining).await?;
        self.inner.set_state(InstanceState::Joining);

        self.inner.update_own_state(InstanceState::Active).await?;
        self.inner.set_state(InstanceState::Active);
        Ok(())
    }

    /// Send one heartbeat now.
    pub async fn heartbeat(&self) -> Result<()> {
        self.inner.heartbeat().await
    }

    /// Stop heartbeating and leave the ring.
    ///
    /// The final write is bounded by the leave timeout. If it fails the
    /// lifecycler ends FAILED, the error is returned, and the record is left
    /// for peers to forget.
    pub async fn stop(&self) -> Result<()> {
        let mut task = self.task.lock().await;
        let state = self.state();
        if state.is_terminal() {
            return Ok(());
        }

        self.shutdown.cancel();
        if let Some(handle) = task.take() {
            if let Err(e) = handle.await {
                tracing::warn!(instance_id = %self.instance_id(), error = %e, "Heartbeat task ended abnormally");
            }
        }

        if state == InstanceState::Pending {
            self.started.store(true, Ordering::SeqCst);
            self.inner.set_state(InstanceState::Left);
            return Ok(());
        }

        self.inner.set_state(InstanceState::Leaving);
        tracing::info!(instance_id = %self.instance_id(), "Leaving the ring");

        let timeout = self.inner.config.leave_timeout;
        let result = match tokio::time::timeout(timeout, self.inner.leave()).await {
            Ok(result) => result,
            Err(_) => Err(RulerError::Timeout(timeout)),
        };

        match result {
            Ok(()) => {
                self.inner.set_state(InstanceState::Left);
                tracing::info!(instance_id = %self.instance_id(), "Left the ring");
                Ok(())
            }
            Err(e) => {
                self.inner.set_state(InstanceState::Failed);
                tracing::warn!(
                    instance_id = %self.instance_id(),
                    error = %e,
                    "Failed to leave the ring, peers will forget this instance"
                );
                Err(e)
            }
        }
    }
}

impl Drop for Lifecycler {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl Inner {
    fn id(&self) -> &str {
        &self.config.instance_id
    }

    fn set_state(&self, state: InstanceState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            tracing::debug!(instance_id = %self.id(), from = %previous, to = %state, "State changed");
        }
    }

    /// Insert or refresh the own record with `state`.
    ///
    /// Tokens already held (in memory, or in an existing record for this ID)
    /// are kept unless someone else claimed them since; the rest are
    /// generated against the ring read inside the CAS.
    async fn register(&self, state: InstanceState) -> Result<()> {
        let held = self.tokens_tx.borrow().clone();
        let mut registered = Tokens::default();

        self.client
            .cas(|current| {
                let mut desc = RingDesc::get_or_create(current);
                let held = if held.is_empty() {
                    desc.get(self.id())
                        .map(|i| i.tokens.clone())
                        .unwrap_or_default()
                } else {
                    held.clone()
                };

                let taken = desc.taken_tokens(Some(self.id()));
                let tokens = fill_tokens(&held, &taken, self.config.num_tokens)?;

                desc.add_instance(
                    self.id(),
                    self.config.addr.clone(),
                    self.config.zone.clone(),
                    tokens.clone(),
                    state,
                    Utc::now(),
                );
                registered = tokens;
                Ok(Some(desc))
            })
            .await?;

        self.tokens_tx.send_replace(registered);
        Ok(())
    }

    /// Set the own record's state and refresh its timestamp.
    async fn update_own_state(&self, state: InstanceState) -> Result<()> {
        let mut missing = false;

        self.client
            .cas(|current| {
                let mut desc = RingDesc::get_or_create(current);
                missing = false;
                match desc.get_mut(self.id()) {
                    Some(instance) => {
                        instance.state = state;
                        instance.timestamp = Utc::now().timestamp();
                    }
                    None => {
                        missing = true;
                        return Ok(None);
                    }
                }
                Ok(Some(desc))
            })
            .await?;

        if missing {
            tracing::warn!(instance_id = %self.id(), "Instance missing from the ring, registering again");
            self.register(state).await?;
        }
        Ok(())
    }

    async fn heartbeat(&self) -> Result<()> {
        let state = *self.state_tx.borrow();
        self.update_own_state(state).await
    }

    async fn leave(&self) -> Result<()> {
        if !self.config.unregister_on_shutdown {
            return self.update_own_state(InstanceState::Leaving).await;
        }

        self.client
            .cas(|current| {
                let Some(mut desc) = current else {
                    return Ok(None);
                };
                if desc.remove_instance(self.id()).is_none() {
                    return Ok(None);
                }
                Ok(Some(desc))
            })
            .await
    }

    async fn run_heartbeat(&self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.heartbeat_period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; registration just wrote the timestamp.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.heartbeat().await {
                        tracing::warn!(instance_id = %self.id(), error = %e, "Failed to send heartbeat");
                    }
                }
                _ = shutdown.cancelled() => {
                    tracing::debug!(instance_id = %self.id(), "Heartbeat loop shutting down");
                    break;
                }
            }
        }
    }
}

/// Keep the held tokens nobody else claimed and top up to `count`.
fn fill_tokens(held: &Tokens, taken: &HashSet<u32>, count: usize) -> Result<Tokens> {
    let mut kept: Vec<u32> = held
        .iter()
        .copied()
        .filter(|t| !taken.contains(t))
        .take(count)
        .collect();

    if kept.len() < count {
        let mut excluded = taken.clone();
        excluded.extend(kept.iter().copied());
        let fresh = generate_tokens(count - kept.len(), &excluded)?;
        kept.extend(fresh.iter().copied());
    }

    Ok(Tokens::new(kept))
}
