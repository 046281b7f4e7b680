use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use ruler_core::config::RingConfig;
use ruler_core::kv::{CasOutcome, KvStore};
use ruler_core::ring::{Codec, JsonCodec, RingDesc};
use ruler_core::{Result, RulerError};

/// Ring client configuration.
#[derive(Debug, Clone)]
pub struct RingClientConfig {
    /// Key of the ring descriptor.
    pub key: String,
    /// Attempts per CAS before giving up.
    pub max_retries: u32,
    /// Base pause between attempts. Up to the same amount again is added as jitter.
    pub retry_delay: Duration,
}

impl Default for RingClientConfig {
    fn default() -> Self {
        Self {
            key: "ring".to_string(),
            max_retries: 10,
            retry_delay: Duration::from_millis(100),
        }
    }
}

impl From<&RingConfig> for RingClientConfig {
    fn from(config: &RingConfig) -> Self {
        Self {
            key: config.key.clone(),
            max_retries: config.cas_max_retries,
            retry_delay: config.cas_retry_delay(),
        }
    }
}

/// Read-modify-write access to the ring descriptor.
///
/// Every write is a compare-and-swap against the version that was read; there
/// is no blind overwrite.
pub struct RingClient {
    store: Arc<dyn KvStore>,
    codec: Arc<dyn Codec>,
    config: RingClientConfig,
}

impl RingClient {
    /// Create a client using the JSON codec.
    pub fn new(store: Arc<dyn KvStore>, config: RingClientConfig) -> Self {
        Self::with_codec(store, Arc::new(JsonCodec), config)
    }

    /// Create a client with a specific codec.
    pub fn with_codec(
        store: Arc<dyn KvStore>,
        codec: Arc<dyn Codec>,
        config: RingClientConfig,
    ) -> Self {
        Self {
            store,
            codec,
            config,
        }
    }

    /// Key of the ring descriptor.
    pub fn key(&self) -> &str {
        &self.config.key
    }

    /// Read the ring, `None` if it was never written.
    pub async fn get(&self) -> Result<Option<RingDesc>> {
        match self.store.get(&self.config.key).await? {
            Some(versioned) => Ok(Some(self.codec.decode(&versioned.value)?)),
            None => Ok(None),
        }
    }

    /// Read the ring, empty if it was never written.
    pub async fn get_or_empty(&self) -> Result<RingDesc> {
        Ok(RingDesc::get_or_create(self.get().await?))
    }

    /// Apply `mutate` to the current ring and commit the result atomically.
    ///
    /// `mutate` receives the current descriptor (`None` if absent) and returns
    /// the new one, or `None` to skip the write. It runs again on every lost
    /// race, so it must not have effects beyond computing its result. Errors
    /// from `mutate` abort without retrying.
    pub async fn cas<F>(&self, mut mutate: F) -> Result<()>
    where
        F: FnMut(Option<RingDesc>) -> Result<Option<RingDesc>> + Send,
    {
        let key = &self.config.key;

        for attempt in 1..=self.config.max_retries {
            let (version, current) = match self.store.get(key).await? {
                Some(versioned) => (
                    Some(versioned.version),
                    Some(self.codec.decode(&versioned.value)?),
                ),
                None => (None, None),
            };

            let Some(updated) = mutate(current)? else {
                return Ok(());
            };
            let value = self.codec.encode(&updated)?;

            match self.store.compare_and_put(key, version, value).await? {
                CasOutcome::Committed { version } => {
                    tracing::trace!(key = %key, version, attempt, "Ring updated");
                    return Ok(());
                }
                CasOutcome::Conflict => {
                    tracing::debug!(key = %key, attempt, "Ring CAS conflict, retrying");
                    if attempt < self.config.max_retries {
                        tokio::time::sleep(self.backoff()).await;
                    }
                }
            }
        }

        Err(RulerError::StoreUnavailable(format!(
            "CAS on key '{}' still conflicting after {} attempts",
            key, self.config.max_retries
        )))
    }

    fn backoff(&self) -> Duration {
        let base = self.config.retry_delay;
        let jitter_ms = base.as_millis() as u64;
        if jitter_ms == 0 {
            return base;
        }
        base + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::kv::InMemoryKv;
    use ruler_core::ring::{InstanceState, Tokens};

    fn client(kv: Arc<InMemoryKv>) -> RingClient {
        RingClient::new(
            kv,
            RingClientConfig {
                key: "ring".into(),
                max_retries: 5,
                retry_delay: Duration::from_millis(1),
            },
        )
    }

    fn add(id: &str, tokens: &[u32]) -> impl FnMut(Option<RingDesc>) -> Result<Option<RingDesc>> {
        let id = id.to_string();
        let tokens = Tokens::new(tokens.to_vec());
        move |current| {
            let mut desc = RingDesc::get_or_create(current);
            desc.add_instance(
                id.clone(),
                "addr",
                "",
                tokens.clone(),
                InstanceState::Active,
                Utc::now(),
            );
            Ok(Some(desc))
        }
    }

    #[tokio::test]
    async fn test_cas_creates_ring_lazily() {
        let kv = Arc::new(InMemoryKv::new());
        let client = client(kv.clone());

        assert!(client.get().await.unwrap().is_none());
        assert!(client.get_or_empty().await.unwrap().is_empty());

        client.cas(add("a", &[1, 2])).await.unwrap();
        let desc = client.get().await.unwrap().unwrap();
        assert_eq!(desc.num_tokens("a"), 2);
        assert_eq!(kv.commits(), 1);
    }

    #[tokio::test]
    async fn test_cas_skips_write_when_mutate_returns_none() {
        let kv = Arc::new(InMemoryKv::new());
        let client = client(kv.clone());

        client.cas(|_| Ok(None)).await.unwrap();
        assert_eq!(kv.commits(), 0);
        assert!(client.get().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cas_retries_on_conflict() {
        let kv = Arc::new(InMemoryKv::new());
        let client = client(kv.clone());
        kv.conflict_next(3);

        let mut calls = 0;
        client
            .cas(|current| {
                calls += 1;
                add("a", &[1])(current)
            })
            .await
            .unwrap();

        assert_eq!(calls, 4);
        assert_eq!(kv.conflicts(), 3);
        assert_eq!(client.get_or_empty().await.unwrap().num_tokens("a"), 1);
    }

    #[tokio::test]
    async fn test_cas_exhaustion_is_store_unavailable() {
        let kv = Arc::new(InMemoryKv::new());
        let client = client(kv.clone());
        kv.conflict_next(100);

        let err = client.cas(add("a", &[1])).await.unwrap_err();
        assert!(matches!(err, RulerError::StoreUnavailable(_)));
        assert_eq!(kv.conflicts(), 5);
    }

    #[tokio::test]
    async fn test_cas_surfaces_store_failure() {
        let kv = Arc::new(InMemoryKv::new());
        let client = client(kv.clone());
        kv.fail_next(1);

        let err = client.cas(add("a", &[1])).await.unwrap_err();
        assert!(matches!(err, RulerError::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn test_cas_mutate_error_aborts() {
        let kv = Arc::new(InMemoryKv::new());
        let client = client(kv.clone());

        let mut calls = 0;
        let err = client
            .cas(|_| {
                calls += 1;
                Err(RulerError::TokenCollision("no room".into()))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, RulerError::TokenCollision(_)));
        assert_eq!(calls, 1);
        assert_eq!(kv.commits(), 0);
    }

    #[tokio::test]
    async fn test_cas_rejects_corrupt_ring() {
        let kv = Arc::new(InMemoryKv::new());
        kv.compare_and_put("ring", None, b"{garbage".to_vec())
            .await
            .unwrap();
        let client = client(kv);

        let err = client.cas(add("a", &[1])).await.unwrap_err();
        assert!(err.is_store_error());
    }

    #[tokio::test]
    async fn test_concurrent_writers_converge() {
        let kv = Arc::new(InMemoryKv::new());
        let client = Arc::new(RingClient::new(
            kv.clone(),
            RingClientConfig {
                key: "ring".into(),
                max_retries: 50,
                retry_delay: Duration::from_millis(1),
            },
        ));

        let writers = (0..8u32).map(|i| {
            let client = client.clone();
            tokio::spawn(async move {
                let id = format!("ruler-{}", i);
                client.cas(add(&id, &[i * 10, i * 10 + 1])).await
            })
        });
        for result in futures::future::join_all(writers).await {
            result.unwrap().unwrap();
        }

        let desc = client.get_or_empty().await.unwrap();
        assert_eq!(desc.len(), 8);
        assert!(desc.token_conflicts().is_empty());
    }
}
