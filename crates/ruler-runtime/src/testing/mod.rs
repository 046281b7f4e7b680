//! Helpers for tests that drive rings through an in-memory store.

use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::kv::InMemoryKv;
use crate::ring::{RingClient, RingClientConfig};

/// Interval between checks in [`poll`].
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Call `f` until it returns `expected`, panicking after `timeout`.
pub async fn poll<T, F, Fut>(timeout: Duration, expected: T, mut f: F)
where
    T: PartialEq + Debug,
    F: FnMut() -> Fut,
    Fut: Future<Output = T>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let actual = f().await;
        if actual == expected {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!(
                "condition not met after {:?}: expected {:?}, got {:?}",
                timeout, expected, actual
            );
        }
        tokio::time::sleep(DEFAULT_POLL_INTERVAL).await;
    }
}

/// Tokens registered for `instance_id`, zero if absent or unreadable.
pub async fn num_tokens(client: &RingClient, instance_id: &str) -> usize {
    client
        .get()
        .await
        .ok()
        .flatten()
        .map(|desc| desc.num_tokens(instance_id))
        .unwrap_or(0)
}

/// Ring client over a fresh in-memory store with fast retries.
pub fn in_memory_client(key: &str) -> (Arc<InMemoryKv>, Arc<RingClient>) {
    let kv = Arc::new(InMemoryKv::new());
    let client = Arc::new(RingClient::new(
        kv.clone(),
        RingClientConfig {
            key: key.to_string(),
            max_retries: 50,
            retry_delay: Duration::from_millis(1),
        },
    ));
    (kv, client)
}
