use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::RwLock;

use ruler_core::kv::{CasOutcome, KvStore, Versioned};
use ruler_core::{Result, RulerError};

/// In-process KV store with linearizable compare-and-put.
///
/// Shared by every instance of a single-process fleet and by tests. Failures
/// and conflicts can be injected to exercise retry paths.
#[derive(Debug, Default)]
pub struct InMemoryKv {
    data: RwLock<HashMap<String, Versioned>>,
    next_version: AtomicU64,
    inject_failures: AtomicU32,
    inject_conflicts: AtomicU32,
    read_delay_ms: AtomicU64,
    write_delay_ms: AtomicU64,
    commits: AtomicU64,
    conflicts: AtomicU64,
}

impl InMemoryKv {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` operations fail with `StoreUnavailable`.
    pub fn fail_next(&self, n: u32) {
        self.inject_failures.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` conditional writes report a conflict.
    pub fn conflict_next(&self, n: u32) {
        self.inject_conflicts.store(n, Ordering::SeqCst);
    }

    /// Delay every read by `delay`.
    pub fn delay_reads(&self, delay: Duration) {
        self.read_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Delay every conditional write by `delay`, before it takes effect.
    pub fn delay_writes(&self, delay: Duration) {
        self.write_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Committed writes so far.
    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    /// Rejected conditional writes so far.
    pub fn conflicts(&self) -> u64 {
        self.conflicts.load(Ordering::SeqCst)
    }

    /// Remove a key unconditionally.
    pub async fn delete(&self, key: &str) -> bool {
        self.data.write().await.remove(key).is_some()
    }

    fn take_injected(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn check_failure(&self) -> Result<()> {
        if Self::take_injected(&self.inject_failures) {
            return Err(RulerError::StoreUnavailable(
                "in-memory store: injected failure".into(),
            ));
        }
        Ok(())
    }

    async fn sleep_for(delay_ms: &AtomicU64) {
        let ms = delay_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    async fn get_inner(&self, key: &str) -> Result<Option<Versioned>> {
        Self::sleep_for(&self.read_delay_ms).await;
        self.check_failure()?;
        Ok(self.data.read().await.get(key).cloned())
    }

    async fn compare_and_put_inner(
        &self,
        key: &str,
        expected_version: Option<u64>,
        value: Vec<u8>,
    ) -> Result<CasOutcome> {
        Self::sleep_for(&self.write_delay_ms).await;
        self.check_failure()?;

        let mut data = self.data.write().await;
        let current_version = data.get(key).map(|v| v.version);
        if current_version != expected_version || Self::take_injected(&self.inject_conflicts) {
            self.conflicts.fetch_add(1, Ordering::SeqCst);
            return Ok(CasOutcome::Conflict);
        }

        let version = self.next_version.fetch_add(1, Ordering::SeqCst) + 1;
        data.insert(key.to_string(), Versioned { version, value });
        self.commits.fetch_add(1, Ordering::SeqCst);

        Ok(CasOutcome::Committed { version })
    }
}

impl KvStore for InMemoryKv {
    fn get(&self, key: &str) -> Pin<Box<dyn Future<Output = Result<Option<Versioned>>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move { self.get_inner(&key).await })
    }

    fn compare_and_put(
        &self,
        key: &str,
        expected_version: Option<u64>,
        value: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<CasOutcome>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move { self.compare_and_put_inner(&key, expected_version, value).await })
    }
}
