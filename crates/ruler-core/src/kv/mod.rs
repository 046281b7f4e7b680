//! Boundary to the replicated key-value store holding the ring.
//!
//! The store is treated as an eventually consistent blob store with a single
//! conditional write. Read-modify-write with retries lives on top of this
//! trait, in the runtime's ring client.

use std::future::Future;
use std::pin::Pin;

use crate::error::Result;

/// A stored value with the version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    /// Store-assigned version, bumped on every committed write.
    pub version: u64,
    /// Opaque value.
    pub value: Vec<u8>,
}

/// Outcome of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// The write was applied and produced this version.
    Committed { version: u64 },
    /// The key changed since it was read; nothing was written.
    Conflict,
}

impl CasOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed { .. })
    }
}

/// CAS-capable key-value store.
///
/// Implementations map network and backend failures to
/// `RulerError::StoreUnavailable`. A version conflict is not an error.
pub trait KvStore: Send + Sync {
    /// Read the current value of `key`, `None` if absent.
    fn get(&self, key: &str) -> Pin<Box<dyn Future<Output = Result<Option<Versioned>>> + Send + '_>>;

    /// Write `value` only if `key` is still at `expected_version`.
    ///
    /// `None` means the key must not exist yet.
    fn compare_and_put(
        &self,
        key: &str,
        expected_version: Option<u64>,
        value: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<CasOutcome>> + Send + '_>>;
}
