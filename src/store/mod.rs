//! Shared state store abstraction.
//!
//! The rate limiting engine never mutates per-key state itself. Every decision
//! is delegated to a single compound operation on the store which prunes
//! expired entries, counts what is left, conditionally records the candidate
//! entry and refreshes the key's expiry, all without interleaving from other
//! callers of the same key.

pub mod memory;
pub mod redis_store;

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub use memory::InMemoryStore;
pub use redis_store::RedisStore;

/// Failures reported by a store backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Connection failure, timeout, or the store is down.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store no longer knows the registered procedure (restart or flush).
    #[error("procedure not registered")]
    ProcedureMissing,

    /// The reply could not be read as a list of integers.
    #[error("malformed store reply: {0}")]
    MalformedReply(String),
}

/// Identifier of the compound operation once loaded into the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcedureHandle(String);

impl ProcedureHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProcedureHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Arguments of one prune + count + conditional add + expire operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlideOp {
    /// Rate limit key; backends may namespace it.
    pub key: String,
    /// Entries with a score at or below this value are expired.
    pub cutoff_score: u64,
    /// Score recorded for the candidate entry when admitted.
    pub candidate_score: u64,
    /// Unique member so same-millisecond entries never overwrite each other.
    pub candidate_token: String,
    pub limit: u64,
    /// Expiry set on the key after an admission.
    pub ttl: Duration,
}

impl SlideOp {
    pub fn ttl_millis(&self) -> u64 {
        u64::try_from(self.ttl.as_millis()).unwrap_or(u64::MAX)
    }
}

/// A store capable of running the sliding window compound operation atomically
/// per key.
#[async_trait]
pub trait SlidingWindowStore: Send + Sync {
    /// Load the compound operation and return its handle. Must be idempotent.
    async fn register_procedure(&self) -> Result<ProcedureHandle, StoreError>;

    /// Run the compound operation.
    ///
    /// Returns the raw reply, expected to be `[admitted, remaining_after]`.
    /// Validating its shape is left to the caller.
    async fn slide_and_count(
        &self,
        procedure: &ProcedureHandle,
        op: &SlideOp,
    ) -> Result<Vec<i64>, StoreError>;

    /// Round-trip check used by health reporting.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Short backend name for logs and the admin config endpoint.
    fn backend_name(&self) -> &'static str;
}
