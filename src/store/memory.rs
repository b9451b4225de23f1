//! Single-process store used for local mode and tests.

use super::{ProcedureHandle, SlideOp, SlidingWindowStore, StoreError};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

/// Ordered entries of one key plus the deadline after which the whole key
/// is dropped.
#[derive(Debug, Default)]
struct KeyLog {
    entries: BTreeSet<(u64, String)>,
    expires_at: Option<u64>,
}

impl KeyLog {
    fn is_expired(&self, now: u64) -> bool {
        self.expires_at.map_or(false, |deadline| deadline <= now)
    }
}

#[derive(Debug, Default)]
struct Inner {
    keys: HashMap<String, KeyLog>,
    procedures: HashSet<ProcedureHandle>,
}

/// In-memory sliding window store.
///
/// One mutex guards every key, so compound operations are trivially
/// serialisable. Key expiry is evaluated against the candidate score of each
/// operation rather than the wall clock, which keeps injected timestamps
/// deterministic.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".to_string()))
    }

    /// Forget every registered procedure, as a restarted store would.
    pub fn flush_procedures(&self) -> Result<(), StoreError> {
        self.lock()?.procedures.clear();
        Ok(())
    }

    /// Number of entries currently stored for `key`, expired or not.
    pub fn entry_count(&self, key: &str) -> Result<usize, StoreError> {
        Ok(self.lock()?.keys.get(key).map_or(0, |log| log.entries.len()))
    }

    /// Number of keys currently held.
    pub fn key_count(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.keys.len())
    }

    /// Drop keys whose expiry deadline has passed. Returns how many were removed.
    pub fn sweep_expired(&self, now: u64) -> Result<usize, StoreError> {
        let mut inner = self.lock()?;
        let before = inner.keys.len();
        inner.keys.retain(|_, log| !log.is_expired(now));
        let removed = before - inner.keys.len();
        if removed > 0 {
            debug!(removed, remaining = inner.keys.len(), "swept idle rate limit keys");
        }
        Ok(removed)
    }
}

#[async_trait]
impl SlidingWindowStore for InMemoryStore {
    async fn register_procedure(&self) -> Result<ProcedureHandle, StoreError> {
        let mut inner = self.lock()?;
        if let Some(existing) = inner.procedures.iter().next() {
            return Ok(existing.clone());
        }
        let handle = ProcedureHandle::new(Uuid::new_v4().simple().to_string());
        inner.procedures.insert(handle.clone());
        Ok(handle)
    }

    async fn slide_and_count(
        &self,
        procedure: &ProcedureHandle,
        op: &SlideOp,
    ) -> Result<Vec<i64>, StoreError> {
        let mut inner = self.lock()?;
        if !inner.procedures.contains(procedure) {
            return Err(StoreError::ProcedureMissing);
        }

        let now = op.candidate_score;
        if inner.keys.get(&op.key).map_or(false, |log| log.is_expired(now)) {
            inner.keys.remove(&op.key);
        }

        let log = inner.keys.entry(op.key.clone()).or_default();
        // Keep only entries strictly newer than the cutoff.
        let kept = log.entries.split_off(&(op.cutoff_score.saturating_add(1), String::new()));
        log.entries = kept;

        let count = log.entries.len() as u64;
        if count >= op.limit {
            let remaining = op.limit.saturating_sub(count) as i64;
            if log.entries.is_empty() && log.expires_at.is_none() {
                inner.keys.remove(&op.key);
            }
            return Ok(vec![0, remaining]);
        }

        log.entries
            .insert((op.candidate_score, op.candidate_token.clone()));
        log.expires_at = Some(now.saturating_add(op.ttl_millis()));

        Ok(vec![1, (op.limit - count - 1) as i64])
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.lock().map(|_| ())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
