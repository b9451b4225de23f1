//! Distributed sliding window log rate limiter.

use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::{ThrottlerError, ThrottlerResult};
use crate::store::{ProcedureHandle, SlideOp, SlidingWindowStore, StoreError};

pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(3);

/// Outcome of one admission check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub allowed: bool,
    /// Always within `[0, limit]`.
    pub remaining: u64,
    /// `now - window`, epoch milliseconds.
    pub window_start: u64,
    /// `now + window`, epoch milliseconds.
    pub reset_time: u64,
    pub key: String,
}

/// Current wall clock time in epoch milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Window length in whole milliseconds, rounded up.
fn window_millis(window: Duration) -> u64 {
    let nanos = window.as_nanos().div_ceil(1_000_000);
    u64::try_from(nanos).unwrap_or(u64::MAX)
}

/// Decides admission by driving the store's compound operation.
///
/// Holds no per-key state; the only thing cached is the handle of the
/// registered procedure, which can always be re-derived from the store.
pub struct RateLimitEngine {
    store: Arc<dyn SlidingWindowStore>,
    procedure: RwLock<Option<ProcedureHandle>>,
    store_timeout: Duration,
}

impl RateLimitEngine {
    /// Create an engine that registers its procedure on first use.
    pub fn new(store: Arc<dyn SlidingWindowStore>, store_timeout: Duration) -> Self {
        Self {
            store,
            procedure: RwLock::new(None),
            store_timeout,
        }
    }

    /// Create an engine and register its procedure before returning.
    pub async fn connect(
        store: Arc<dyn SlidingWindowStore>,
        store_timeout: Duration,
    ) -> ThrottlerResult<Self> {
        let engine = Self::new(store, store_timeout);
        engine.procedure().await?;
        Ok(engine)
    }

    pub fn store(&self) -> &Arc<dyn SlidingWindowStore> {
        &self.store
    }

    pub fn store_timeout(&self) -> Duration {
        self.store_timeout
    }

    /// Check whether `key` may proceed at `now` under `limit` per `window`.
    ///
    /// When `now` is `None` the current wall clock is used. A denied request
    /// leaves the store untouched.
    pub async fn allow(
        &self,
        key: &str,
        now: Option<u64>,
        limit: i64,
        window: Duration,
    ) -> ThrottlerResult<Decision> {
        if limit < 0 {
            return Err(ThrottlerError::ConfigurationError(format!(
                "limit must not be negative, got {}",
                limit
            )));
        }
        if window.is_zero() {
            return Err(ThrottlerError::ConfigurationError(
                "window size must be greater than zero".to_string(),
            ));
        }

        let limit = limit as u64;
        let now = now.unwrap_or_else(now_millis);
        let window_ms = window_millis(window);

        let op = SlideOp {
            key: key.to_string(),
            cutoff_score: now.saturating_sub(window_ms),
            candidate_score: now,
            candidate_token: format!("{}-{}", now, Uuid::new_v4().simple()),
            limit,
            ttl: Duration::from_millis(window_ms.saturating_mul(2)),
        };

        let reply = self.run_with_reregister(&op).await?;
        let (allowed, remaining) = parse_reply(&reply, limit).map_err(|e| {
            error!(key = %key, reply = ?reply, "store returned malformed rate limit reply");
            e
        })?;

        debug!(key = %key, allowed, remaining, limit, "rate limit decision");

        Ok(Decision {
            allowed,
            remaining,
            window_start: op.cutoff_score,
            reset_time: now.saturating_add(window_ms),
            key: key.to_string(),
        })
    }

    /// Ping the store, bounded by the store timeout.
    pub async fn ping(&self) -> ThrottlerResult<()> {
        self.bounded(self.store.ping()).await?;
        Ok(())
    }

    async fn run_with_reregister(&self, op: &SlideOp) -> ThrottlerResult<Vec<i64>> {
        let handle = self.procedure().await?;
        match self.bounded(self.store.slide_and_count(&handle, op)).await {
            Err(StoreError::ProcedureMissing) => {
                warn!(procedure = %handle, "store lost the rate limit procedure, re-registering");
                let fresh = self.reregister(&handle).await?;
                match self.bounded(self.store.slide_and_count(&fresh, op)).await {
                    Ok(reply) => Ok(reply),
                    Err(StoreError::ProcedureMissing) => Err(ThrottlerError::StoreUnavailable(
                        "rate limit procedure missing after re-registration".to_string(),
                    )),
                    Err(e) => Err(e.into()),
                }
            }
            other => other.map_err(ThrottlerError::from),
        }
    }

    /// Cached procedure handle, registering it if nobody has yet.
    async fn procedure(&self) -> ThrottlerResult<ProcedureHandle> {
        if let Some(handle) = self.procedure.read().await.as_ref() {
            return Ok(handle.clone());
        }

        let mut slot = self.procedure.write().await;
        if let Some(handle) = slot.as_ref() {
            return Ok(handle.clone());
        }
        let handle = self.bounded(self.store.register_procedure()).await?;
        debug!(procedure = %handle, backend = self.store.backend_name(), "registered rate limit procedure");
        *slot = Some(handle.clone());
        Ok(handle)
    }

    /// Replace `stale` with a freshly registered handle. If another task
    /// already replaced it, reuse theirs.
    async fn reregister(&self, stale: &ProcedureHandle) -> ThrottlerResult<ProcedureHandle> {
        let mut slot = self.procedure.write().await;
        if let Some(current) = slot.as_ref() {
            if current != stale {
                return Ok(current.clone());
            }
        }
        let handle = self.bounded(self.store.register_procedure()).await?;
        *slot = Some(handle.clone());
        Ok(handle)
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.store_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Unavailable(format!(
                "store did not answer within {:?}",
                self.store_timeout
            ))),
        }
    }
}

/// Validate a `[admitted, remaining]` reply and clamp `remaining` into
/// `[0, limit]`.
fn parse_reply(reply: &[i64], limit: u64) -> ThrottlerResult<(bool, u64)> {
    let [admitted, remaining] = reply else {
        return Err(ThrottlerError::ProtocolError(format!(
            "expected two integers, got {} values",
            reply.len()
        )));
    };
    let allowed = match admitted {
        0 => false,
        1 => true,
        other => {
            return Err(ThrottlerError::ProtocolError(format!(
                "admitted flag must be 0 or 1, got {}",
                other
            )))
        }
    };
    let remaining = (*remaining).clamp(0, i64::try_from(limit).unwrap_or(i64::MAX)) as u64;
    Ok((allowed, remaining))
}
