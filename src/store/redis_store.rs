//! Redis-backed sliding window store.
//!
//! Each rate limit key maps to a sorted set whose scores are admission
//! timestamps in milliseconds. The compound operation runs as a Lua script,
//! which Redis executes without interleaving other commands.

use super::{ProcedureHandle, SlideOp, SlidingWindowStore, StoreError};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, ErrorKind, RedisError};
use tracing::{debug, info};

const SLIDE_AND_COUNT_SCRIPT: &str = r#"
local key = KEYS[1]
local cutoff = tonumber(ARGV[1])
local score = tonumber(ARGV[2])
local token = ARGV[3]
local limit = tonumber(ARGV[4])
local ttl = tonumber(ARGV[5])

redis.call('ZREMRANGEBYSCORE', key, '-inf', cutoff)
local count = redis.call('ZCARD', key)
if count >= limit then
    local remaining = limit - count
    if remaining < 0 then
        remaining = 0
    end
    return {0, remaining}
end

redis.call('ZADD', key, score, token)
redis.call('PEXPIRE', key, ttl)
return {1, limit - (count + 1)}
"#;

/// Process-wide Redis handle. Cloning is cheap; every clone multiplexes over
/// the same connection and reconnects on its own after drops.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    namespace: String,
}

impl RedisStore {
    pub async fn connect(redis_url: &str, namespace: &str) -> Result<Self, StoreError> {
        let client = Client::open(redis_url).map_err(|e| {
            StoreError::Unavailable(format!("Failed to create Redis client: {}", e))
        })?;
        let connection = ConnectionManager::new(client).await.map_err(|e| {
            StoreError::Unavailable(format!("Failed to connect to Redis: {}", e))
        })?;

        info!(namespace = %namespace, "connected to Redis");

        Ok(Self {
            connection,
            namespace: namespace.to_string(),
        })
    }

    fn namespaced_key(&self, key: &str) -> String {
        if self.namespace.is_empty() {
            key.to_string()
        } else {
            format!("{}:{}", self.namespace, key)
        }
    }

    /// Delete every entry recorded for `key`.
    pub async fn clear(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        redis::cmd("DEL")
            .arg(self.namespaced_key(key))
            .query_async::<_, i64>(&mut conn)
            .await
            .map(|_| ())
            .map_err(classify)
    }

    /// Number of entries stored for `key`, expired or not.
    pub async fn entry_count(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.connection.clone();
        redis::cmd("ZCARD")
            .arg(self.namespaced_key(key))
            .query_async::<_, u64>(&mut conn)
            .await
            .map_err(classify)
    }

    /// Remaining time to live of a key in milliseconds; negative when the key
    /// is missing or has no expiry.
    pub async fn pttl(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.connection.clone();
        redis::cmd("PTTL")
            .arg(self.namespaced_key(key))
            .query_async::<_, i64>(&mut conn)
            .await
            .map_err(classify)
    }

    /// Drop every cached script, as a Redis restart would.
    pub async fn flush_procedures(&self) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        redis::cmd("SCRIPT")
            .arg("FLUSH")
            .query_async::<_, String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(classify)
    }
}

fn classify(err: RedisError) -> StoreError {
    match err.kind() {
        ErrorKind::NoScriptError => StoreError::ProcedureMissing,
        ErrorKind::TypeError => StoreError::MalformedReply(err.to_string()),
        _ => StoreError::Unavailable(err.to_string()),
    }
}

#[async_trait]
impl SlidingWindowStore for RedisStore {
    async fn register_procedure(&self) -> Result<ProcedureHandle, StoreError> {
        let mut conn = self.connection.clone();
        let sha: String = redis::cmd("SCRIPT")
            .arg("LOAD")
            .arg(SLIDE_AND_COUNT_SCRIPT)
            .query_async(&mut conn)
            .await
            .map_err(classify)?;

        debug!(sha = %sha, "loaded sliding window script");
        Ok(ProcedureHandle::new(sha))
    }

    async fn slide_and_count(
        &self,
        procedure: &ProcedureHandle,
        op: &SlideOp,
    ) -> Result<Vec<i64>, StoreError> {
        let mut conn = self.connection.clone();
        redis::cmd("EVALSHA")
            .arg(procedure.as_str())
            .arg(1)
            .arg(self.namespaced_key(&op.key))
            .arg(op.cutoff_score)
            .arg(op.candidate_score)
            .arg(&op.candidate_token)
            .arg(op.limit)
            .arg(op.ttl_millis())
            .query_async::<_, Vec<i64>>(&mut conn)
            .await
            .map_err(classify)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(classify)
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
