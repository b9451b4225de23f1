use serde::Serialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::rate_limit_config::Quota;
use crate::rate_limiter::Decision;

/// Outward-facing record of one rate limit decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitResponse {
    pub allowed: bool,
    pub remaining: u64,
    pub reset_time: u64,
    pub window_start: u64,
    pub client_id: String,
    pub region: String,
    pub request_id: String,
}

/// Attaches correlation metadata to a [`Decision`] without touching its fields.
pub struct DecisionResponseBuilder;

impl DecisionResponseBuilder {
    pub fn build(decision: &Decision, request_id: &str, region: &str) -> RateLimitResponse {
        RateLimitResponse {
            allowed: decision.allowed,
            remaining: decision.remaining,
            reset_time: decision.reset_time,
            window_start: decision.window_start,
            client_id: decision.key.clone(),
            region: region.to_string(),
            request_id: request_id.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub store: String,
    pub store_connected: bool,
}

impl HealthResponse {
    pub fn healthy(store: &str) -> Self {
        Self::with_status("healthy", store, true)
    }

    pub fn unhealthy(store: &str) -> Self {
        Self::with_status("unhealthy", store, false)
    }

    fn with_status(status: &str, store: &str, store_connected: bool) -> Self {
        Self {
            status: status.to_string(),
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            store: store.to_string(),
            store_connected,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub requests_total: u64,
    pub requests_allowed: u64,
    pub requests_denied: u64,
    pub requests_failed: u64,
    pub uptime_seconds: f64,
}

/// Non-secret view of the running configuration.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigResponse {
    pub server: ServerSection,
    pub rate_limit: RateLimitSection,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerSection {
    pub bind_addr: String,
    pub region: String,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct RateLimitSection {
    pub store: String,
    pub default_limit: i64,
    #[serde(with = "humantime_serde")]
    pub default_window: Duration,
    pub overrides: usize,
    #[serde(with = "humantime_serde")]
    pub store_timeout: Duration,
}

impl RateLimitSection {
    pub fn new(store: &str, default_quota: Quota, overrides: usize, store_timeout: Duration) -> Self {
        Self {
            store: store.to_string(),
            default_limit: default_quota.limit,
            default_window: default_quota.window,
            overrides,
            store_timeout,
        }
    }
}
