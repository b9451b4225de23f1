use envconfig::Envconfig;
use humantime_serde::re::humantime;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use validator::Validate;

use crate::client_identifier::ForwardedHop;
use crate::config_validator::ConfigValidator;
use crate::error::{ThrottlerError, ThrottlerResult};
use crate::rate_limit_config::{Quota, QuotaPolicy};

/// Where rate limit state lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// Shared Redis; required when more than one instance serves traffic.
    Redis,
    /// Process-local state, for development and single-instance deployments.
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(StoreBackend::Redis),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(format!("unknown store backend '{}'", other)),
        }
    }
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreBackend::Redis => f.write_str("redis"),
            StoreBackend::Memory => f.write_str("memory"),
        }
    }
}

#[derive(Debug, Clone, Envconfig, Validate)]
pub struct Config {
    /// Server bind address
    #[envconfig(from = "BIND_ADDR", default = "0.0.0.0:8080")]
    pub bind_addr: SocketAddr,

    /// `redis` or `memory`
    #[envconfig(from = "STORE_BACKEND", default = "redis")]
    pub store_backend: StoreBackend,

    /// Full Redis URL; takes precedence over the host/port/password/db parts
    #[envconfig(from = "REDIS_URL")]
    pub redis_url: Option<String>,

    #[validate(length(min = 1))]
    #[envconfig(from = "REDIS_HOST", default = "localhost")]
    pub redis_host: String,

    #[validate(range(min = 1))]
    #[envconfig(from = "REDIS_PORT", default = "6379")]
    pub redis_port: u16,

    #[envconfig(from = "REDIS_PASSWORD")]
    pub redis_password: Option<String>,

    #[envconfig(from = "REDIS_DB", default = "0")]
    pub redis_db: u32,

    /// Prefix for every rate limit key written to Redis
    #[envconfig(from = "REDIS_KEY_PREFIX", default = "ratelimit")]
    pub redis_key_prefix: String,

    /// Requests allowed per window for keys without an override
    #[validate(range(min = 0))]
    #[envconfig(from = "DEFAULT_LIMIT", default = "100")]
    pub default_limit: i64,

    #[envconfig(from = "DEFAULT_WINDOW", default = "1m")]
    pub default_window: humantime::Duration,

    /// `key=limit/window` pairs separated by commas
    #[envconfig(from = "QUOTA_OVERRIDES")]
    pub quota_overrides: Option<String>,

    /// Upper bound on a single store round trip
    #[envconfig(from = "STORE_TIMEOUT", default = "3s")]
    pub store_timeout: humantime::Duration,

    #[envconfig(from = "REQUEST_TIMEOUT", default = "10s")]
    pub request_timeout: humantime::Duration,

    /// How often the in-memory store drops idle keys
    #[envconfig(from = "CLEANUP_INTERVAL", default = "5m")]
    pub cleanup_interval: humantime::Duration,

    /// Opaque region label echoed in every decision
    #[validate(length(min = 1, max = 64))]
    #[envconfig(from = "REGION", default = "us-east-1")]
    pub region: String,

    /// Zero-based hop of X-Forwarded-For used as the client address
    #[envconfig(from = "FORWARDED_HOP", default = "0")]
    pub forwarded_hop: usize,

    #[envconfig(from = "LOG_LEVEL", default = "info")]
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> ThrottlerResult<Self> {
        let config = Config::from_env_unchecked()?;
        config.check()?;
        Ok(config)
    }

    /// Parse the environment without [`Config::check`], so callers can apply
    /// overrides before validating once.
    pub fn from_env_unchecked() -> ThrottlerResult<Self> {
        Config::init_from_env().map_err(|e| ThrottlerError::ConfigurationError(e.to_string()))
    }

    /// Load configuration from a map of variable names to values, with the
    /// same defaults as [`Config::from_env`].
    pub fn from_map(vars: &HashMap<String, String>) -> ThrottlerResult<Self> {
        let config = Config::from_map_unchecked(vars)?;
        config.check()?;
        Ok(config)
    }

    pub fn from_map_unchecked(vars: &HashMap<String, String>) -> ThrottlerResult<Self> {
        Config::init_from_hashmap(vars)
            .map_err(|e| ThrottlerError::ConfigurationError(e.to_string()))
    }

    /// Validate field ranges and cross-field constraints.
    pub fn check(&self) -> ThrottlerResult<()> {
        self.validate()
            .map_err(|e| ThrottlerError::ConfigurationError(e.to_string()))?;

        ConfigValidator::validate_log_level(&self.log_level)?;
        ConfigValidator::validate_positive_duration("DEFAULT_WINDOW", *self.default_window)?;
        ConfigValidator::validate_positive_duration("STORE_TIMEOUT", *self.store_timeout)?;
        ConfigValidator::validate_positive_duration("REQUEST_TIMEOUT", *self.request_timeout)?;
        ConfigValidator::validate_positive_duration("CLEANUP_INTERVAL", *self.cleanup_interval)?;
        if self.store_backend == StoreBackend::Redis {
            ConfigValidator::validate_redis_url(&self.redis_connection_url())?;
        }
        self.quota_policy()?;
        Ok(())
    }

    /// Redis URL from `REDIS_URL` or assembled from its parts.
    pub fn redis_connection_url(&self) -> String {
        if let Some(url) = self.redis_url.as_deref().filter(|u| !u.trim().is_empty()) {
            return url.trim().to_string();
        }
        match self.redis_password.as_deref().filter(|p| !p.is_empty()) {
            Some(password) => format!(
                "redis://:{}@{}:{}/{}",
                password, self.redis_host, self.redis_port, self.redis_db
            ),
            None => format!("redis://{}:{}/{}", self.redis_host, self.redis_port, self.redis_db),
        }
    }

    pub fn default_quota(&self) -> Quota {
        Quota::new(self.default_limit, *self.default_window)
    }

    pub fn quota_policy(&self) -> ThrottlerResult<QuotaPolicy> {
        let default_quota = self.default_quota();
        default_quota.validate()?;
        let policy = QuotaPolicy::new(default_quota);
        match self.quota_overrides.as_deref() {
            Some(spec) => policy.with_overrides(spec),
            None => Ok(policy),
        }
    }

    pub fn forwarded_hop(&self) -> ForwardedHop {
        ForwardedHop::from(self.forwarded_hop)
    }

    pub fn store_timeout(&self) -> Duration {
        *self.store_timeout
    }

    pub fn request_timeout(&self) -> Duration {
        *self.request_timeout
    }

    pub fn cleanup_interval(&self) -> Duration {
        *self.cleanup_interval
    }
}
