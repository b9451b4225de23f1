use humantime_serde::re::humantime;
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

use crate::error::{ThrottlerError, ThrottlerResult};

static OVERRIDE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?P<key>[^=\s]+)\s*=\s*(?P<limit>\d+)\s*/\s*(?P<window>[0-9a-zA-Z ]+?)\s*$")
        .expect("override pattern is valid")
});

/// Requests allowed per window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    pub limit: i64,
    pub window: Duration,
}

impl Quota {
    pub fn new(limit: i64, window: Duration) -> Self {
        Self { limit, window }
    }

    /// Validate quota parameters
    pub fn validate(&self) -> ThrottlerResult<()> {
        if self.limit < 0 {
            return Err(ThrottlerError::ConfigurationError(format!(
                "Limit must not be negative, got {}",
                self.limit
            )));
        }
        if self.window.is_zero() {
            return Err(ThrottlerError::ConfigurationError(
                "Window size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Default quota plus per-key overrides.
#[derive(Debug, Clone)]
pub struct QuotaPolicy {
    pub default_quota: Quota,
    pub overrides: HashMap<String, Quota>,
}

impl QuotaPolicy {
    pub fn new(default_quota: Quota) -> Self {
        Self {
            default_quota,
            overrides: HashMap::new(),
        }
    }

    /// Quota for a specific key, falling back to the default
    pub fn quota_for(&self, key: &str) -> Quota {
        self.overrides.get(key).copied().unwrap_or(self.default_quota)
    }

    /// Add or replace an override
    pub fn set_override(&mut self, key: impl Into<String>, quota: Quota) -> ThrottlerResult<()> {
        quota.validate()?;
        self.overrides.insert(key.into(), quota);
        Ok(())
    }

    /// Parse overrides of the form `key=limit/window[,key=limit/window...]`,
    /// e.g. `partner-a=1000/1m, free-tier=10/30s`.
    pub fn with_overrides(mut self, spec: &str) -> ThrottlerResult<Self> {
        for entry in spec.split(',').filter(|s| !s.trim().is_empty()) {
            let caps = OVERRIDE_PATTERN.captures(entry).ok_or_else(|| {
                ThrottlerError::ConfigurationError(format!(
                    "Invalid quota override '{}', expected key=limit/window",
                    entry.trim()
                ))
            })?;

            let limit: i64 = caps["limit"].parse().map_err(|_| {
                ThrottlerError::ConfigurationError(format!(
                    "Invalid limit in quota override '{}'",
                    entry.trim()
                ))
            })?;
            let window = humantime::parse_duration(&caps["window"]).map_err(|e| {
                ThrottlerError::ConfigurationError(format!(
                    "Invalid window in quota override '{}': {}",
                    entry.trim(),
                    e
                ))
            })?;

            self.set_override(&caps["key"], Quota::new(limit, window))?;
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_policy() -> QuotaPolicy {
        QuotaPolicy::new(Quota::new(100, Duration::from_secs(60)))
    }

    #[test]
    fn test_falls_back_to_default() {
        let policy = default_policy();
        assert_eq!(policy.quota_for("anyone"), Quota::new(100, Duration::from_secs(60)));
    }

    #[test]
    fn test_parse_overrides() {
        let policy = default_policy()
            .with_overrides("partner-a=1000/1m, free-tier = 10 / 30s,blocked=0/1s")
            .unwrap();

        assert_eq!(policy.quota_for("partner-a"), Quota::new(1000, Duration::from_secs(60)));
        assert_eq!(policy.quota_for("free-tier"), Quota::new(10, Duration::from_secs(30)));
        assert_eq!(policy.quota_for("blocked").limit, 0);
        assert_eq!(policy.quota_for("other").limit, 100);
    }

    #[test]
    fn test_empty_overrides() {
        let policy = default_policy().with_overrides("").unwrap();
        assert!(policy.overrides.is_empty());
    }

    #[test]
    fn test_rejects_malformed_override() {
        assert!(default_policy().with_overrides("no-separator").is_err());
        assert!(default_policy().with_overrides("k=ten/1m").is_err());
        assert!(default_policy().with_overrides("k=10/forever").is_err());
        assert!(default_policy().with_overrides("k=10/0s").is_err());
    }

    #[test]
    fn test_validate_quota() {
        assert!(Quota::new(0, Duration::from_secs(1)).validate().is_ok());
        assert!(Quota::new(-1, Duration::from_secs(1)).validate().is_err());
        assert!(Quota::new(5, Duration::ZERO).validate().is_err());
    }
}
