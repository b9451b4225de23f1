use std::time::Duration;

use crate::error::ThrottlerError;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Checks for configuration values that field-level validation cannot express.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validates a Redis URL
    pub fn validate_redis_url(url: &str) -> Result<(), ThrottlerError> {
        if url.is_empty() {
            return Err(ThrottlerError::ConfigurationError(
                "Redis URL cannot be empty".to_string(),
            ));
        }

        if !url.starts_with("redis://") && !url.starts_with("rediss://") {
            return Err(ThrottlerError::ConfigurationError(
                "Redis URL must start with 'redis://' or 'rediss://'".to_string(),
            ));
        }

        Ok(())
    }

    /// Validates that a duration setting is non-zero
    pub fn validate_positive_duration(name: &str, value: Duration) -> Result<(), ThrottlerError> {
        if value.is_zero() {
            return Err(ThrottlerError::ConfigurationError(format!(
                "{} must be greater than 0",
                name
            )));
        }
        Ok(())
    }

    /// Validates a log level name
    pub fn validate_log_level(level: &str) -> Result<(), ThrottlerError> {
        if !LOG_LEVELS.contains(&level.to_lowercase().as_str()) {
            return Err(ThrottlerError::ConfigurationError(format!(
                "Invalid log level '{}'. Must be one of: {:?}",
                level, LOG_LEVELS
            )));
        }
        Ok(())
    }
}
