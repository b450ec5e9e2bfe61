//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::AppConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid { field: field.into(), reason: reason.into() }
}

fn check_bytes(field: &str, value: usize, max_mb: usize) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(invalid(field, "must be greater than 0"));
    }
    if value > max_mb * 1024 * 1024 {
        return Err(invalid(field, &format!("must not exceed {max_mb}MB")));
    }
    Ok(())
}

fn check_timeout(field: &str, value: u64) -> Result<(), ConfigError> {
    if value < 100 {
        return Err(invalid(field, "must be at least 100ms"));
    }
    if value > 300_000 {
        return Err(invalid(field, "must not exceed 5 minutes (300000ms)"));
    }
    Ok(())
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - a byte limit is 0 or oversized (50MB general, 100MB images)
    /// - a timeout is below 100ms or above 5 minutes
    /// - `user_agent` is empty
    /// - socket, queue or retry bounds are 0
    /// - `default_quality` is outside 1..=100
    /// - `transform_url_template` lacks a `{url}` placeholder
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_bytes("max_bytes", self.max_bytes, 50)?;
        check_bytes("image_max_bytes", self.image_max_bytes, 100)?;

        check_timeout("timeout_ms", self.timeout_ms)?;
        check_timeout("image_timeout_ms", self.image_timeout_ms)?;
        check_timeout("queue_timeout_ms", self.queue_timeout_ms)?;
        check_timeout("direct_timeout_ms", self.direct_timeout_ms)?;
        check_timeout("proxied_timeout_ms", self.proxied_timeout_ms)?;

        if self.user_agent.is_empty() {
            return Err(invalid("user_agent", "must not be empty"));
        }

        for (field, value) in [
            ("max_sockets", self.max_sockets),
            ("queue_concurrency", self.queue_concurrency),
            ("queue_capacity", self.queue_capacity),
        ] {
            if value == 0 {
                return Err(invalid(field, "must be at least 1"));
            }
        }

        if self.max_retries == 0 || self.image_max_retries == 0 {
            return Err(invalid("max_retries", "attempt ceilings must be at least 1"));
        }

        if self.max_idle_sockets > self.max_sockets {
            return Err(invalid("max_idle_sockets", "must not exceed max_sockets"));
        }

        if self.cache_ttl_secs == 0 {
            return Err(invalid("cache_ttl_secs", "must be greater than 0"));
        }
        if self.sweep_interval_secs == 0 {
            return Err(invalid("sweep_interval_secs", "must be greater than 0"));
        }

        if !(1..=100).contains(&self.default_quality) {
            return Err(invalid("default_quality", "must be between 1 and 100"));
        }

        if let Some(template) = &self.transform_url_template
            && !template.contains("{url}")
        {
            return Err(invalid("transform_url_template", "must contain a {url} placeholder"));
        }

        if self.transform_url_template.is_none() {
            tracing::debug!("no transform_url_template set; the proxy will pass images through unmodified");
        }

        Ok(())
    }
}
