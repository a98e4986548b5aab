//! Configuration validation.
//!
//! Serde handles syntax; this module checks value ranges and cross-field
//! requirements. All problems are reported at once.

use crate::config::schema::ProxyConfig;
use crate::observability::logging::parse_level;
use crate::security::work_mode::{MODE_PRIVATE, MODE_PUBLIC};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Validate a configuration, returning every problem found.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.host.trim().is_empty() {
        errors.push(ValidationError::new("listener.host", "must not be empty"));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new(
            "listener.max_connections",
            "must be greater than zero",
        ));
    }

    let limiter = &config.speed_limiter;
    if limiter.enabled {
        if !limiter.normal_bytes_per_sec.is_finite() || limiter.normal_bytes_per_sec < 1.0 {
            errors.push(ValidationError::new(
                "speed_limiter.normal_bytes_per_sec",
                "must be at least 1 byte per second",
            ));
        }
        if limiter.burst_bytes_per_sec == 0 {
            errors.push(ValidationError::new(
                "speed_limiter.burst_bytes_per_sec",
                "must be greater than zero",
            ));
        }
        if !limiter.max_burst_ratio.is_finite() || limiter.max_burst_ratio < 1.0 {
            errors.push(ValidationError::new(
                "speed_limiter.max_burst_ratio",
                "must be at least 1.0",
            ));
        }
    }

    if config.timeouts.target_connect_secs == 0 {
        errors.push(ValidationError::new(
            "timeouts.target_connect_secs",
            "must be greater than zero",
        ));
    }

    let mode = config.work_mode.mode.to_ascii_lowercase();
    if mode != MODE_PUBLIC && mode != MODE_PRIVATE {
        errors.push(ValidationError::new(
            "work_mode.mode",
            format!("unknown work mode name: {}", config.work_mode.mode),
        ));
    }
    let has_list = config
        .work_mode
        .list
        .as_deref()
        .is_some_and(|path| !path.trim().is_empty());
    if mode == MODE_PRIVATE && !has_list {
        errors.push(ValidationError::new(
            "work_mode.list",
            "a whitelist file is required in private mode",
        ));
    }

    if parse_level(&config.logging.level).is_none() {
        errors.push(ValidationError::new(
            "logging.level",
            format!("unknown log level: {}", config.logging.level),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
