//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (rates > 0, timeouts > 0, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AppConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use super::schema::{AppConfig, RateLimitKey};

/// One semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self { field, message: message.into() }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("`{}` is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.max_body_bytes == 0 {
        errors.push(ValidationError::new("listener.max_body_bytes", "must be greater than 0"));
    }

    let rl = &config.rate_limit;
    if rl.enabled {
        if !(rl.requests_per_second > 0.0) {
            errors.push(ValidationError::new(
                "rate_limit.requests_per_second",
                "must be greater than 0",
            ));
        }
        if rl.burst() < 1.0 {
            errors.push(ValidationError::new(
                "rate_limit.burst_multiplier",
                "requests_per_second * burst_multiplier must allow at least one request",
            ));
        }
        if rl.clean_interval_secs == 0 {
            errors.push(ValidationError::new("rate_limit.clean_interval_secs", "must be greater than 0"));
        }
        if rl.clean_expiry_secs == 0 {
            errors.push(ValidationError::new("rate_limit.clean_expiry_secs", "must be greater than 0"));
        }
        if rl.key == RateLimitKey::Cookie && rl.cookie_name.trim().is_empty() {
            errors.push(ValidationError::new("rate_limit.cookie_name", "required in cookie mode"));
        }
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }

    let obs = &config.observability;
    if !matches!(obs.log_level.as_str(), "trace" | "debug" | "info" | "warn" | "error") {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("unknown level `{}`", obs.log_level),
        ));
    }
    if obs.metrics_enabled && obs.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("`{}` is not a socket address", obs.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
