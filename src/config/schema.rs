//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Listener configuration (bind address, body limit).
    pub listener: ListenerConfig,

    /// Route table behaviour.
    pub router: RouterConfig,

    /// Rate limiting configuration.
    pub rate_limit: RateLimitConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Largest request body read into memory before dispatch.
    pub max_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_body_bytes: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Route table behaviour.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RouterConfig {
    /// Strip one trailing slash from the request path before matching.
    pub skip_trailing_slash: bool,

    /// Fail `build()` on a repeated method and pattern instead of warning.
    pub reject_duplicate_routes: bool,
}

/// Which request attribute identifies a rate-limited client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitKey {
    /// Peer address of the connection.
    #[default]
    Ip,
    /// First `X-Forwarded-For` entry, then `X-Real-IP`, then the peer address.
    ProxyIp,
    /// An identity cookie minted on first contact.
    Cookie,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Sustained requests per second per client.
    pub requests_per_second: f64,

    /// Burst capacity as a multiple of `requests_per_second`.
    pub burst_multiplier: f64,

    /// Seconds a client may stay idle before its state is evicted.
    pub clean_expiry_secs: u64,

    /// Seconds between eviction sweeps.
    pub clean_interval_secs: u64,

    /// Client identity source.
    pub key: RateLimitKey,

    /// Cookie carrying the client identity in cookie mode.
    pub cookie_name: String,
}

impl RateLimitConfig {
    pub fn burst(&self) -> f64 {
        self.requests_per_second * self.burst_multiplier
    }

    pub fn clean_expiry(&self) -> Duration {
        Duration::from_secs(self.clean_expiry_secs)
    }

    pub fn clean_interval(&self) -> Duration {
        Duration::from_secs(self.clean_interval_secs)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            requests_per_second: 10.0,
            burst_multiplier: 3.0,
            clean_expiry_secs: 5 * 60,
            clean_interval_secs: 60,
            key: RateLimitKey::Ip,
            cookie_name: "rate_limit_id".to_string(),
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,

    /// Seconds to wait for in-flight requests on shutdown.
    pub shutdown_grace_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 30,
            shutdown_grace_secs: 10,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit logs as JSON lines instead of human-readable text.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
