//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the forward proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, connection limit).
    pub listener: ListenerConfig,

    /// Response body transformations.
    pub content: ContentConfig,

    /// Bandwidth limiter tunables.
    pub speed_limiter: SpeedLimiterConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Access control posture.
    pub work_mode: WorkModeConfig,

    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Listen host name or address.
    pub host: String,

    /// Listen port. Zero asks the OS for an ephemeral port.
    pub port: u16,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl ListenerConfig {
    /// Listen endpoint in `host:port` form.
    pub fn bind_address(&self) -> String {
        match self.host.parse::<std::net::IpAddr>() {
            Ok(ip) => SocketAddr::new(ip, self.port).to_string(),
            Err(_) => format!("{}:{}", self.host, self.port),
        }
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_connections: 10_000,
        }
    }
}

/// Response body transformation toggles.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ContentConfig {
    /// Decode `gzip`/`x-gzip` bodies before they reach the client.
    pub decode_gzip: bool,

    /// Strip a leading byte-order mark.
    pub remove_bom: bool,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            decode_gzip: false,
            remove_bom: true,
        }
    }
}

/// Bandwidth limiter configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SpeedLimiterConfig {
    /// Enable the limiter for tunnels and forwarded bodies.
    pub enabled: bool,

    /// Sustained rate in bytes per second.
    pub normal_bytes_per_sec: f64,

    /// Short-term rate in bytes per second.
    pub burst_bytes_per_sec: u64,

    /// Maximum burst-to-normal ratio.
    pub max_burst_ratio: f64,
}

impl Default for SpeedLimiterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            normal_bytes_per_sec: 50_000.0,
            burst_bytes_per_sec: 50_000,
            max_burst_ratio: 2.0,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Target connection dial timeout in seconds.
    pub target_connect_secs: u64,

    /// Upper bound for the graceful shutdown drain in seconds.
    pub shutdown_secs: u64,
}

impl TimeoutConfig {
    pub fn target_connect(&self) -> Duration {
        Duration::from_secs(self.target_connect_secs)
    }

    pub fn shutdown(&self) -> Duration {
        Duration::from_secs(self.shutdown_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            target_connect_secs: 60,
            shutdown_secs: 60,
        }
    }
}

/// Work mode selection.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkModeConfig {
    /// Mode name: `public` or `private`.
    pub mode: String,

    /// Whitelist file path, required in private mode.
    pub list: Option<String>,
}

impl Default for WorkModeConfig {
    fn default() -> Self {
        Self {
            mode: "public".to_string(),
            list: None,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// One of debug, info, warn, error, fatal, panic, none, disabled.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "error".to_string(),
        }
    }
}
