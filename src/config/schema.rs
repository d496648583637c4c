//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::body::BodyLimits;
use crate::h2::keepalive::{
    KeepalivePolicy, DEFAULT_MAX_PING_STRIKES, DEFAULT_MIN_PING_RECEIVE_INTERVAL,
};
use crate::h2::ManagerConfig;

/// Seconds to wait for a server PING to be acknowledged.
const DEFAULT_KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(20);

/// Root configuration for the server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener configuration (bind address, connection limit).
    pub listener: ListenerConfig,

    /// Request body limits.
    pub limits: LimitsConfig,

    /// HTTP/2 connection management.
    pub http2: Http2Config,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Server shutdown behaviour.
    pub shutdown: ShutdownConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Request body limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum request body size in bytes.
    pub max_upload_size: usize,

    /// Bytes buffered per request before the connection stops reading.
    pub max_streaming_buffer_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        let limits = BodyLimits::default();
        Self {
            max_upload_size: limits.max_size,
            max_streaming_buffer_size: limits.max_streaming_buffer_size,
        }
    }
}

impl LimitsConfig {
    pub fn body_limits(&self) -> BodyLimits {
        BodyLimits {
            max_size: self.max_upload_size,
            max_streaming_buffer_size: self.max_streaming_buffer_size,
        }
    }
}

/// HTTP/2 connection management.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Http2Config {
    /// Gracefully close connections with nothing in flight after this many
    /// seconds.
    pub idle_timeout_secs: Option<u64>,

    /// Force close this many seconds after a graceful shutdown started.
    pub graceful_close_timeout_secs: Option<u64>,

    /// Gracefully close connections older than this many seconds.
    pub max_age_secs: Option<u64>,

    /// Send a server PING on HTTP/2 sockets every this many seconds.
    pub keepalive_interval_secs: Option<u64>,

    /// Close an HTTP/2 socket whose PING goes unanswered this long.
    pub keepalive_timeout_secs: u64,

    /// Minimum seconds between client pings while streams are open.
    ///
    /// This and the two settings below only apply to transports driven by
    /// `h2::ConnectionManager`. hyper enforces its own client ping policy on
    /// the socket server.
    pub min_ping_receive_interval_secs: u64,

    /// Out-of-cadence pings tolerated before the connection is closed.
    pub max_ping_strikes: u32,

    /// Apply the short ping interval even without open streams.
    pub allow_pings_without_open_streams: bool,
}

impl Default for Http2Config {
    fn default() -> Self {
        Self {
            idle_timeout_secs: None,
            graceful_close_timeout_secs: None,
            max_age_secs: None,
            keepalive_interval_secs: None,
            keepalive_timeout_secs: DEFAULT_KEEPALIVE_TIMEOUT.as_secs(),
            min_ping_receive_interval_secs: DEFAULT_MIN_PING_RECEIVE_INTERVAL.as_secs(),
            max_ping_strikes: DEFAULT_MAX_PING_STRIKES,
            allow_pings_without_open_streams: false,
        }
    }
}

impl Http2Config {
    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            idle_timeout: self.idle_timeout_secs.map(Duration::from_secs),
            graceful_close_timeout: self.graceful_close_timeout_secs.map(Duration::from_secs),
            max_age: self.max_age_secs.map(Duration::from_secs),
            keepalive: KeepalivePolicy {
                allow_pings_without_open_streams: self.allow_pings_without_open_streams,
                min_ping_receive_interval: Duration::from_secs(self.min_ping_receive_interval_secs),
                max_ping_strikes: self.max_ping_strikes,
            },
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error), overridden by RUST_LOG.
    pub log_level: String,

    /// Emit JSON log lines instead of the human readable format.
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

/// Server shutdown behaviour.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Seconds to wait for in-flight connections after shutdown starts.
    pub drain_timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout_secs: 30,
        }
    }
}
