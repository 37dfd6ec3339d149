//! Gateway configuration.

use std::time::Duration;

use serde::Deserialize;

/// Tuning knobs for the gateway. Every field has a sensible default; the
/// binary overrides them from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Listen address, e.g. `0.0.0.0:8080`.
    #[serde(default = "GatewayConfig::default_listen_addr")]
    pub listen_addr: String,

    /// Allowed CORS origins. Empty means any origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    #[serde(default = "GatewayConfig::default_max_body")]
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    #[serde(default = "GatewayConfig::default_request_timeout")]
    pub request_timeout_seconds: u64,

    /// Deadline for writing one frame to a WebSocket, in milliseconds. A
    /// socket that misses it is dropped.
    #[serde(default = "GatewayConfig::default_ws_send_deadline")]
    pub ws_send_deadline_ms: u64,

    /// Event bus queue depth per subscriber.
    #[serde(default = "GatewayConfig::default_bus_capacity")]
    pub bus_capacity: usize,
}

impl GatewayConfig {
    fn default_listen_addr() -> String {
        "0.0.0.0:8080".to_owned()
    }

    const fn default_max_body() -> usize {
        256 * 1024
    }

    const fn default_request_timeout() -> u64 {
        30
    }

    const fn default_ws_send_deadline() -> u64 {
        2_000
    }

    const fn default_bus_capacity() -> usize {
        256
    }

    /// The request timeout as a `Duration`.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// The WebSocket send deadline as a `Duration`.
    #[must_use]
    pub const fn ws_send_deadline(&self) -> Duration {
        Duration::from_millis(self.ws_send_deadline_ms)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: Self::default_listen_addr(),
            cors_origins: Vec::new(),
            max_body_bytes: Self::default_max_body(),
            request_timeout_seconds: Self::default_request_timeout(),
            ws_send_deadline_ms: Self::default_ws_send_deadline(),
            bus_capacity: Self::default_bus_capacity(),
        }
    }
}
