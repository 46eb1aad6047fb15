//! Runtime configuration derived from settings.

use std::time::Duration;

use sockgate_settings::{GatewaySettings, ServerSettings};

/// Listener and per-socket limits.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` picks a free port).
    pub port: u16,
    /// Path the WebSocket upgrade is served on.
    pub websocket_path: String,
    /// Max inbound frame size in bytes.
    pub max_message_size: usize,
    /// Outbound frames queued per connection.
    pub send_buffer_size: usize,
    /// Interval between server pings.
    pub heartbeat_interval: Duration,
    /// Silence after which a client is dropped.
    pub heartbeat_timeout: Duration,
}

impl ServerConfig {
    /// `host:port` string for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from(&ServerSettings::default())
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(s: &ServerSettings) -> Self {
        let websocket_path = if s.websocket_path.starts_with('/') {
            s.websocket_path.clone()
        } else {
            format!("/{}", s.websocket_path)
        };
        Self {
            host: s.host.clone(),
            port: s.port,
            websocket_path,
            max_message_size: s.max_message_size,
            send_buffer_size: s.send_buffer_size.max(1),
            heartbeat_interval: Duration::from_secs(s.heartbeat_interval_secs.max(1)),
            heartbeat_timeout: Duration::from_secs(s.heartbeat_timeout_secs.max(1)),
        }
    }
}

/// Values stamped into every request context.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatewayOptions {
    /// Cosmetic domain name.
    pub domain_name: String,
    /// Cosmetic stage.
    pub stage: String,
    /// Verbose diagnostic logging.
    pub debug: bool,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self::from(&GatewaySettings::default())
    }
}

impl From<&GatewaySettings> for GatewayOptions {
    fn from(s: &GatewaySettings) -> Self {
        Self {
            domain_name: s.domain_name.clone(),
            stage: s.stage.clone(),
            debug: s.debug,
        }
    }
}
