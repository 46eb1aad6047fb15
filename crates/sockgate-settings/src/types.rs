//! Settings types.
//!
//! Every struct uses `#[serde(default)]` so a partial settings file only has
//! to name the values it changes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sockgate_core::UserContext;

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SockgateSettings {
    /// Listener and per-socket limits.
    pub server: ServerSettings,
    /// Gateway emulation and delivery backend selection.
    pub gateway: GatewaySettings,
    /// Built-in static token authentication.
    pub auth: AuthSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

/// Listener and per-socket limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` picks a free port).
    pub port: u16,
    /// Path the WebSocket upgrade is served on.
    pub websocket_path: String,
    /// Max inbound frame size in bytes.
    pub max_message_size: usize,
    /// Outbound frames queued per connection before sends start failing.
    pub send_buffer_size: usize,
    /// Interval between server pings.
    pub heartbeat_interval_secs: u64,
    /// Silence after which a client is dropped.
    pub heartbeat_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 3001,
            websocket_path: "/".into(),
            max_message_size: 128 * 1024,
            send_buffer_size: 256,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
        }
    }
}

/// Gateway emulation and delivery backend selection.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewaySettings {
    /// Domain name reported in request contexts.
    pub domain_name: String,
    /// Stage reported in request contexts.
    pub stage: String,
    /// Verbose diagnostic logging.
    pub debug: bool,
    /// Keep channel memberships in the shared set store instead of process memory.
    pub use_external_store: bool,
    /// Connection URL for the shared set store.
    pub store_url: String,
    /// Base URL of a remote connection management API. When set, deliveries go
    /// through it instead of local sockets.
    pub remote_endpoint: Option<String>,
    /// Bearer token sent to the remote management API.
    pub remote_auth_token: Option<String>,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            domain_name: "localhost".into(),
            stage: "local".into(),
            debug: false,
            use_external_store: false,
            store_url: "redis://127.0.0.1:6379".into(),
            remote_endpoint: None,
            remote_auth_token: None,
        }
    }
}

/// Static token authentication.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// Reject connections whose token is not listed in `tokens`.
    pub required: bool,
    /// Token to identity map.
    pub tokens: HashMap<String, UserContext>,
}

/// Log output.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

impl SockgateSettings {
    /// Effective log filter, accounting for the gateway `debug` flag.
    pub fn log_level(&self) -> &str {
        if self.gateway.debug {
            "debug"
        } else {
            &self.logging.level
        }
    }
}
