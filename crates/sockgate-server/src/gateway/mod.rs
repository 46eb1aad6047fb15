//! Post-to-connection delivery.
//!
//! [`GatewayClient`] is the only way handlers and the emitter reach a
//! connection. The local backend writes to in-process sockets; the remote one
//! calls a connection management API. Both report a departed recipient as
//! [`GatewayError::Gone`].

pub mod errors;
pub mod local;
pub mod remote;
pub mod unified;

use async_trait::async_trait;
use sockgate_core::{ConnectionId, Payload};

use crate::registry::ConnectionInfo;

pub use errors::{GONE_STATUS, GatewayError};
pub use local::LocalGatewayClient;
pub use remote::{RemoteEndpoint, RemoteGatewayClient};
pub use unified::UnifiedGatewayClient;

/// Close code used when a connection is closed through the gateway.
pub const CLOSED_BY_GATEWAY_CODE: u16 = 1000;
/// Close reason used when a connection is closed through the gateway.
pub const CLOSED_BY_GATEWAY_REASON: &str = "Closed by gateway";

/// Delivery surface for a single connection.
#[async_trait]
pub trait GatewayClient: Send + Sync {
    /// Send `data` to `connection_id`. Strings go out verbatim, anything else
    /// is JSON-serialized.
    async fn post_to_connection(
        &self,
        connection_id: &ConnectionId,
        data: &Payload,
    ) -> Result<(), GatewayError>;

    /// Describe `connection_id`.
    async fn get_connection(
        &self,
        connection_id: &ConnectionId,
    ) -> Result<ConnectionInfo, GatewayError>;

    /// Force `connection_id` closed.
    async fn delete_connection(&self, connection_id: &ConnectionId) -> Result<(), GatewayError>;
}
