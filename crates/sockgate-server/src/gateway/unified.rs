//! Backend-agnostic gateway client.

use std::sync::Arc;

use async_trait::async_trait;
use sockgate_core::{ConnectionId, Payload};
use tracing::info;

use super::{GatewayClient, GatewayError, LocalGatewayClient, RemoteEndpoint, RemoteGatewayClient};
use crate::registry::{ConnectionInfo, ConnectionRegistry};

/// Gateway client whose backend is chosen once, at construction.
///
/// Handler code holds one of these and never branches on where it runs.
#[derive(Clone)]
pub enum UnifiedGatewayClient {
    /// Deliver to sockets owned by this process.
    Local(LocalGatewayClient),
    /// Deliver through a remote management API.
    Remote(RemoteGatewayClient),
}

impl UnifiedGatewayClient {
    /// Local mode over `registry`.
    pub fn local(registry: Arc<ConnectionRegistry>) -> Self {
        Self::Local(LocalGatewayClient::new(registry))
    }

    /// Remote mode against `endpoint`.
    pub fn remote(endpoint: RemoteEndpoint) -> Self {
        info!(url = %endpoint.url, "delivering through remote management API");
        Self::Remote(RemoteGatewayClient::new(endpoint))
    }

    /// Remote mode when `endpoint` is given, local mode otherwise.
    pub fn select(registry: Arc<ConnectionRegistry>, endpoint: Option<RemoteEndpoint>) -> Self {
        match endpoint {
            Some(endpoint) => Self::remote(endpoint),
            None => Self::local(registry),
        }
    }

    /// Whether deliveries go to local sockets.
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }

    fn backend(&self) -> &dyn GatewayClient {
        match self {
            Self::Local(client) => client,
            Self::Remote(client) => client,
        }
    }
}

impl From<Arc<ConnectionRegistry>> for UnifiedGatewayClient {
    fn from(registry: Arc<ConnectionRegistry>) -> Self {
        Self::local(registry)
    }
}

impl From<RemoteEndpoint> for UnifiedGatewayClient {
    fn from(endpoint: RemoteEndpoint) -> Self {
        Self::remote(endpoint)
    }
}

#[async_trait]
impl GatewayClient for UnifiedGatewayClient {
    async fn post_to_connection(
        &self,
        connection_id: &ConnectionId,
        data: &Payload,
    ) -> Result<(), GatewayError> {
        self.backend().post_to_connection(connection_id, data).await
    }

    async fn get_connection(
        &self,
        connection_id: &ConnectionId,
    ) -> Result<ConnectionInfo, GatewayError> {
        self.backend().get_connection(connection_id).await
    }

    async fn delete_connection(&self, connection_id: &ConnectionId) -> Result<(), GatewayError> {
        self.backend().delete_connection(connection_id).await
    }
}
