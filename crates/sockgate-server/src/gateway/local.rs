//! In-process delivery through the connection registry.

use std::sync::Arc;

use async_trait::async_trait;
use sockgate_core::{ConnectionId, Payload};
use tracing::debug;

use super::{
    CLOSED_BY_GATEWAY_CODE, CLOSED_BY_GATEWAY_REASON, GatewayClient, GatewayError,
};
use crate::registry::{ConnectionInfo, ConnectionRegistry};
use crate::websocket::connection::{ConnectionHandle, SendError};

/// [`GatewayClient`] writing straight to registered socket handles.
#[derive(Clone)]
pub struct LocalGatewayClient {
    registry: Arc<ConnectionRegistry>,
}

impl LocalGatewayClient {
    /// Deliver through `registry`.
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Registry this client delivers through.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    fn open_handle(
        &self,
        connection_id: &ConnectionId,
    ) -> Result<Arc<dyn ConnectionHandle>, GatewayError> {
        if !self.registry.is_open(connection_id) {
            return Err(GatewayError::gone(connection_id));
        }
        match self.registry.get(connection_id) {
            Some(handle) if handle.is_open() => Ok(handle),
            _ => Err(GatewayError::gone(connection_id)),
        }
    }
}

#[async_trait]
impl GatewayClient for LocalGatewayClient {
    async fn post_to_connection(
        &self,
        connection_id: &ConnectionId,
        data: &Payload,
    ) -> Result<(), GatewayError> {
        let handle = self.open_handle(connection_id)?;
        let frame = data.to_frame()?;
        match handle.send(frame) {
            Ok(()) => Ok(()),
            Err(SendError::Closed) => Err(GatewayError::gone(connection_id)),
            Err(e @ SendError::Full) => Err(GatewayError::transport(connection_id, e.to_string())),
        }
    }

    async fn get_connection(
        &self,
        connection_id: &ConnectionId,
    ) -> Result<ConnectionInfo, GatewayError> {
        let _ = self.open_handle(connection_id)?;
        self.registry
            .info(connection_id)
            .ok_or_else(|| GatewayError::gone(connection_id))
    }

    async fn delete_connection(&self, connection_id: &ConnectionId) -> Result<(), GatewayError> {
        let handle = self.open_handle(connection_id)?;
        debug!(connection_id = %connection_id, "closing connection on request");
        handle.close(CLOSED_BY_GATEWAY_CODE, CLOSED_BY_GATEWAY_REASON);
        Ok(())
    }
}
