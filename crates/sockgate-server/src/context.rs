//! Shared components handed to the transport, lifecycle and handlers.

use std::sync::Arc;

use sockgate_settings::GatewaySettings;
use tracing::info;

use crate::channels::{ChannelStore, ExternalChannelStore, InMemoryChannelStore, RedisSetStore};
use crate::config::GatewayOptions;
use crate::emitter::SocketEmitter;
use crate::errors::ServerError;
use crate::gateway::{GatewayClient, LocalGatewayClient, RemoteEndpoint, UnifiedGatewayClient};
use crate::registry::ConnectionRegistry;

/// The registry, channel store, delivery client and emitter of one process.
#[derive(Clone)]
pub struct GatewayContext {
    /// Connections owned by this process.
    pub registry: Arc<ConnectionRegistry>,
    /// Channel membership.
    pub channels: Arc<dyn ChannelStore>,
    /// Delivery used by handlers and the emitter.
    pub gateway: Arc<UnifiedGatewayClient>,
    /// Delivery to sockets owned by this process; backs the management API.
    pub local: LocalGatewayClient,
    /// Fan-out over `gateway`.
    pub emitter: SocketEmitter,
    /// Request-context values.
    pub options: GatewayOptions,
}

impl GatewayContext {
    /// Assemble a context over `channels`, delivering remotely when `remote`
    /// is given.
    pub fn new(
        options: GatewayOptions,
        channels: Arc<dyn ChannelStore>,
        remote: Option<RemoteEndpoint>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let gateway = Arc::new(UnifiedGatewayClient::select(registry.clone(), remote));
        let emitter = SocketEmitter::new(registry.clone(), channels.clone(), gateway.clone());
        Self {
            local: LocalGatewayClient::new(registry.clone()),
            registry,
            channels,
            gateway,
            emitter,
            options,
        }
    }

    /// Local delivery with in-memory channels.
    pub fn in_memory(options: GatewayOptions) -> Self {
        Self::new(options, Arc::new(InMemoryChannelStore::new()), None)
    }

    /// Build from settings, connecting to the shared set store when
    /// `useExternalStore` is on.
    pub async fn from_settings(settings: &GatewaySettings) -> Result<Self, ServerError> {
        let channels: Arc<dyn ChannelStore> = if settings.use_external_store {
            let store = RedisSetStore::connect(&settings.store_url).await?;
            info!(url = %settings.store_url, "using external channel store");
            Arc::new(ExternalChannelStore::new(Arc::new(store)))
        } else {
            Arc::new(InMemoryChannelStore::new())
        };

        let remote = match &settings.remote_endpoint {
            Some(url) if url.trim().is_empty() => {
                return Err(ServerError::Config("remoteEndpoint is empty".into()));
            }
            Some(url) => {
                let endpoint = RemoteEndpoint::new(url.trim());
                Some(match &settings.remote_auth_token {
                    Some(token) => endpoint.with_auth_token(token),
                    None => endpoint,
                })
            }
            None => None,
        };

        Ok(Self::new(GatewayOptions::from(settings), channels, remote))
    }

    /// The delivery client as a trait object.
    pub fn deliver(&self) -> Arc<dyn GatewayClient> {
        self.gateway.clone()
    }
}
