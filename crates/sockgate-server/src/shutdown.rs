//! Graceful shutdown coordination via `CancellationToken`.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::registry::ConnectionRegistry;
use crate::websocket::connection::CLOSE_GOING_AWAY;

/// Default time allowed for sessions to finish their teardown.
const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Close reason sent to clients when the server stops.
pub const SHUTDOWN_REASON: &str = "Server shutting down";

/// Signals shutdown to the listener and every session.
#[derive(Clone, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a coordinator that has not fired.
    pub fn new() -> Self {
        Self::default()
    }

    /// Token cancelled when shutdown begins.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Begin shutdown. Idempotent.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether shutdown has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Close every socket, CONNECTING ones included, with 1001, then wait up
    /// to `timeout` for the server task to finish.
    ///
    /// Each session runs its normal teardown (channel cleanup, disconnect
    /// hook, unregister) as its socket closes.
    pub async fn drain(
        &self,
        registry: &ConnectionRegistry,
        server: JoinHandle<()>,
        timeout: Option<Duration>,
    ) {
        let timeout = timeout.unwrap_or(DEFAULT_DRAIN_TIMEOUT);
        self.shutdown();

        let ids = registry.all_ids();
        info!(connections = ids.len(), timeout_secs = timeout.as_secs(), "draining connections");
        for id in &ids {
            if let Some(handle) = registry.get(id) {
                handle.close(CLOSE_GOING_AWAY, SHUTDOWN_REASON);
            }
        }

        if tokio::time::timeout(timeout, server).await.is_err() {
            warn!(remaining = registry.len(), "shutdown timed out after {timeout:?}");
        }
    }
}
