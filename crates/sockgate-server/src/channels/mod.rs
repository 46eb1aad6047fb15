//! Channel membership storage.
//!
//! Membership is a many-to-many relation kept as two indexes (channel to
//! members, connection to channels). Implementations update both sides in a
//! single internal step; no caller ever touches one index alone.

pub mod external;
pub mod memory;
pub mod redis;

use async_trait::async_trait;
use sockgate_core::ConnectionId;
use thiserror::Error;

pub use external::{ExternalChannelStore, MemorySetStore, SetStore};
pub use memory::InMemoryChannelStore;
pub use self::redis::RedisSetStore;

/// Backend failures of a channel store.
///
/// Pre-existing index divergence is never an error; operations reconcile
/// toward the requested state instead.
#[derive(Debug, Error)]
pub enum ChannelStoreError {
    /// The shared set store rejected or failed a command.
    #[error("set store error: {0}")]
    Redis(#[from] ::redis::RedisError),
    /// Any other backend failure.
    #[error("channel store backend error: {0}")]
    Backend(String),
}

/// Channel membership contract shared by every backend.
#[async_trait]
pub trait ChannelStore: Send + Sync {
    /// Add `connection_id` to `channel`. Idempotent.
    async fn subscribe(
        &self,
        connection_id: &ConnectionId,
        channel: &str,
    ) -> Result<(), ChannelStoreError>;

    /// Remove `connection_id` from `channel`. Idempotent.
    async fn unsubscribe(
        &self,
        connection_id: &ConnectionId,
        channel: &str,
    ) -> Result<(), ChannelStoreError>;

    /// Members of `channel`; empty for an unknown channel.
    async fn get_subscribers(&self, channel: &str) -> Result<Vec<ConnectionId>, ChannelStoreError>;

    /// Channels `connection_id` belongs to.
    async fn get_channels(
        &self,
        connection_id: &ConnectionId,
    ) -> Result<Vec<String>, ChannelStoreError>;

    /// Drop every membership of `connection_id`. Safe with no memberships.
    async fn remove_all(&self, connection_id: &ConnectionId) -> Result<(), ChannelStoreError>;
}
