//! Channel store backed by a shared set-membership store.
//!
//! Two key families hold the relation: `channel:<name>` (members of a
//! channel) and `conn-channels:<id>` (channels of a connection). Each key is
//! only as atomic as the backing store's per-key set operations; the pair can
//! drift after a crash mid-operation and is reconciled by the next
//! `remove_all` for that connection.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use sockgate_core::ConnectionId;
use tracing::{debug, warn};

use super::{ChannelStore, ChannelStoreError};

/// Key holding the members of `channel`.
pub fn channel_key(channel: &str) -> String {
    format!("channel:{channel}")
}

/// Key holding the channels of `connection_id`.
pub fn connection_key(connection_id: &ConnectionId) -> String {
    format!("conn-channels:{connection_id}")
}

/// Minimal set-membership store.
///
/// Removing the last member of a set must delete the key.
#[async_trait]
pub trait SetStore: Send + Sync {
    /// Add `member` to the set at `key`.
    async fn add(&self, key: &str, member: &str) -> Result<(), ChannelStoreError>;
    /// Remove `member` from the set at `key`.
    async fn remove(&self, key: &str, member: &str) -> Result<(), ChannelStoreError>;
    /// All members of the set at `key`; empty when the key is absent.
    async fn members(&self, key: &str) -> Result<Vec<String>, ChannelStoreError>;
    /// Delete the set at `key`.
    async fn delete(&self, key: &str) -> Result<(), ChannelStoreError>;
}

/// Process-local [`SetStore`] with the same semantics as the shared one.
#[derive(Default)]
pub struct MemorySetStore {
    sets: Mutex<HashMap<String, HashSet<String>>>,
}

impl MemorySetStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `key` currently exists.
    pub fn contains_key(&self, key: &str) -> bool {
        self.sets.lock().contains_key(key)
    }

    /// Sorted list of existing keys.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.sets.lock().keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl SetStore for MemorySetStore {
    async fn add(&self, key: &str, member: &str) -> Result<(), ChannelStoreError> {
        let _ = self
            .sets
            .lock()
            .entry(key.to_owned())
            .or_default()
            .insert(member.to_owned());
        Ok(())
    }

    async fn remove(&self, key: &str, member: &str) -> Result<(), ChannelStoreError> {
        let mut sets = self.sets.lock();
        if let Some(set) = sets.get_mut(key) {
            let _ = set.remove(member);
            if set.is_empty() {
                let _ = sets.remove(key);
            }
        }
        Ok(())
    }

    async fn members(&self, key: &str) -> Result<Vec<String>, ChannelStoreError> {
        Ok(self
            .sets
            .lock()
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete(&self, key: &str) -> Result<(), ChannelStoreError> {
        let _ = self.sets.lock().remove(key);
        Ok(())
    }
}

/// [`ChannelStore`] over a [`SetStore`] shared between processes.
pub struct ExternalChannelStore {
    store: Arc<dyn SetStore>,
}

impl ExternalChannelStore {
    /// Wrap `store`.
    pub fn new(store: Arc<dyn SetStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ChannelStore for ExternalChannelStore {
    async fn subscribe(
        &self,
        connection_id: &ConnectionId,
        channel: &str,
    ) -> Result<(), ChannelStoreError> {
        // Reverse index first: a half-written membership stays reachable
        // from `remove_all`.
        self.store.add(&connection_key(connection_id), channel).await?;
        self.store.add(&channel_key(channel), connection_id).await
    }

    async fn unsubscribe(
        &self,
        connection_id: &ConnectionId,
        channel: &str,
    ) -> Result<(), ChannelStoreError> {
        self.store.remove(&channel_key(channel), connection_id).await?;
        self.store.remove(&connection_key(connection_id), channel).await
    }

    async fn get_subscribers(&self, channel: &str) -> Result<Vec<ConnectionId>, ChannelStoreError> {
        let members = self.store.members(&channel_key(channel)).await?;
        Ok(members.into_iter().map(ConnectionId::from).collect())
    }

    async fn get_channels(
        &self,
        connection_id: &ConnectionId,
    ) -> Result<Vec<String>, ChannelStoreError> {
        self.store.members(&connection_key(connection_id)).await
    }

    async fn remove_all(&self, connection_id: &ConnectionId) -> Result<(), ChannelStoreError> {
        let reverse_key = connection_key(connection_id);
        let channels = self.store.members(&reverse_key).await?;
        debug!(connection_id = %connection_id, count = channels.len(), "removing channel memberships");

        let mut first_error = None;
        for channel in &channels {
            if let Err(e) = self.store.remove(&channel_key(channel), connection_id).await {
                warn!(connection_id = %connection_id, channel, error = %e, "failed to leave channel");
                let _ = first_error.get_or_insert(e);
            }
        }

        // Keep the reverse index when a forward removal failed so a later
        // call can still find and finish the cleanup.
        match first_error {
            Some(e) => Err(e),
            None => self.store.delete(&reverse_key).await,
        }
    }
}
