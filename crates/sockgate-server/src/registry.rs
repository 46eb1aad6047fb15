//! Connection registry: which connections exist and who they are.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sockgate_core::{ConnectionId, UserContext};
use tracing::debug;

use crate::websocket::connection::ConnectionHandle;

/// Snapshot of one registered connection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    /// Connection identifier.
    pub connection_id: ConnectionId,
    /// When the socket was accepted.
    pub connected_at: DateTime<Utc>,
    /// Last inbound activity.
    pub last_active_at: DateTime<Utc>,
    /// Identity attached after authentication, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<UserContext>,
}

/// Connection states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Registered, waiting for the connect handler.
    Connecting,
    /// Accepted; frames are routed and deliveries accepted.
    Open,
    /// Torn down. Terminal.
    Closed,
}

struct Registered {
    handle: Arc<dyn ConnectionHandle>,
    state: ConnectionState,
    connected_at: DateTime<Utc>,
    last_active_at: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    connections: HashMap<ConnectionId, Registered>,
    user_contexts: HashMap<ConnectionId, UserContext>,
}

/// Owns the mapping from connection id to socket handle and user context.
///
/// Both maps sit behind one lock so every mutation is atomic with respect to
/// the others. Reads return owned snapshots; nothing is borrowed across a send.
/// Target resolution (`get_all`, user and org scans) only sees OPEN entries.
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: RwLock<Inner>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `handle` under a fresh identifier, open for delivery.
    pub fn register(&self, handle: Arc<dyn ConnectionHandle>) -> ConnectionId {
        self.insert(handle, ConnectionState::Open)
    }

    /// Store `handle` as CONNECTING: it holds an id but is invisible to
    /// target resolution until [`mark_open`](Self::mark_open).
    pub fn register_connecting(&self, handle: Arc<dyn ConnectionHandle>) -> ConnectionId {
        self.insert(handle, ConnectionState::Connecting)
    }

    fn insert(&self, handle: Arc<dyn ConnectionHandle>, state: ConnectionState) -> ConnectionId {
        let now = Utc::now();
        let mut inner = self.inner.write();
        loop {
            let id = ConnectionId::new();
            if let Entry::Vacant(slot) = inner.connections.entry(id.clone()) {
                let _ = slot.insert(Registered {
                    handle,
                    state,
                    connected_at: now,
                    last_active_at: now,
                });
                debug!(connection_id = %id, ?state, "connection registered");
                return id;
            }
        }
    }

    /// Move `id` from CONNECTING to OPEN. `false` when `id` is unknown.
    pub fn mark_open(&self, id: &ConnectionId) -> bool {
        match self.inner.write().connections.get_mut(id) {
            Some(entry) => {
                entry.state = ConnectionState::Open;
                true
            }
            None => false,
        }
    }

    /// State of `id`; `None` once unregistered.
    pub fn state(&self, id: &ConnectionId) -> Option<ConnectionState> {
        self.inner.read().connections.get(id).map(|r| r.state)
    }

    /// Whether `id` is registered and OPEN.
    pub fn is_open(&self, id: &ConnectionId) -> bool {
        self.state(id) == Some(ConnectionState::Open)
    }

    /// Remove the handle and user context for `id`.
    ///
    /// Returns whether anything was removed; unknown ids are a no-op.
    pub fn unregister(&self, id: &ConnectionId) -> bool {
        let mut inner = self.inner.write();
        let _ = inner.user_contexts.remove(id);
        let removed = inner.connections.remove(id).is_some();
        if removed {
            debug!(connection_id = %id, "connection unregistered");
        }
        removed
    }

    /// Handle for `id`.
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<dyn ConnectionHandle>> {
        self.inner
            .read()
            .connections
            .get(id)
            .map(|r| Arc::clone(&r.handle))
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.inner.read().connections.contains_key(id)
    }

    /// Snapshot of every OPEN id.
    pub fn get_all(&self) -> Vec<ConnectionId> {
        self.inner
            .read()
            .connections
            .iter()
            .filter(|(_, r)| r.state == ConnectionState::Open)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Snapshot of every registered id, CONNECTING included.
    pub fn all_ids(&self) -> Vec<ConnectionId> {
        self.inner.read().connections.keys().cloned().collect()
    }

    /// Attach `ctx` to `id`.
    ///
    /// Returns `false` (and stores nothing) when `id` is not registered, so a
    /// context can never outlive its connection.
    pub fn set_user_context(&self, id: &ConnectionId, ctx: UserContext) -> bool {
        let mut inner = self.inner.write();
        if !inner.connections.contains_key(id) {
            return false;
        }
        let _ = inner.user_contexts.insert(id.clone(), ctx);
        true
    }

    /// User context for `id`.
    pub fn get_user_context(&self, id: &ConnectionId) -> Option<UserContext> {
        self.inner.read().user_contexts.get(id).cloned()
    }

    /// Connections authenticated as `user_id`.
    pub fn get_connections_by_user_id(&self, user_id: &str) -> Vec<ConnectionId> {
        self.matching(|ctx| ctx.is_user(user_id))
    }

    /// Connections belonging to `org_id`.
    pub fn get_connections_by_org_id(&self, org_id: &str) -> Vec<ConnectionId> {
        self.matching(|ctx| ctx.is_org(org_id))
    }

    fn matching(&self, pred: impl Fn(&UserContext) -> bool) -> Vec<ConnectionId> {
        let inner = self.inner.read();
        inner
            .user_contexts
            .iter()
            .filter(|(id, ctx)| {
                pred(ctx)
                    && inner
                        .connections
                        .get(*id)
                        .is_some_and(|r| r.state == ConnectionState::Open)
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Record inbound activity on `id`.
    pub fn touch(&self, id: &ConnectionId) {
        if let Some(entry) = self.inner.write().connections.get_mut(id) {
            entry.last_active_at = Utc::now();
        }
    }

    /// Snapshot of `id` with its identity.
    pub fn info(&self, id: &ConnectionId) -> Option<ConnectionInfo> {
        let inner = self.inner.read();
        let entry = inner.connections.get(id)?;
        Some(ConnectionInfo {
            connection_id: id.clone(),
            connected_at: entry.connected_at,
            last_active_at: entry.last_active_at,
            identity: inner.user_contexts.get(id).cloned(),
        })
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.inner.read().connections.len()
    }

    /// Whether no connections are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
