//! Identity and per-event context records.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::ConnectionId;

/// Route key stamped on connect events.
pub const CONNECT_ROUTE: &str = "$connect";
/// Route key stamped on disconnect events.
pub const DISCONNECT_ROUTE: &str = "$disconnect";
/// Route key stamped when a message falls through to the default handler.
pub const DEFAULT_ROUTE: &str = "$default";

/// Application identity attached to a connection after authentication.
///
/// Only `userId` and `organizationId` are interpreted by the gateway (for
/// by-user and by-org fan-out); every other field is carried through verbatim.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserContext {
    /// User identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Organization identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    /// Arbitrary application-defined fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UserContext {
    /// Context for a user belonging to an organization.
    pub fn new(user_id: impl Into<String>, organization_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            organization_id: Some(organization_id.into()),
            extra: Map::new(),
        }
    }

    /// Context carrying only a user identifier.
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::default()
        }
    }

    /// Attach an extra field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        let _ = self.extra.insert(key.into(), value);
        self
    }

    /// Whether this context belongs to `user_id`.
    pub fn is_user(&self, user_id: &str) -> bool {
        self.user_id.as_deref() == Some(user_id)
    }

    /// Whether this context belongs to `organization_id`.
    pub fn is_org(&self, organization_id: &str) -> bool {
        self.organization_id.as_deref() == Some(organization_id)
    }
}

/// Classification of the event a handler is invoked for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    /// Socket accepted, before auth completes.
    Connect,
    /// Socket closed.
    Disconnect,
    /// Inbound frame.
    Message,
}

/// Context synthesized for every connect, disconnect and inbound message.
///
/// Handlers receive it read-only; the router hands out a stamped copy rather
/// than mutating the caller's value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    /// Connection the event belongs to.
    pub connection_id: ConnectionId,
    /// Logical route (`$connect`, `$disconnect`, `$default` or the action name).
    pub route_key: String,
    /// Event classification.
    pub event_type: EventType,
    /// Cosmetic domain name from configuration.
    pub domain_name: String,
    /// Cosmetic stage name from configuration.
    pub stage: String,
    /// Unique id for this event.
    pub request_id: String,
    /// When the event was synthesized (epoch millis).
    pub request_time_epoch: i64,
}

impl RequestContext {
    /// Build a context for `event_type` on `connection_id`.
    pub fn new(
        connection_id: ConnectionId,
        event_type: EventType,
        domain_name: &str,
        stage: &str,
    ) -> Self {
        let route_key = match event_type {
            EventType::Connect => CONNECT_ROUTE,
            EventType::Disconnect => DISCONNECT_ROUTE,
            EventType::Message => DEFAULT_ROUTE,
        };
        Self {
            connection_id,
            route_key: route_key.to_owned(),
            event_type,
            domain_name: domain_name.to_owned(),
            stage: stage.to_owned(),
            request_id: uuid::Uuid::now_v7().to_string(),
            request_time_epoch: Utc::now().timestamp_millis(),
        }
    }

    /// Copy of this context with `route_key` stamped.
    #[must_use]
    pub fn with_route_key(&self, route_key: &str) -> Self {
        Self {
            route_key: route_key.to_owned(),
            ..self.clone()
        }
    }
}
