//! Delivery error taxonomy shared by every gateway backend.

use sockgate_core::ConnectionId;
use thiserror::Error;

/// Status carried by [`GatewayError::Gone`].
pub const GONE_STATUS: u16 = 410;

/// Failure of a single post-to-connection call.
///
/// `Gone` is expected churn (the recipient left). Everything else is a real
/// fault. Callers branch with [`GatewayError::is_gone`].
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The connection is unknown or no longer open.
    #[error("connection {connection_id} is gone")]
    Gone {
        /// Target connection.
        connection_id: ConnectionId,
    },
    /// The frame could not be handed to the socket or the remote API was unreachable.
    #[error("transport failure for {connection_id}: {message}")]
    Transport {
        /// Target connection.
        connection_id: ConnectionId,
        /// Underlying failure.
        message: String,
    },
    /// The remote management API answered with an unexpected status.
    #[error("management API returned {status} for {connection_id}: {body}")]
    Remote {
        /// Target connection.
        connection_id: ConnectionId,
        /// HTTP status.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },
    /// The payload could not be serialized.
    #[error("payload serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl GatewayError {
    /// Shorthand for a [`GatewayError::Gone`].
    pub fn gone(connection_id: &ConnectionId) -> Self {
        Self::Gone {
            connection_id: connection_id.clone(),
        }
    }

    /// Shorthand for a [`GatewayError::Transport`].
    pub fn transport(connection_id: &ConnectionId, message: impl Into<String>) -> Self {
        Self::Transport {
            connection_id: connection_id.clone(),
            message: message.into(),
        }
    }

    /// HTTP-style status for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Gone { .. } => GONE_STATUS,
            Self::Remote { status, .. } => *status,
            Self::Transport { .. } => 502,
            Self::Serialize(_) => 500,
        }
    }

    /// Whether the recipient has left.
    pub fn is_gone(&self) -> bool {
        matches!(self, Self::Gone { .. })
    }

    /// Stable label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Gone { .. } => "gone",
            Self::Transport { .. } => "transport",
            Self::Remote { .. } => "remote",
            Self::Serialize(_) => "serialize",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gone_is_410() {
        let err = GatewayError::gone(&ConnectionId::from("c1"));
        assert!(err.is_gone());
        assert_eq!(err.status_code(), 410);
        assert_eq!(err.to_string(), "connection c1 is gone");
    }

    #[test]
    fn other_variants_are_not_gone() {
        let id = ConnectionId::from("c1");
        let transport = GatewayError::transport(&id, "queue full");
        assert!(!transport.is_gone());
        assert_eq!(transport.status_code(), 502);

        let remote = GatewayError::Remote {
            connection_id: id,
            status: 500,
            body: "boom".into(),
        };
        assert!(!remote.is_gone());
        assert_eq!(remote.status_code(), 500);
        assert_eq!(remote.kind(), "remote");
    }
}
