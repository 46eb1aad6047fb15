//! Built-in connect handlers.

use std::collections::HashMap;

use async_trait::async_trait;
use sockgate_core::UserContext;
use sockgate_settings::AuthSettings;
use tracing::debug;

use crate::lifecycle::{ConnectHandler, ConnectRequest, ConnectResponse};

/// Accepts every socket without an identity.
#[derive(Clone, Copy, Debug, Default)]
pub struct AllowAll;

#[async_trait]
impl ConnectHandler for AllowAll {
    async fn on_connect(&self, _request: ConnectRequest) -> ConnectResponse {
        ConnectResponse::accept()
    }
}

/// Maps handshake tokens to identities.
///
/// A listed token is accepted with its identity. An unlisted or missing token
/// is rejected with `401` when `required`, and accepted anonymously otherwise.
#[derive(Clone, Debug, Default)]
pub struct StaticTokenAuth {
    tokens: HashMap<String, UserContext>,
    required: bool,
}

impl StaticTokenAuth {
    /// Handler over `tokens`.
    pub fn new(tokens: HashMap<String, UserContext>, required: bool) -> Self {
        Self { tokens, required }
    }

    /// Handler configured from the `auth` settings section.
    pub fn from_settings(settings: &AuthSettings) -> Self {
        Self::new(settings.tokens.clone(), settings.required)
    }
}

#[async_trait]
impl ConnectHandler for StaticTokenAuth {
    async fn on_connect(&self, request: ConnectRequest) -> ConnectResponse {
        let identity = request
            .credential
            .as_deref()
            .and_then(|token| self.tokens.get(token));
        match identity {
            Some(ctx) => ConnectResponse::accept_as(ctx.clone()),
            None if self.required => {
                debug!(
                    connection_id = %request.connection_id,
                    has_credential = request.credential.is_some(),
                    "credential not recognised"
                );
                ConnectResponse::reject(401)
            }
            None => ConnectResponse::accept(),
        }
    }
}
