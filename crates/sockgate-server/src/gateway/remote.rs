//! Delivery through a remote connection management API.
//!
//! Speaks the `@connections` protocol: `POST` delivers a frame, `GET`
//! describes a connection, `DELETE` closes it. The local management routes in
//! [`crate::management`] serve the same protocol, so this client can target
//! another sockgate process as well as a managed gateway.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use sockgate_core::{ConnectionId, Payload, UserContext};
use tracing::debug;

use super::{GatewayClient, GatewayError};
use crate::registry::ConnectionInfo;

/// Longest response body kept in a [`GatewayError::Remote`].
const MAX_ERROR_BODY: usize = 512;

/// Where the management API lives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteEndpoint {
    /// Base URL, e.g. `https://abc.execute-api.example.com/prod`.
    pub url: String,
    /// Bearer token attached to every call.
    pub auth_token: Option<String>,
}

impl RemoteEndpoint {
    /// Endpoint at `url` without credentials.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auth_token: None,
        }
    }

    /// Attach a bearer token.
    #[must_use]
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// URL of the `@connections` resource for `connection_id`.
    pub fn connection_url(&self, connection_id: &ConnectionId) -> String {
        format!(
            "{}/@connections/{}",
            self.url.trim_end_matches('/'),
            urlencoding::encode(connection_id)
        )
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionDescription {
    connected_at: DateTime<Utc>,
    last_active_at: DateTime<Utc>,
    #[serde(default)]
    identity: Option<UserContext>,
}

/// [`GatewayClient`] calling a remote management API over HTTP.
#[derive(Clone)]
pub struct RemoteGatewayClient {
    endpoint: RemoteEndpoint,
    client: reqwest::Client,
}

impl RemoteGatewayClient {
    /// Client for `endpoint` with a fresh HTTP client.
    pub fn new(endpoint: RemoteEndpoint) -> Self {
        Self::with_client(endpoint, reqwest::Client::new())
    }

    /// Client for `endpoint` reusing `client`.
    pub fn with_client(endpoint: RemoteEndpoint, client: reqwest::Client) -> Self {
        Self { endpoint, client }
    }

    /// Target endpoint.
    pub fn endpoint(&self) -> &RemoteEndpoint {
        &self.endpoint
    }

    fn request(&self, method: reqwest::Method, connection_id: &ConnectionId) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, self.endpoint.connection_url(connection_id));
        match &self.endpoint.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(
        &self,
        builder: reqwest::RequestBuilder,
        connection_id: &ConnectionId,
    ) -> Result<Response, GatewayError> {
        let resp = builder
            .send()
            .await
            .map_err(|e| GatewayError::transport(connection_id, e.to_string()))?;
        check_status(resp, connection_id).await
    }
}

/// Map the management API's status onto the shared error taxonomy.
async fn check_status(
    resp: Response,
    connection_id: &ConnectionId,
) -> Result<Response, GatewayError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == StatusCode::GONE || status == StatusCode::NOT_FOUND {
        debug!(connection_id = %connection_id, status = status.as_u16(), "remote reports connection gone");
        return Err(GatewayError::gone(connection_id));
    }
    let mut body = resp.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    Err(GatewayError::Remote {
        connection_id: connection_id.clone(),
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl GatewayClient for RemoteGatewayClient {
    async fn post_to_connection(
        &self,
        connection_id: &ConnectionId,
        data: &Payload,
    ) -> Result<(), GatewayError> {
        let frame = data.to_frame()?;
        let builder = self
            .request(reqwest::Method::POST, connection_id)
            .body(frame.as_str().to_owned());
        let _ = self.send(builder, connection_id).await?;
        Ok(())
    }

    async fn get_connection(
        &self,
        connection_id: &ConnectionId,
    ) -> Result<ConnectionInfo, GatewayError> {
        let builder = self.request(reqwest::Method::GET, connection_id);
        let resp = self.send(builder, connection_id).await?;
        let description: ConnectionDescription = resp
            .json()
            .await
            .map_err(|e| GatewayError::transport(connection_id, e.to_string()))?;
        Ok(ConnectionInfo {
            connection_id: connection_id.clone(),
            connected_at: description.connected_at,
            last_active_at: description.last_active_at,
            identity: description.identity,
        })
    }

    async fn delete_connection(&self, connection_id: &ConnectionId) -> Result<(), GatewayError> {
        let builder = self.request(reqwest::Method::DELETE, connection_id);
        let _ = self.send(builder, connection_id).await?;
        Ok(())
    }
}
