//! Action-envelope dispatch.
//!
//! Inbound frames are JSON objects carrying a string `action`. The router maps
//! the action to a handler (or the default handler) and returns the handler's
//! result untouched. Malformed envelopes never reach a handler.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use serde_json::Value;
use sockgate_core::context::DEFAULT_ROUTE;
use sockgate_core::{ConnectionId, RequestContext, UserContext};
use tracing::debug;

use crate::gateway::GatewayClient;
use crate::metrics::GATEWAY_ACTIONS_TOTAL;

/// Status and optional body a handler answers with.
///
/// A body is written back to the originating socket; a bodiless result sends
/// nothing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteResult {
    /// HTTP-style status.
    pub status_code: u16,
    /// Frame to send back to the sender.
    pub body: Option<String>,
}

impl RouteResult {
    /// `200` with no body.
    pub fn ok() -> Self {
        Self {
            status_code: 200,
            body: None,
        }
    }

    /// `200` with a JSON body.
    pub fn ok_json(body: &Value) -> Self {
        Self::with_status(200, body)
    }

    /// `400` with `{"error": message}`.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::with_status(400, &serde_json::json!({ "error": message.into() }))
    }

    /// Arbitrary status with a JSON body.
    pub fn with_status(status_code: u16, body: &Value) -> Self {
        Self {
            status_code,
            body: Some(body.to_string()),
        }
    }

    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// Everything a handler gets besides the raw body.
#[derive(Clone)]
pub struct ActionContext {
    /// Sender of the frame.
    pub connection_id: ConnectionId,
    /// Per-call context with the resolved route key stamped.
    pub request_context: RequestContext,
    /// Delivery to any connection, including the sender.
    pub deliver: Arc<dyn GatewayClient>,
    /// Identity attached to the sender at connect time.
    pub user_context: Option<UserContext>,
}

/// A routed action.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Handle `body` (the raw inbound frame).
    async fn handle(&self, body: &str, ctx: ActionContext) -> RouteResult;
}

/// [`ActionHandler`] over an async closure.
pub struct FnHandler<F>(F);

/// Wrap an async closure as a handler.
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(String, ActionContext) -> Fut + Send + Sync,
    Fut: Future<Output = RouteResult> + Send,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> ActionHandler for FnHandler<F>
where
    F: Fn(String, ActionContext) -> Fut + Send + Sync,
    Fut: Future<Output = RouteResult> + Send,
{
    async fn handle(&self, body: &str, ctx: ActionContext) -> RouteResult {
        (self.0)(body.to_owned(), ctx).await
    }
}

/// Dispatch table from action name to handler.
///
/// Registering an action twice replaces the earlier handler.
#[derive(Default)]
pub struct ActionRouter {
    routes: HashMap<String, Arc<dyn ActionHandler>>,
    default_handler: Option<Arc<dyn ActionHandler>>,
    log_envelopes: bool,
}

impl ActionRouter {
    /// Create an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Route `action` to `handler`, replacing any earlier registration.
    pub fn add_route(&mut self, action: &str, handler: impl ActionHandler + 'static) {
        self.add_shared_route(action, Arc::new(handler));
    }

    /// Route `action` to an already shared handler.
    pub fn add_shared_route(&mut self, action: &str, handler: Arc<dyn ActionHandler>) {
        if self.routes.insert(action.to_owned(), handler).is_some() {
            debug!(action, "route replaced");
        }
    }

    /// Handler for actions with no route.
    pub fn set_default_handler(&mut self, handler: impl ActionHandler + 'static) {
        self.default_handler = Some(Arc::new(handler));
    }

    /// Move every route of `other` into this router, replacing same-named
    /// routes. `other`'s default handler wins when it has one.
    pub fn merge(&mut self, other: ActionRouter) {
        for (action, handler) in other.routes {
            self.add_shared_route(&action, handler);
        }
        if other.default_handler.is_some() {
            self.default_handler = other.default_handler;
        }
        self.log_envelopes |= other.log_envelopes;
    }

    /// Log every dispatched envelope at debug level.
    pub fn set_log_envelopes(&mut self, enabled: bool) {
        self.log_envelopes = enabled;
    }

    /// Whether `action` has its own route.
    pub fn has_route(&self, action: &str) -> bool {
        self.routes.contains_key(action)
    }

    /// Registered action names (sorted).
    pub fn actions(&self) -> Vec<String> {
        let mut names: Vec<String> = self.routes.keys().cloned().collect();
        names.sort();
        names
    }

    /// Dispatch one inbound frame.
    #[tracing::instrument(skip_all, fields(connection_id = %connection_id))]
    pub async fn route(
        &self,
        connection_id: &ConnectionId,
        raw_body: &str,
        deliver: Arc<dyn GatewayClient>,
        request_context: &RequestContext,
        user_context: Option<UserContext>,
    ) -> RouteResult {
        let Ok(envelope) = serde_json::from_str::<Value>(raw_body) else {
            return RouteResult::bad_request("Invalid JSON");
        };
        let Some(action) = envelope.get("action").and_then(Value::as_str) else {
            return RouteResult::bad_request("Missing \"action\" field");
        };

        let (route_key, handler) = match self.routes.get(action) {
            Some(handler) => (action, handler),
            None => match &self.default_handler {
                Some(handler) => (DEFAULT_ROUTE, handler),
                None => return RouteResult::bad_request(format!("Unknown action: {action}")),
            },
        };

        if self.log_envelopes {
            debug!(action, route_key, body = raw_body, "dispatching envelope");
        }
        counter!(GATEWAY_ACTIONS_TOTAL, "action" => route_key.to_owned()).increment(1);

        let ctx = ActionContext {
            connection_id: connection_id.clone(),
            request_context: request_context.with_route_key(route_key),
            deliver,
            user_context,
        };
        handler.handle(raw_body, ctx).await
    }
}
