//! Per-connection state machine: `CONNECTING -> OPEN -> CLOSED`.
//!
//! A rejected connection goes straight from CONNECTING to CLOSED and never
//! receives a frame: while CONNECTING it is invisible to target resolution and
//! local delivery reports it gone. Reconnecting always yields a new connection id.

use std::sync::Arc;

use async_trait::async_trait;
use metrics::{counter, gauge};
use serde_json::json;
use sockgate_core::{ConnectionId, EventType, RequestContext, UserContext};
use tracing::{debug, info, warn};

use crate::context::GatewayContext;
use crate::metrics::{
    WS_AUTH_REJECTIONS_TOTAL, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL,
};
use crate::router::{ActionRouter, RouteResult};
use crate::websocket::connection::{CLOSE_NORMAL, CLOSE_POLICY_VIOLATION, ConnectionHandle};

pub use crate::registry::ConnectionState;

/// Close reason sent to rejected connections.
pub const AUTH_FAILED_REASON: &str = "Authentication failed";

/// Input to the connect handler.
#[derive(Clone, Debug)]
pub struct ConnectRequest {
    /// Id assigned at registration.
    pub connection_id: ConnectionId,
    /// Handshake credential, if the client sent one.
    pub credential: Option<String>,
    /// `$connect` request context.
    pub request_context: RequestContext,
}

/// Connect handler verdict. Anything but `200` rejects the socket.
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectResponse {
    /// `200` accepts.
    pub status_code: u16,
    /// Identity to attach on acceptance.
    pub user_context: Option<UserContext>,
}

impl ConnectResponse {
    /// Accept without an identity.
    pub fn accept() -> Self {
        Self {
            status_code: 200,
            user_context: None,
        }
    }

    /// Accept as `user_context`.
    pub fn accept_as(user_context: UserContext) -> Self {
        Self {
            status_code: 200,
            user_context: Some(user_context),
        }
    }

    /// Reject with `status_code`.
    pub fn reject(status_code: u16) -> Self {
        Self {
            status_code,
            user_context: None,
        }
    }

    /// Whether the socket is accepted.
    pub fn is_accepted(&self) -> bool {
        self.status_code == 200
    }
}

/// Decides whether a new socket may open.
#[async_trait]
pub trait ConnectHandler: Send + Sync {
    /// Authenticate `request`.
    async fn on_connect(&self, request: ConnectRequest) -> ConnectResponse;
}

/// What the disconnect hook learns about a closed connection.
#[derive(Clone, Debug)]
pub struct DisconnectEvent {
    /// The closed connection.
    pub connection_id: ConnectionId,
    /// Identity it carried, if any.
    pub user_context: Option<UserContext>,
    /// `$disconnect` request context.
    pub request_context: RequestContext,
}

/// Runs after channel cleanup, before the connection leaves the registry.
#[async_trait]
pub trait DisconnectHandler: Send + Sync {
    /// React to a closed connection.
    async fn on_disconnect(&self, event: DisconnectEvent);
}

/// Result of [`ConnectionLifecycle::open`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// The connection is OPEN.
    Open(ConnectionId),
    /// The connect handler refused; the socket is closed and unregistered.
    Rejected {
        /// Id the socket held while CONNECTING.
        connection_id: ConnectionId,
        /// Status the connect handler returned.
        status_code: u16,
    },
}

impl ConnectOutcome {
    /// State the connection ended up in.
    pub fn state(&self) -> ConnectionState {
        match self {
            Self::Open(_) => ConnectionState::Open,
            Self::Rejected { .. } => ConnectionState::Closed,
        }
    }
}

/// Drives connect, frame routing and teardown for every socket.
pub struct ConnectionLifecycle {
    context: GatewayContext,
    router: Arc<ActionRouter>,
    connect_handler: Arc<dyn ConnectHandler>,
    disconnect_handler: Option<Arc<dyn DisconnectHandler>>,
}

impl ConnectionLifecycle {
    /// Lifecycle over `context`, dispatching frames through `router`.
    pub fn new(
        context: GatewayContext,
        router: Arc<ActionRouter>,
        connect_handler: Arc<dyn ConnectHandler>,
        disconnect_handler: Option<Arc<dyn DisconnectHandler>>,
    ) -> Self {
        Self {
            context,
            router,
            connect_handler,
            disconnect_handler,
        }
    }

    /// Shared components.
    pub fn context(&self) -> &GatewayContext {
        &self.context
    }

    fn request_context(&self, connection_id: &ConnectionId, event_type: EventType) -> RequestContext {
        RequestContext::new(
            connection_id.clone(),
            event_type,
            &self.context.options.domain_name,
            &self.context.options.stage,
        )
    }

    /// Register `handle`, authenticate it and either open or reject it.
    pub async fn open(
        &self,
        handle: Arc<dyn ConnectionHandle>,
        credential: Option<String>,
    ) -> ConnectOutcome {
        let registry = &self.context.registry;
        let connection_id = registry.register_connecting(handle.clone());
        counter!(WS_CONNECTIONS_TOTAL).increment(1);
        debug!(connection_id = %connection_id, state = ?ConnectionState::Connecting, "socket registered");

        let request = ConnectRequest {
            connection_id: connection_id.clone(),
            credential,
            request_context: self.request_context(&connection_id, EventType::Connect),
        };
        let response = self.connect_handler.on_connect(request).await;

        if !response.is_accepted() {
            handle.close(CLOSE_POLICY_VIOLATION, AUTH_FAILED_REASON);
            let _ = registry.unregister(&connection_id);
            counter!(WS_AUTH_REJECTIONS_TOTAL).increment(1);
            info!(connection_id = %connection_id, status = response.status_code, "connection rejected");
            return ConnectOutcome::Rejected {
                connection_id,
                status_code: response.status_code,
            };
        }

        let user_id = response
            .user_context
            .as_ref()
            .and_then(|ctx| ctx.user_id.clone());
        if let Some(user_context) = response.user_context {
            let _ = registry.set_user_context(&connection_id, user_context);
        }

        let mut welcome = json!({ "type": "connected", "connectionId": connection_id });
        if let Some(user_id) = &user_id {
            welcome["userId"] = json!(user_id);
        }
        if let Err(e) = handle.send(Arc::new(welcome.to_string())) {
            warn!(connection_id = %connection_id, error = %e, "failed to queue welcome frame");
        }
        // After the welcome so it is always the first frame the client sees.
        let _ = registry.mark_open(&connection_id);

        gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
        info!(connection_id = %connection_id, user_id = ?user_id, "connection open");
        ConnectOutcome::Open(connection_id)
    }

    /// Route one inbound frame and write any response body back to the sender.
    pub async fn handle_frame(&self, connection_id: &ConnectionId, raw: &str) -> RouteResult {
        let registry = &self.context.registry;
        registry.touch(connection_id);

        let request_context = self.request_context(connection_id, EventType::Message);
        let result = self
            .router
            .route(
                connection_id,
                raw,
                self.context.deliver(),
                &request_context,
                registry.get_user_context(connection_id),
            )
            .await;

        if let Some(body) = &result.body {
            match registry.get(connection_id) {
                Some(handle) => {
                    if let Err(e) = handle.send(Arc::new(body.clone())) {
                        debug!(connection_id = %connection_id, error = %e, "response not delivered");
                    }
                }
                None => debug!(connection_id = %connection_id, "sender left before response"),
            }
        }
        result
    }

    /// Tear down `connection_id`: channel cleanup, disconnect hook, unregister.
    ///
    /// Memberships go first so a concurrent fan-out never resolves a channel
    /// member the registry can no longer reach. Calling this for an unknown
    /// id is a no-op.
    pub async fn close(&self, connection_id: &ConnectionId) {
        let registry = &self.context.registry;
        let Some(handle) = registry.get(connection_id) else {
            return;
        };
        handle.close(CLOSE_NORMAL, "");

        if let Err(e) = self.context.channels.remove_all(connection_id).await {
            warn!(connection_id = %connection_id, error = %e, "channel cleanup failed");
        }

        if let Some(hook) = &self.disconnect_handler {
            let event = DisconnectEvent {
                connection_id: connection_id.clone(),
                user_context: registry.get_user_context(connection_id),
                request_context: self.request_context(connection_id, EventType::Disconnect),
            };
            hook.on_disconnect(event).await;
        }

        if registry.unregister(connection_id) {
            counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
            gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
            info!(connection_id = %connection_id, state = ?ConnectionState::Closed, "connection closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AllowAll;
    use crate::config::GatewayOptions;
    use crate::router::handler_fn;
    use crate::test_support::RecordingHandle;
    use parking_lot::Mutex;
    use serde_json::Value;

    struct RejectAll;

    #[async_trait]
    impl ConnectHandler for RejectAll {
        async fn on_connect(&self, _request: ConnectRequest) -> ConnectResponse {
            ConnectResponse::reject(401)
        }
    }

    /// Parks in `on_connect` until released, then rejects.
    #[derive(Default)]
    struct SlowReject {
        entered: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait]
    impl ConnectHandler for SlowReject {
        async fn on_connect(&self, _request: ConnectRequest) -> ConnectResponse {
            self.entered.notify_one();
            self.release.notified().await;
            ConnectResponse::reject(401)
        }
    }

    struct AsUser(&'static str);

    #[async_trait]
    impl ConnectHandler for AsUser {
        async fn on_connect(&self, request: ConnectRequest) -> ConnectResponse {
            assert_eq!(request.request_context.route_key, "$connect");
            ConnectResponse::accept_as(UserContext::new(self.0, "org"))
        }
    }

    /// Captures what the hook sees, including whether memberships were
    /// already gone and the connection still registered.
    struct RecordingHook {
        context: GatewayContext,
        seen: Mutex<Vec<(DisconnectEvent, Vec<String>, bool)>>,
    }

    #[async_trait]
    impl DisconnectHandler for RecordingHook {
        async fn on_disconnect(&self, event: DisconnectEvent) {
            let channels = self
                .context
                .channels
                .get_channels(&event.connection_id)
                .await
                .unwrap();
            let registered = self.context.registry.contains(&event.connection_id);
            self.seen.lock().push((event, channels, registered));
        }
    }

    fn lifecycle_with(connect: Arc<dyn ConnectHandler>) -> ConnectionLifecycle {
        let context = GatewayContext::in_memory(GatewayOptions::default());
        let mut router = ActionRouter::new();
        router.add_route(
            "echo",
            handler_fn(|body, _ctx| async move { RouteResult::ok_json(&json!({ "echo": body })) }),
        );
        router.add_route("quiet", handler_fn(|_body, _ctx| async { RouteResult::ok() }));
        ConnectionLifecycle::new(context, Arc::new(router), connect, None)
    }

    fn opened(outcome: ConnectOutcome) -> ConnectionId {
        match outcome {
            ConnectOutcome::Open(id) => id,
            other => panic!("expected open, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn accepted_connection_gets_welcome_frame() {
        let lifecycle = lifecycle_with(Arc::new(AllowAll));
        let handle = RecordingHandle::shared();

        let outcome = lifecycle.open(handle.clone(), None).await;
        assert_eq!(outcome.state(), ConnectionState::Open);
        let id = opened(outcome);

        assert_eq!(
            handle.json_frames(),
            vec![json!({"type": "connected", "connectionId": id})]
        );
        assert!(lifecycle.context().registry.contains(&id));
    }

    #[tokio::test]
    async fn welcome_frame_includes_user_id() {
        let lifecycle = lifecycle_with(Arc::new(AsUser("u1")));
        let handle = RecordingHandle::shared();

        let id = opened(lifecycle.open(handle.clone(), Some("tok".into())).await);

        assert_eq!(handle.json_frames()[0]["userId"], "u1");
        let ctx = lifecycle.context().registry.get_user_context(&id).unwrap();
        assert!(ctx.is_org("org"));
    }

    #[tokio::test]
    async fn rejected_connection_closed_and_unregistered() {
        let lifecycle = lifecycle_with(Arc::new(RejectAll));
        let handle = RecordingHandle::shared();

        let outcome = lifecycle.open(handle.clone(), Some("bad".into())).await;

        assert_eq!(outcome.state(), ConnectionState::Closed);
        assert!(matches!(outcome, ConnectOutcome::Rejected { status_code: 401, .. }));
        assert_eq!(handle.close_record(), Some((1008, "Authentication failed".to_string())));
        assert!(handle.frames().is_empty());
        assert!(lifecycle.context().registry.is_empty());
    }

    #[tokio::test]
    async fn frame_response_written_back_to_sender() {
        let lifecycle = lifecycle_with(Arc::new(AllowAll));
        let handle = RecordingHandle::shared();
        let id = opened(lifecycle.open(handle.clone(), None).await);

        let result = lifecycle.handle_frame(&id, r#"{"action":"echo"}"#).await;
        assert_eq!(result.status_code, 200);
        let _ = lifecycle.handle_frame(&id, r#"{"action":"quiet"}"#).await;
        let result = lifecycle.handle_frame(&id, "garbage").await;
        assert_eq!(result.status_code, 400);

        let frames = handle.json_frames();
        assert_eq!(frames.len(), 3, "welcome, echo, error; quiet sends nothing");
        assert_eq!(frames[1], json!({"echo": r#"{"action":"echo"}"#}));
        assert_eq!(frames[2], json!({"error": "Invalid JSON"}));
    }

    #[tokio::test]
    async fn close_cleans_channels_before_unregister() {
        let context = GatewayContext::in_memory(GatewayOptions::default());
        let hook = Arc::new(RecordingHook {
            context: context.clone(),
            seen: Mutex::new(Vec::new()),
        });
        let lifecycle = ConnectionLifecycle::new(
            context.clone(),
            Arc::new(ActionRouter::new()),
            Arc::new(AsUser("u9")),
            Some(hook.clone()),
        );
        let handle = RecordingHandle::shared();
        let id = opened(lifecycle.open(handle.clone(), None).await);
        context.channels.subscribe(&id, "a").await.unwrap();
        context.channels.subscribe(&id, "b").await.unwrap();

        lifecycle.close(&id).await;
        lifecycle.close(&id).await;

        let seen = hook.seen.lock();
        assert_eq!(seen.len(), 1, "hook runs once");
        let (event, channels_at_hook, registered_at_hook) = &seen[0];
        assert_eq!(event.connection_id, id);
        assert!(event.user_context.as_ref().unwrap().is_user("u9"));
        assert_eq!(event.request_context.route_key, "$disconnect");
        assert!(channels_at_hook.is_empty());
        assert!(*registered_at_hook);

        assert!(!handle.is_open());
        assert!(!context.registry.contains(&id));
        assert!(context.channels.get_subscribers("a").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn frames_from_unknown_connection_still_answered_safely() {
        let lifecycle = lifecycle_with(Arc::new(AllowAll));
        let result = lifecycle
            .handle_frame(&ConnectionId::from("ghost"), r#"{"action":"echo"}"#)
            .await;
        assert_eq!(result.status_code, 200);
        let _: Value = serde_json::from_str(result.body.as_deref().unwrap()).unwrap();
    }

    #[tokio::test]
    async fn connecting_socket_receives_nothing_before_rejection() {
        let gate = Arc::new(SlowReject::default());
        let lifecycle = Arc::new(lifecycle_with(gate.clone()));
        let handle = RecordingHandle::shared();

        let opening = tokio::spawn({
            let lifecycle = Arc::clone(&lifecycle);
            let handle = handle.clone();
            async move { lifecycle.open(handle, Some("bad".into())).await }
        });
        gate.entered.notified().await;

        let context = lifecycle.context();
        let pending = context.registry.all_ids();
        assert_eq!(pending.len(), 1);
        assert_eq!(context.registry.state(&pending[0]), Some(ConnectionState::Connecting));

        let summary = context.emitter.broadcast(json!({"secret": "org-data"})).await;
        assert_eq!(summary.resolved, 0);
        let direct = context
            .deliver()
            .post_to_connection(&pending[0], &json!({"secret": "direct"}).into())
            .await;
        assert!(direct.unwrap_err().is_gone());

        gate.release.notify_one();
        let outcome = opening.await.unwrap();

        assert!(matches!(outcome, ConnectOutcome::Rejected { status_code: 401, .. }));
        assert!(handle.frames().is_empty());
        assert_eq!(handle.close_record(), Some((1008, "Authentication failed".to_string())));
        assert!(context.registry.is_empty());
    }
}
