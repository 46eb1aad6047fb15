//! `GatewayServer`: axum HTTP + WebSocket listener.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::auth::AllowAll;
use crate::builtin;
use crate::config::{GatewayOptions, ServerConfig};
use crate::context::GatewayContext;
use crate::errors::ServerError;
use crate::health::{self, HealthResponse};
use crate::lifecycle::{ConnectHandler, ConnectionLifecycle, DisconnectHandler};
use crate::management;
use crate::router::{ActionHandler, ActionRouter};
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::session::run_ws_session;

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Connection state machine and shared components.
    pub lifecycle: Arc<ConnectionLifecycle>,
    /// Listener and per-socket limits.
    pub config: Arc<ServerConfig>,
    /// Shutdown signal.
    pub shutdown: ShutdownCoordinator,
    /// When the server was built.
    pub start_time: Instant,
    /// Prometheus handle for `/metrics`, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// Assembles a [`GatewayServer`] from configuration and code-level options.
pub struct GatewayBuilder {
    config: ServerConfig,
    options: GatewayOptions,
    context: Option<GatewayContext>,
    routes: ActionRouter,
    builtin_handlers: bool,
    connect_handler: Arc<dyn ConnectHandler>,
    disconnect_handler: Option<Arc<dyn DisconnectHandler>>,
    metrics: Option<PrometheusHandle>,
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self {
            config: ServerConfig::default(),
            options: GatewayOptions::default(),
            context: None,
            routes: ActionRouter::new(),
            builtin_handlers: false,
            connect_handler: Arc::new(AllowAll),
            disconnect_handler: None,
            metrics: None,
        }
    }
}

impl GatewayBuilder {
    /// Listener configuration.
    #[must_use]
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Request-context values, used when no context is supplied.
    #[must_use]
    pub fn options(mut self, options: GatewayOptions) -> Self {
        self.options = options;
        self
    }

    /// Use a prebuilt context (e.g. one with an external channel store).
    #[must_use]
    pub fn context(mut self, context: GatewayContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Route `action` to `handler`. Overrides a built-in of the same name.
    #[must_use]
    pub fn route(mut self, action: &str, handler: impl ActionHandler + 'static) -> Self {
        self.routes.add_route(action, handler);
        self
    }

    /// Handler for actions with no route.
    #[must_use]
    pub fn default_handler(mut self, handler: impl ActionHandler + 'static) -> Self {
        self.routes.set_default_handler(handler);
        self
    }

    /// Install `ping`, `subscribe`, `unsubscribe`, `publish` and `send`.
    #[must_use]
    pub fn builtin_handlers(mut self) -> Self {
        self.builtin_handlers = true;
        self
    }

    /// Authenticate new sockets with `handler`. Defaults to [`AllowAll`].
    #[must_use]
    pub fn connect_handler(mut self, handler: impl ConnectHandler + 'static) -> Self {
        self.connect_handler = Arc::new(handler);
        self
    }

    /// Run `handler` for every closed connection.
    #[must_use]
    pub fn disconnect_handler(mut self, handler: impl DisconnectHandler + 'static) -> Self {
        self.disconnect_handler = Some(Arc::new(handler));
        self
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the server.
    pub fn build(self) -> GatewayServer {
        let context = self
            .context
            .unwrap_or_else(|| GatewayContext::in_memory(self.options));

        let mut router = ActionRouter::new();
        if self.builtin_handlers {
            builtin::register_all(&mut router, &context);
        }
        router.merge(self.routes);
        router.set_log_envelopes(context.options.debug);
        info!(actions = ?router.actions(), "action routes registered");

        let lifecycle = ConnectionLifecycle::new(
            context,
            Arc::new(router),
            self.connect_handler,
            self.disconnect_handler,
        );

        GatewayServer {
            config: Arc::new(self.config),
            lifecycle: Arc::new(lifecycle),
            shutdown: ShutdownCoordinator::new(),
            start_time: Instant::now(),
            metrics: self.metrics,
        }
    }
}

/// The gateway server.
pub struct GatewayServer {
    config: Arc<ServerConfig>,
    lifecycle: Arc<ConnectionLifecycle>,
    shutdown: ShutdownCoordinator,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl GatewayServer {
    /// Start building a server.
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::default()
    }

    /// Build the axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            lifecycle: self.lifecycle.clone(),
            config: self.config.clone(),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route(&self.config.websocket_path, get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .merge(management::routes())
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// Returns the bound address (useful with port `0`) and the server task.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        info!(%addr, path = %self.config.websocket_path, "gateway listening");

        let app = self.router();
        let token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!(error = %e, "server error");
            }
        });
        Ok((addr, handle))
    }

    /// Close every socket, then wait for the server task.
    pub async fn shutdown_gracefully(&self, server: JoinHandle<()>, timeout: Option<Duration>) {
        self.shutdown
            .drain(&self.lifecycle.context().registry, server, timeout)
            .await;
    }

    /// Shared components.
    pub fn context(&self) -> &GatewayContext {
        self.lifecycle.context()
    }

    /// Connection state machine.
    pub fn lifecycle(&self) -> &Arc<ConnectionLifecycle> {
        &self.lifecycle
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &ShutdownCoordinator {
        &self.shutdown
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// Handshake credential: `?token=` first, then `Authorization: Bearer`.
pub fn extract_credential(query: &HashMap<String, String>, headers: &HeaderMap) -> Option<String> {
    if let Some(token) = query.get("token").filter(|t| !t.is_empty()) {
        return Some(token.clone());
    }
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_owned)
}

/// GET <websocketPath>
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let credential = extract_credential(&query, &headers);
    let token = state.shutdown.token();
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| {
            run_ws_session(socket, state.lifecycle, state.config, credential, token)
        })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = state.lifecycle.context().registry.len();
    Json(health::health_check(state.start_time, connections))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}
