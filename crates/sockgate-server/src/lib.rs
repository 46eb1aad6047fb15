//! # sockgate-server
//!
//! Local WebSocket gateway emulator with connection-addressed pub/sub fan-out.
//!
//! - [`registry`]: which connections exist and who they are
//! - [`channels`]: channel membership, in memory or in a shared set store
//! - [`router`]: action-envelope dispatch
//! - [`gateway`]: post-to-connection delivery, local socket or remote management API
//! - [`emitter`]: target resolution and concurrent fan-out
//! - [`lifecycle`]: connect, route, disconnect
//! - [`server`]: axum transport, management API, health and metrics endpoints

pub mod auth;
pub mod builtin;
pub mod channels;
pub mod config;
pub mod context;
pub mod emitter;
pub mod errors;
pub mod gateway;
pub mod health;
pub mod lifecycle;
pub mod management;
pub mod metrics;
pub mod registry;
pub mod router;
pub mod server;
pub mod shutdown;
pub mod websocket;

#[cfg(test)]
pub(crate) mod test_support;

pub use auth::{AllowAll, StaticTokenAuth};
pub use channels::{ChannelStore, ChannelStoreError};
pub use config::{GatewayOptions, ServerConfig};
pub use context::GatewayContext;
pub use emitter::{DeliveryTarget, EmitSummary, SocketEmitter};
pub use errors::ServerError;
pub use gateway::{GatewayClient, GatewayError, UnifiedGatewayClient};
pub use lifecycle::{
    ConnectHandler, ConnectRequest, ConnectResponse, ConnectionLifecycle, DisconnectEvent,
    DisconnectHandler,
};
pub use registry::ConnectionRegistry;
pub use router::{ActionContext, ActionHandler, ActionRouter, RouteResult, handler_fn};
pub use server::{GatewayBuilder, GatewayServer};
