//! # sockgate-core
//!
//! Foundation types shared by every sockgate crate.
//!
//! - [`ConnectionId`]: opaque, never-reused identifier for one live socket
//! - [`UserContext`]: application identity attached after a successful connect
//! - [`RequestContext`]: per-event context handed to handlers (read-only)
//! - [`Payload`]: outbound data, either pre-serialized text or a JSON value
//! - [`logging`]: `tracing` subscriber setup

pub mod context;
pub mod ids;
pub mod logging;
pub mod payload;

pub use context::{EventType, RequestContext, UserContext};
pub use ids::ConnectionId;
pub use payload::Payload;
