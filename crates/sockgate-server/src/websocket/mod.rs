//! WebSocket connection handles and the per-socket session loop.

pub mod connection;
pub mod session;
