//! Server-level errors.

use thiserror::Error;

use crate::channels::ChannelStoreError;

/// Failures while building or running the gateway server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding or serving failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The channel store backend could not be reached.
    #[error("channel store unavailable: {0}")]
    ChannelStore(#[from] ChannelStoreError),
    /// A configured value is unusable.
    #[error("invalid configuration: {0}")]
    Config(String),
}
