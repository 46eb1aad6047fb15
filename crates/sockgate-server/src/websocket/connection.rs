//! Socket handles owned by the connection registry.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

/// Close code for a normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// Close code used when the server gives up on a silent client.
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// Close code used when the connect handler rejects the socket.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// Why a frame could not be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendError {
    /// The socket is closed or closing.
    #[error("connection closed")]
    Closed,
    /// The outbound queue is full.
    #[error("send buffer full")]
    Full,
}

/// Opaque handle over one live socket.
///
/// Implementations must be cheap to call from many tasks at once; delivery
/// code never holds a registry lock while calling them.
pub trait ConnectionHandle: Send + Sync {
    /// Queue a text frame.
    fn send(&self, frame: Arc<String>) -> Result<(), SendError>;
    /// Close the socket with `code` and `reason`. Idempotent.
    fn close(&self, code: u16, reason: &str);
    /// Whether frames can still be delivered.
    fn is_open(&self) -> bool;
}

/// Handle for an axum WebSocket, drained by the session's writer task.
pub struct WsConnection {
    tx: mpsc::Sender<Arc<String>>,
    open: AtomicBool,
    closed: CancellationToken,
    close_frame: Mutex<Option<(u16, String)>>,
    last_seen: Mutex<Instant>,
    full_drops: AtomicU64,
    opened_at: Instant,
}

impl WsConnection {
    /// Create a handle feeding `tx`.
    pub fn new(tx: mpsc::Sender<Arc<String>>) -> Self {
        let now = Instant::now();
        Self {
            tx,
            open: AtomicBool::new(true),
            closed: CancellationToken::new(),
            close_frame: Mutex::new(None),
            last_seen: Mutex::new(now),
            full_drops: AtomicU64::new(0),
            opened_at: now,
        }
    }

    /// Token cancelled once [`ConnectionHandle::close`] has been called.
    pub fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Code and reason recorded by the first close call.
    pub fn close_frame(&self) -> Option<(u16, String)> {
        self.close_frame.lock().clone()
    }

    /// Record inbound traffic from the client (any frame, including pongs).
    pub fn record_activity(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    /// Time since the client was last heard from.
    pub fn idle_for(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Frames rejected with [`SendError::Full`].
    pub fn full_drops(&self) -> u64 {
        self.full_drops.load(Ordering::Relaxed)
    }

    /// Time since the handle was created.
    pub fn open_for(&self) -> Duration {
        self.opened_at.elapsed()
    }
}

impl ConnectionHandle for WsConnection {
    fn send(&self, frame: Arc<String>) -> Result<(), SendError> {
        if !self.is_open() {
            return Err(SendError::Closed);
        }
        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                let _ = self.full_drops.fetch_add(1, Ordering::Relaxed);
                Err(SendError::Full)
            }
            Err(TrySendError::Closed(_)) => {
                self.open.store(false, Ordering::Release);
                Err(SendError::Closed)
            }
        }
    }

    fn close(&self, code: u16, reason: &str) {
        if self.open.swap(false, Ordering::AcqRel) {
            *self.close_frame.lock() = Some((code, reason.to_owned()));
        }
        self.closed.cancel();
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.tx.is_closed()
    }
}
