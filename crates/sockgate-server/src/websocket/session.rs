//! One WebSocket from upgrade to teardown.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::connection::{
    CLOSE_GOING_AWAY, CLOSE_NORMAL, CLOSE_POLICY_VIOLATION, ConnectionHandle, WsConnection,
};
use crate::config::ServerConfig;
use crate::lifecycle::{ConnectOutcome, ConnectionLifecycle};
use crate::shutdown::SHUTDOWN_REASON;

/// Close reason used when a client stops answering pings.
pub const HEARTBEAT_TIMEOUT_REASON: &str = "Heartbeat timeout";

/// Drive one socket through the connection lifecycle.
///
/// A writer task drains the connection's outbound queue and sends pings; the
/// calling task reads frames and routes them one at a time, so each
/// connection's frames are handled in arrival order.
#[instrument(skip_all, fields(connection_id))]
pub async fn run_ws_session(
    ws: WebSocket,
    lifecycle: Arc<ConnectionLifecycle>,
    config: Arc<ServerConfig>,
    credential: Option<String>,
    shutdown: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (send_tx, mut send_rx) = mpsc::channel::<Arc<String>>(config.send_buffer_size);
    let connection = Arc::new(WsConnection::new(send_tx));
    let closed = connection.closed();

    let writer_conn = connection.clone();
    let writer_closed = closed.clone();
    let interval = config.heartbeat_interval;
    let timeout = config.heartbeat_timeout;
    let writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval(interval);
        let _ = ping.tick().await;

        loop {
            tokio::select! {
                biased;
                () = writer_closed.cancelled() => {
                    let (code, reason) = writer_conn
                        .close_frame()
                        .unwrap_or((CLOSE_NORMAL, String::new()));
                    // Frames queued before the close still go out, except to a
                    // socket refused at connect time.
                    if code == CLOSE_POLICY_VIOLATION {
                        send_rx.close();
                    } else {
                        while let Ok(frame) = send_rx.try_recv() {
                            if ws_tx.send(Message::Text(frame.as_str().to_owned().into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    let frame = CloseFrame { code, reason: reason.into() };
                    let _ = ws_tx.send(Message::Close(Some(frame))).await;
                    break;
                }
                msg = send_rx.recv() => {
                    let Some(frame) = msg else { break };
                    if ws_tx.send(Message::Text(frame.as_str().to_owned().into())).await.is_err() {
                        break;
                    }
                }
                _ = ping.tick() => {
                    let idle = writer_conn.idle_for();
                    if idle > timeout {
                        warn!(silent_for = ?idle, "client unresponsive, closing");
                        writer_conn.close(CLOSE_GOING_AWAY, HEARTBEAT_TIMEOUT_REASON);
                        continue;
                    }
                    if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
        // Whatever ended the writer, nothing more can be delivered.
        writer_conn.close(CLOSE_NORMAL, "");
    });

    let connection_id = match lifecycle.open(connection.clone(), credential).await {
        ConnectOutcome::Open(id) => id,
        ConnectOutcome::Rejected { .. } => {
            let _ = writer.await;
            return;
        }
    };
    let _ = tracing::Span::current().record("connection_id", connection_id.as_str());

    loop {
        tokio::select! {
            () = closed.cancelled() => {
                debug!("socket closed by server");
                break;
            }
            () = shutdown.cancelled() => {
                connection.close(CLOSE_GOING_AWAY, SHUTDOWN_REASON);
                break;
            }
            msg = ws_rx.next() => {
                let Some(Ok(msg)) = msg else { break };
                connection.record_activity();
                let text = match msg {
                    Message::Text(t) => t.as_str().to_owned(),
                    Message::Binary(data) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => text,
                        Err(_) => {
                            debug!(len = data.len(), "ignoring non-UTF-8 binary frame");
                            continue;
                        }
                    },
                    Message::Close(frame) => {
                        debug!(code = ?frame.as_ref().map(|f| f.code), "client sent close frame");
                        break;
                    }
                    Message::Ping(_) | Message::Pong(_) => continue,
                };
                let _ = lifecycle.handle_frame(&connection_id, &text).await;
            }
        }
    }

    lifecycle.close(&connection_id).await;
    if writer.await.is_err() {
        warn!("writer task panicked");
    }
    info!(
        open_secs = connection.open_for().as_secs(),
        full_drops = connection.full_drops(),
        "session ended"
    );
}
