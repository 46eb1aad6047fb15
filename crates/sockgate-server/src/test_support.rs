//! Test doubles shared across unit tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use sockgate_core::{ConnectionId, Payload};

use crate::gateway::{GatewayClient, GatewayError};
use crate::registry::ConnectionInfo;
use crate::websocket::connection::{ConnectionHandle, SendError};

/// Handle that records every frame and close call.
pub struct RecordingHandle {
    frames: Mutex<Vec<String>>,
    close: Mutex<Option<(u16, String)>>,
    open: AtomicBool,
    fail_with: Mutex<Option<SendError>>,
}

impl RecordingHandle {
    pub fn new() -> Self {
        Self {
            frames: Mutex::new(Vec::new()),
            close: Mutex::new(None),
            open: AtomicBool::new(true),
            fail_with: Mutex::new(None),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn frames(&self) -> Vec<String> {
        self.frames.lock().clone()
    }

    pub fn json_frames(&self) -> Vec<serde_json::Value> {
        self.frames()
            .iter()
            .map(|f| serde_json::from_str(f).unwrap())
            .collect()
    }

    pub fn close_record(&self) -> Option<(u16, String)> {
        self.close.lock().clone()
    }

    pub fn fail_sends_with(&self, err: SendError) {
        *self.fail_with.lock() = Some(err);
    }
}

impl ConnectionHandle for RecordingHandle {
    fn send(&self, frame: Arc<String>) -> Result<(), SendError> {
        if let Some(err) = *self.fail_with.lock() {
            return Err(err);
        }
        if !self.is_open() {
            return Err(SendError::Closed);
        }
        self.frames.lock().push(frame.as_str().to_owned());
        Ok(())
    }

    fn close(&self, code: u16, reason: &str) {
        if self.open.swap(false, Ordering::SeqCst) {
            *self.close.lock() = Some((code, reason.to_owned()));
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// What a [`ScriptedGateway`] does for one connection id.
#[derive(Clone, Copy, Debug)]
pub enum Scripted {
    Deliver,
    Gone,
    Fail,
}

/// Gateway that records deliveries and fails on command.
#[derive(Default)]
pub struct ScriptedGateway {
    script: Mutex<HashMap<ConnectionId, Scripted>>,
    delivered: Mutex<Vec<(ConnectionId, Arc<String>)>>,
}

impl ScriptedGateway {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, id: &ConnectionId, behavior: Scripted) {
        let _ = self.script.lock().insert(id.clone(), behavior);
    }

    pub fn delivered(&self) -> Vec<(ConnectionId, Arc<String>)> {
        self.delivered.lock().clone()
    }

    pub fn delivered_ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.delivered().into_iter().map(|(id, _)| id).collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl GatewayClient for ScriptedGateway {
    async fn post_to_connection(
        &self,
        connection_id: &ConnectionId,
        data: &Payload,
    ) -> Result<(), GatewayError> {
        let behavior = self
            .script
            .lock()
            .get(connection_id)
            .copied()
            .unwrap_or(Scripted::Deliver);
        match behavior {
            Scripted::Deliver => {
                self.delivered
                    .lock()
                    .push((connection_id.clone(), data.to_frame()?));
                Ok(())
            }
            Scripted::Gone => Err(GatewayError::gone(connection_id)),
            Scripted::Fail => Err(GatewayError::transport(connection_id, "scripted failure")),
        }
    }

    async fn get_connection(
        &self,
        connection_id: &ConnectionId,
    ) -> Result<ConnectionInfo, GatewayError> {
        Ok(ConnectionInfo {
            connection_id: connection_id.clone(),
            connected_at: Utc::now(),
            last_active_at: Utc::now(),
            identity: None,
        })
    }

    async fn delete_connection(&self, _connection_id: &ConnectionId) -> Result<(), GatewayError> {
        Ok(())
    }
}
