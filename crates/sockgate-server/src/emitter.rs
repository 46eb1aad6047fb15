//! Target resolution and concurrent fan-out.

use std::sync::Arc;

use futures::future::join_all;
use metrics::counter;
use serde::{Deserialize, Serialize};
use sockgate_core::{ConnectionId, Payload};
use tracing::{debug, warn};

use crate::channels::ChannelStore;
use crate::gateway::GatewayClient;
use crate::metrics::EMIT_DELIVERIES_TOTAL;
use crate::registry::ConnectionRegistry;

/// Logical recipient set of an emit.
///
/// On the wire: `{"connectionId"}`, `{"userId"}`, `{"orgId"}`,
/// `{"channel"}` or the string `"broadcast"`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TargetWire", into = "TargetWire")]
pub enum DeliveryTarget {
    /// One connection, checked for existence at delivery time.
    Connection(ConnectionId),
    /// Every connection whose user context has this user id.
    User(String),
    /// Every connection whose user context has this organization id.
    Org(String),
    /// Every subscriber of a channel.
    Channel(String),
    /// Every registered connection.
    Broadcast,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum TargetWire {
    Keyword(String),
    Connection {
        #[serde(rename = "connectionId")]
        connection_id: ConnectionId,
    },
    User {
        #[serde(rename = "userId")]
        user_id: String,
    },
    Org {
        #[serde(rename = "orgId")]
        org_id: String,
    },
    Channel {
        channel: String,
    },
}

impl TryFrom<TargetWire> for DeliveryTarget {
    type Error = String;

    fn try_from(wire: TargetWire) -> Result<Self, Self::Error> {
        match wire {
            TargetWire::Keyword(k) if k == "broadcast" => Ok(Self::Broadcast),
            TargetWire::Keyword(k) => Err(format!("unknown delivery target: {k}")),
            TargetWire::Connection { connection_id } => Ok(Self::Connection(connection_id)),
            TargetWire::User { user_id } => Ok(Self::User(user_id)),
            TargetWire::Org { org_id } => Ok(Self::Org(org_id)),
            TargetWire::Channel { channel } => Ok(Self::Channel(channel)),
        }
    }
}

impl From<DeliveryTarget> for TargetWire {
    fn from(target: DeliveryTarget) -> Self {
        match target {
            DeliveryTarget::Broadcast => Self::Keyword("broadcast".into()),
            DeliveryTarget::Connection(connection_id) => Self::Connection { connection_id },
            DeliveryTarget::User(user_id) => Self::User { user_id },
            DeliveryTarget::Org(org_id) => Self::Org { org_id },
            DeliveryTarget::Channel(channel) => Self::Channel { channel },
        }
    }
}

/// Outcome counts of one emit. Informational only.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct EmitSummary {
    /// Connections the target resolved to.
    pub resolved: usize,
    /// Deliveries that succeeded.
    pub delivered: usize,
    /// Recipients that had already left.
    pub gone: usize,
    /// Deliveries that failed for any other reason.
    pub failed: usize,
}

/// Turns a [`DeliveryTarget`] into concurrent post-to-connection calls.
///
/// Per-recipient failures never abort the batch and never reach the caller.
#[derive(Clone)]
pub struct SocketEmitter {
    registry: Arc<ConnectionRegistry>,
    channels: Arc<dyn ChannelStore>,
    gateway: Arc<dyn GatewayClient>,
}

impl SocketEmitter {
    /// Emitter resolving through `registry` and `channels`, delivering through `gateway`.
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        channels: Arc<dyn ChannelStore>,
        gateway: Arc<dyn GatewayClient>,
    ) -> Self {
        Self {
            registry,
            channels,
            gateway,
        }
    }

    /// Current recipients of `target`. A snapshot; recipients may leave
    /// before delivery.
    pub async fn resolve(&self, target: &DeliveryTarget) -> Vec<ConnectionId> {
        match target {
            DeliveryTarget::Broadcast => self.registry.get_all(),
            DeliveryTarget::Connection(id) => vec![id.clone()],
            DeliveryTarget::User(user_id) => self.registry.get_connections_by_user_id(user_id),
            DeliveryTarget::Org(org_id) => self.registry.get_connections_by_org_id(org_id),
            DeliveryTarget::Channel(channel) => match self.channels.get_subscribers(channel).await {
                Ok(ids) => ids,
                Err(e) => {
                    warn!(channel, error = %e, "failed to read channel subscribers");
                    Vec::new()
                }
            },
        }
    }

    /// Deliver `data` to every recipient of `target`.
    ///
    /// Non-string data is serialized once and the same frame goes to every
    /// recipient. Deliveries run concurrently; this returns once all settle.
    pub async fn emit(&self, target: &DeliveryTarget, data: impl Into<Payload>) -> EmitSummary {
        let ids = self.resolve(target).await;
        let mut summary = EmitSummary {
            resolved: ids.len(),
            ..EmitSummary::default()
        };
        if ids.is_empty() {
            return summary;
        }

        let payload = match data.into().into_shared() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "emit payload could not be serialized");
                summary.failed = ids.len();
                return summary;
            }
        };

        let results = join_all(
            ids.iter()
                .map(|id| self.gateway.post_to_connection(id, &payload)),
        )
        .await;

        for (id, result) in ids.iter().zip(results) {
            match result {
                Ok(()) => summary.delivered += 1,
                Err(e) if e.is_gone() => {
                    debug!(connection_id = %id, "recipient gone");
                    summary.gone += 1;
                }
                Err(e) => {
                    warn!(connection_id = %id, error = %e, "delivery failed");
                    summary.failed += 1;
                }
            }
        }

        record(&summary);
        debug!(
            recipients = summary.resolved,
            delivered = summary.delivered,
            gone = summary.gone,
            failed = summary.failed,
            "emit complete"
        );
        summary
    }

    /// Emit to one connection.
    pub async fn to_connection(&self, id: &ConnectionId, data: impl Into<Payload>) -> EmitSummary {
        self.emit(&DeliveryTarget::Connection(id.clone()), data).await
    }

    /// Emit to every connection of a user.
    pub async fn to_user(&self, user_id: &str, data: impl Into<Payload>) -> EmitSummary {
        self.emit(&DeliveryTarget::User(user_id.to_owned()), data).await
    }

    /// Emit to every connection of an organization.
    pub async fn to_org(&self, org_id: &str, data: impl Into<Payload>) -> EmitSummary {
        self.emit(&DeliveryTarget::Org(org_id.to_owned()), data).await
    }

    /// Emit to every subscriber of a channel.
    pub async fn to_channel(&self, channel: &str, data: impl Into<Payload>) -> EmitSummary {
        self.emit(&DeliveryTarget::Channel(channel.to_owned()), data).await
    }

    /// Emit to every registered connection.
    pub async fn broadcast(&self, data: impl Into<Payload>) -> EmitSummary {
        self.emit(&DeliveryTarget::Broadcast, data).await
    }
}

fn record(summary: &EmitSummary) {
    for (outcome, count) in [
        ("delivered", summary.delivered),
        ("gone", summary.gone),
        ("failed", summary.failed),
    ] {
        if count > 0 {
            counter!(EMIT_DELIVERIES_TOTAL, "outcome" => outcome).increment(count as u64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::InMemoryChannelStore;
    use crate::gateway::LocalGatewayClient;
    use crate::test_support::{RecordingHandle, Scripted, ScriptedGateway};
    use crate::websocket::connection::ConnectionHandle;
    use serde_json::json;
    use sockgate_core::UserContext;

    struct Fixture {
        registry: Arc<ConnectionRegistry>,
        channels: Arc<InMemoryChannelStore>,
        gateway: Arc<ScriptedGateway>,
        emitter: SocketEmitter,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(ConnectionRegistry::new());
        let channels = Arc::new(InMemoryChannelStore::new());
        let gateway = ScriptedGateway::shared();
        let emitter = SocketEmitter::new(registry.clone(), channels.clone(), gateway.clone());
        Fixture {
            registry,
            channels,
            gateway,
            emitter,
        }
    }

    fn register(registry: &ConnectionRegistry, ctx: Option<UserContext>) -> ConnectionId {
        let id = registry.register(RecordingHandle::shared());
        if let Some(ctx) = ctx {
            let _ = registry.set_user_context(&id, ctx);
        }
        id
    }

    fn sorted(mut ids: Vec<ConnectionId>) -> Vec<ConnectionId> {
        ids.sort();
        ids
    }

    #[test]
    fn target_wire_format() {
        let cases = [
            (json!({"connectionId": "c1"}), DeliveryTarget::Connection("c1".into())),
            (json!({"userId": "u1"}), DeliveryTarget::User("u1".into())),
            (json!({"orgId": "o1"}), DeliveryTarget::Org("o1".into())),
            (json!({"channel": "news"}), DeliveryTarget::Channel("news".into())),
            (json!("broadcast"), DeliveryTarget::Broadcast),
        ];
        for (wire, target) in cases {
            assert_eq!(serde_json::from_value::<DeliveryTarget>(wire.clone()).unwrap(), target);
            assert_eq!(serde_json::to_value(&target).unwrap(), wire);
        }
        assert!(serde_json::from_value::<DeliveryTarget>(json!("everyone")).is_err());
        assert!(serde_json::from_value::<DeliveryTarget>(json!({"nobody": 1})).is_err());
    }

    #[tokio::test]
    async fn resolution_rules() {
        let f = fixture();
        let a = register(&f.registry, Some(UserContext::new("u1", "o1")));
        let b = register(&f.registry, Some(UserContext::new("u1", "o2")));
        let c = register(&f.registry, Some(UserContext::new("u2", "o1")));
        f.channels.subscribe(&b, "news").await.unwrap();
        f.channels.subscribe(&c, "news").await.unwrap();

        assert_eq!(
            sorted(f.emitter.resolve(&DeliveryTarget::Broadcast).await),
            sorted(vec![a.clone(), b.clone(), c.clone()])
        );
        assert_eq!(
            sorted(f.emitter.resolve(&DeliveryTarget::User("u1".into())).await),
            sorted(vec![a.clone(), b.clone()])
        );
        assert_eq!(
            sorted(f.emitter.resolve(&DeliveryTarget::Org("o1".into())).await),
            sorted(vec![a, c.clone()])
        );
        assert_eq!(
            sorted(f.emitter.resolve(&DeliveryTarget::Channel("news".into())).await),
            sorted(vec![b, c])
        );
        // Direct targets are not checked at resolution time.
        assert_eq!(
            f.emitter.resolve(&DeliveryTarget::Connection("ghost".into())).await,
            vec![ConnectionId::from("ghost")]
        );
    }

    #[tokio::test]
    async fn empty_target_is_noop() {
        let f = fixture();
        let summary = f.emitter.to_channel("nobody-here", json!({"x": 1})).await;
        assert_eq!(summary, EmitSummary::default());
        assert!(f.gateway.delivered().is_empty());
    }

    #[tokio::test]
    async fn gone_and_failed_recipients_do_not_abort_batch() {
        let f = fixture();
        let ids: Vec<_> = (0..5).map(|_| register(&f.registry, None)).collect();
        f.gateway.script(&ids[1], Scripted::Gone);
        f.gateway.script(&ids[3], Scripted::Fail);

        let summary = f.emitter.broadcast(json!({"type": "tick"})).await;

        assert_eq!(
            summary,
            EmitSummary {
                resolved: 5,
                delivered: 3,
                gone: 1,
                failed: 1,
            }
        );
        let expected = sorted(vec![ids[0].clone(), ids[2].clone(), ids[4].clone()]);
        assert_eq!(f.gateway.delivered_ids(), expected);
    }

    #[tokio::test]
    async fn payload_serialized_once() {
        let f = fixture();
        for _ in 0..3 {
            let _ = register(&f.registry, None);
        }

        let _ = f.emitter.broadcast(json!({"n": 1})).await;

        let frames: Vec<_> = f.gateway.delivered().into_iter().map(|(_, frame)| frame).collect();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].as_str(), r#"{"n":1}"#);
        assert!(frames.iter().all(|frame| Arc::ptr_eq(frame, &frames[0])));
    }

    #[tokio::test]
    async fn string_data_sent_verbatim() {
        let f = fixture();
        let id = register(&f.registry, None);
        let _ = f.emitter.to_connection(&id, "raw text").await;
        assert_eq!(f.gateway.delivered()[0].1.as_str(), "raw text");
    }

    #[tokio::test]
    async fn broadcast_skips_closed_socket_with_local_gateway() {
        let registry = Arc::new(ConnectionRegistry::new());
        let gateway = Arc::new(LocalGatewayClient::new(registry.clone()));
        let emitter =
            SocketEmitter::new(registry.clone(), Arc::new(InMemoryChannelStore::new()), gateway);
        let handles: Vec<_> = (0..5).map(|_| RecordingHandle::shared()).collect();
        for handle in &handles {
            let _ = registry.register(handle.clone());
        }
        handles[2].close(1000, "left");

        let summary = emitter.to_user("nobody", "x").await;
        assert_eq!(summary.resolved, 0);

        let summary = emitter.broadcast(json!({"type": "hello"})).await;

        assert_eq!(summary.delivered, 4);
        assert_eq!(summary.gone, 1);
        for (i, handle) in handles.iter().enumerate() {
            let expected = usize::from(i != 2);
            assert_eq!(handle.frames().len(), expected);
        }
    }

    #[tokio::test]
    async fn broadcast_after_unregister_reaches_remaining_four() {
        let registry = Arc::new(ConnectionRegistry::new());
        let gateway = Arc::new(LocalGatewayClient::new(registry.clone()));
        let emitter =
            SocketEmitter::new(registry.clone(), Arc::new(InMemoryChannelStore::new()), gateway);
        let handles: Vec<_> = (0..5).map(|_| RecordingHandle::shared()).collect();
        let ids: Vec<_> = handles.iter().map(|h| registry.register(h.clone())).collect();

        assert!(registry.unregister(&ids[1]));
        let summary = emitter.broadcast(json!({"type": "hello"})).await;

        assert_eq!(
            summary,
            EmitSummary {
                resolved: 4,
                delivered: 4,
                gone: 0,
                failed: 0,
            }
        );
        let reached: Vec<_> = ids
            .iter()
            .zip(&handles)
            .filter(|(_, handle)| handle.frames() == vec![r#"{"type":"hello"}"#.to_string()])
            .map(|(id, _)| id.clone())
            .collect();
        let expected: Vec<_> = ids
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != 1)
            .map(|(_, id)| id.clone())
            .collect();
        assert_eq!(reached, expected);
        assert!(handles[1].frames().is_empty());
    }

    #[tokio::test]
    async fn channel_fan_out_survives_gone_subscriber() {
        let f = fixture();
        let a = register(&f.registry, None);
        let b = register(&f.registry, None);
        let c = register(&f.registry, None);
        let outsider = register(&f.registry, None);
        for id in [&a, &b, &c] {
            f.channels.subscribe(id, "news").await.unwrap();
        }
        f.gateway.script(&b, Scripted::Gone);

        let summary = f.emitter.to_channel("news", json!({"headline": "x"})).await;

        assert_eq!(
            summary,
            EmitSummary {
                resolved: 3,
                delivered: 2,
                gone: 1,
                failed: 0,
            }
        );
        assert_eq!(f.gateway.delivered_ids(), sorted(vec![a, c]));
        assert!(!f.gateway.delivered_ids().contains(&outsider));
    }
}
