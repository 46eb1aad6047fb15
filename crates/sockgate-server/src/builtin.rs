//! Built-in actions: `ping`, `subscribe`, `unsubscribe`, `publish`, `send`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Value, json};
use sockgate_core::Payload;
use tracing::warn;

use crate::channels::ChannelStore;
use crate::context::GatewayContext;
use crate::emitter::{DeliveryTarget, SocketEmitter};
use crate::router::{ActionContext, ActionHandler, ActionRouter, RouteResult};

/// Register every built-in action on `router`.
pub fn register_all(router: &mut ActionRouter, context: &GatewayContext) {
    router.add_route("ping", Ping);
    router.add_route("subscribe", Subscribe(context.channels.clone()));
    router.add_route("unsubscribe", Unsubscribe(context.channels.clone()));
    router.add_route("publish", Publish(context.emitter.clone()));
    router.add_route("send", SendTo(context.emitter.clone()));
}

/// Decode `body`, reporting an absent `field` as missing and any other
/// decoding failure with serde's message.
fn parse<T: DeserializeOwned>(body: &str, field: &str) -> Result<T, RouteResult> {
    let value: Value =
        serde_json::from_str(body).map_err(|e| RouteResult::bad_request(e.to_string()))?;
    if value.get(field).is_none_or(Value::is_null) {
        return Err(RouteResult::bad_request(format!("Missing \"{field}\" field")));
    }
    serde_json::from_value(value)
        .map_err(|e| RouteResult::bad_request(format!("Invalid \"{field}\" field: {e}")))
}

fn internal_error(message: impl std::fmt::Display) -> RouteResult {
    RouteResult::with_status(500, &json!({ "error": message.to_string() }))
}

/// Answers `{"type":"pong"}`.
pub struct Ping;

#[async_trait]
impl ActionHandler for Ping {
    async fn handle(&self, _body: &str, _ctx: ActionContext) -> RouteResult {
        RouteResult::ok_json(&json!({ "type": "pong" }))
    }
}

#[derive(Deserialize)]
struct ChannelBody {
    channel: String,
}

/// `{"action":"subscribe","channel":"..."}`
pub struct Subscribe(pub Arc<dyn ChannelStore>);

#[async_trait]
impl ActionHandler for Subscribe {
    async fn handle(&self, body: &str, ctx: ActionContext) -> RouteResult {
        let ChannelBody { channel } = match parse(body, "channel") {
            Ok(b) => b,
            Err(resp) => return resp,
        };
        match self.0.subscribe(&ctx.connection_id, &channel).await {
            Ok(()) => RouteResult::ok_json(&json!({ "type": "subscribed", "channel": channel })),
            Err(e) => {
                warn!(connection_id = %ctx.connection_id, channel, error = %e, "subscribe failed");
                internal_error(e)
            }
        }
    }
}

/// `{"action":"unsubscribe","channel":"..."}`
pub struct Unsubscribe(pub Arc<dyn ChannelStore>);

#[async_trait]
impl ActionHandler for Unsubscribe {
    async fn handle(&self, body: &str, ctx: ActionContext) -> RouteResult {
        let ChannelBody { channel } = match parse(body, "channel") {
            Ok(b) => b,
            Err(resp) => return resp,
        };
        match self.0.unsubscribe(&ctx.connection_id, &channel).await {
            Ok(()) => RouteResult::ok_json(&json!({ "type": "unsubscribed", "channel": channel })),
            Err(e) => {
                warn!(connection_id = %ctx.connection_id, channel, error = %e, "unsubscribe failed");
                internal_error(e)
            }
        }
    }
}

#[derive(Deserialize)]
struct PublishBody {
    channel: String,
    #[serde(default)]
    data: Value,
}

/// `{"action":"publish","channel":"...","data":...}`, fanned out to every
/// subscriber including the sender.
pub struct Publish(pub SocketEmitter);

#[async_trait]
impl ActionHandler for Publish {
    async fn handle(&self, body: &str, _ctx: ActionContext) -> RouteResult {
        let PublishBody { channel, data } = match parse(body, "channel") {
            Ok(b) => b,
            Err(resp) => return resp,
        };
        let summary = self.0.to_channel(&channel, data).await;
        RouteResult::ok_json(&json!({
            "type": "published",
            "channel": channel,
            "recipients": summary.delivered,
        }))
    }
}

#[derive(Deserialize)]
struct SendBody {
    target: DeliveryTarget,
    #[serde(default)]
    data: Value,
}

/// `{"action":"send","target":...,"data":...}`
///
/// A single-connection target is posted directly so the sender learns whether
/// it arrived; every other target goes through the emitter.
pub struct SendTo(pub SocketEmitter);

#[async_trait]
impl ActionHandler for SendTo {
    async fn handle(&self, body: &str, ctx: ActionContext) -> RouteResult {
        let SendBody { target, data } = match parse(body, "target") {
            Ok(b) => b,
            Err(resp) => return resp,
        };
        if let DeliveryTarget::Connection(id) = &target {
            return match ctx.deliver.post_to_connection(id, &Payload::from(data)).await {
                Ok(()) => RouteResult::ok_json(&json!({ "type": "sent", "recipients": 1 })),
                Err(e) if e.is_gone() => {
                    RouteResult::with_status(e.status_code(), &json!({ "error": "Gone" }))
                }
                Err(e) => RouteResult::with_status(e.status_code(), &json!({ "error": e.to_string() })),
            };
        }
        let summary = self.0.emit(&target, data).await;
        RouteResult::ok_json(&json!({ "type": "sent", "recipients": summary.delivered }))
    }
}
