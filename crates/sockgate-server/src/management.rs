//! Local connection management API (`/@connections/{id}`).
//!
//! Emulates a managed gateway's connection API for sockets owned by this
//! process, so a [`RemoteGatewayClient`](crate::gateway::RemoteGatewayClient)
//! pointed at this server behaves exactly like local delivery.

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::post;
use serde_json::json;
use sockgate_core::{ConnectionId, Payload};
use tracing::debug;

use crate::gateway::{GatewayClient, GatewayError};
use crate::server::AppState;

/// Routes for the management API.
pub fn routes() -> Router<AppState> {
    Router::new().route(
        "/@connections/{connection_id}",
        post(post_to_connection)
            .get(get_connection)
            .delete(delete_connection),
    )
}

fn error_response(err: &GatewayError) -> Response {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let message = if err.is_gone() {
        "Gone".to_owned()
    } else {
        err.to_string()
    };
    (status, Json(json!({ "message": message }))).into_response()
}

/// POST: deliver the body verbatim.
async fn post_to_connection(
    State(state): State<AppState>,
    Path(connection_id): Path<String>,
    body: Bytes,
) -> Response {
    let connection_id = ConnectionId::from(connection_id);
    let Ok(text) = String::from_utf8(body.to_vec()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "message": "Body must be UTF-8" })),
        )
            .into_response();
    };
    let local = &state.lifecycle.context().local;
    match local.post_to_connection(&connection_id, &Payload::from(text)).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => {
            debug!(connection_id = %connection_id, error = %e, "management post failed");
            error_response(&e)
        }
    }
}

/// GET: describe the connection.
async fn get_connection(
    State(state): State<AppState>,
    Path(connection_id): Path<String>,
) -> Response {
    let connection_id = ConnectionId::from(connection_id);
    match state.lifecycle.context().local.get_connection(&connection_id).await {
        Ok(info) => Json(info).into_response(),
        Err(e) => error_response(&e),
    }
}

/// DELETE: close the connection. Teardown then runs through the lifecycle.
async fn delete_connection(
    State(state): State<AppState>,
    Path(connection_id): Path<String>,
) -> Response {
    let connection_id = ConnectionId::from(connection_id);
    match state.lifecycle.context().local.delete_connection(&connection_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(&e),
    }
}
