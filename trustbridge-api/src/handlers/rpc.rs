//! JSON-RPC endpoint, method registry and health

use crate::AppState;
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use escrow_engine::rpc::{registry_dump, JsonRpcError, JsonRpcResponse};
use serde_json::{json, Value};
use tracing::warn;

/// Always HTTP 200; failures travel in the envelope
pub async fn rpc_endpoint(State(state): State<AppState>, body: Bytes) -> Json<JsonRpcResponse> {
    let request = match serde_json::from_slice::<Value>(&body) {
        Ok(request) => request,
        Err(e) => {
            warn!("Unparseable RPC body: {}", e);
            return Json(JsonRpcResponse::failure(Value::Null, JsonRpcError::parse_error()));
        }
    };

    Json(state.node.rpc().dispatch_value(request).await)
}

pub async fn list_methods() -> Json<Value> {
    Json(registry_dump())
}

pub async fn health(State(state): State<AppState>) -> Response {
    let health = state.node.health_check().await;
    let status = if health.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if health.healthy { "ok" } else { "degraded" },
            "health": health,
            "connections": state.connections.connection_count().await,
        })),
    )
        .into_response()
}
