//! TrustBridge HTTP surface
//!
//! JSON endpoints for the escrow lifecycle and payments, the JSON-RPC bridge
//! and the WebSocket push channel, all over one [`EscrowNode`].

pub mod error;
pub mod handlers;
pub mod settings;
pub mod websocket;

use axum::{
    http::StatusCode,
    routing::{get, post, MethodRouter},
    Router,
};
use escrow_engine::node::EscrowNode;
use std::{sync::Arc, time::Duration};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use websocket::ConnectionRegistry;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub node: Arc<EscrowNode>,
    pub connections: ConnectionRegistry,
    pub keepalive: Duration,
}

impl AppState {
    pub fn new(node: Arc<EscrowNode>, keepalive: Duration) -> Self {
        Self {
            node,
            connections: ConnectionRegistry::new(),
            keepalive,
        }
    }
}

async fn preflight() -> StatusCode {
    StatusCode::OK
}

async fn method_not_allowed() -> error::ApiError {
    error::ApiError::method_not_allowed()
}

/// Empty-bodied OPTIONS and a JSON 405 for every other unrouted method
fn with_defaults(route: MethodRouter<AppState>) -> MethodRouter<AppState> {
    route.options(preflight).fallback(method_not_allowed)
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/initiate-escrow", with_defaults(post(handlers::escrow::initiate_escrow)))
        .route("/escrow-status/:id", with_defaults(get(handlers::escrow::escrow_status)))
        .route("/release-escrow", with_defaults(post(handlers::escrow::release_escrow)))
        .route("/payments", with_defaults(post(handlers::payments::accept_payment)))
        .route(
            "/process-x402-payment",
            with_defaults(post(handlers::payments::process_x402_payment)),
        )
        .route("/rpc", with_defaults(post(handlers::rpc::rpc_endpoint)))
        .route("/methods", with_defaults(get(handlers::rpc::list_methods)))
        .route("/health", with_defaults(get(handlers::rpc::health)))
        .route("/ws", get(websocket::websocket_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
