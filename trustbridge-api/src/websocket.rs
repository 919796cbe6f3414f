//! WebSocket push channel
//!
//! Each socket gets a connection id in the [`ConnectionRegistry`] for as long
//! as it is open. Clients subscribe with a user id and then receive the escrow
//! notifications that concern that user, plus a keep-alive frame at a fixed
//! interval. JSON-RPC requests can be sent over the same socket.

use crate::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use escrow_engine::{models::EscrowNotification, rpc::JsonRpcResponse};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{
    sync::{broadcast::error::RecvError, mpsc, RwLock},
    time::{interval_at, Instant},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Frames queued per connection before the sender applies backpressure
const OUTBOUND_BUFFER: usize = 256;

/// Message sent by the client
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe { user_id: String },
    Rpc { request: Value },
    Ping,
}

/// Frame sent to the client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Welcome { connection_id: Uuid },
    Subscribed { user_id: String },
    Notification { notification: EscrowNotification },
    Rpc { response: JsonRpcResponse },
    Ping { timestamp: DateTime<Utc> },
    Error { message: String },
}

#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub user_id: Option<String>,
    pub connected_at: DateTime<Utc>,
}

/// Open push connections keyed by connection id
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<RwLock<HashMap<Uuid, ConnectionInfo>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.connections.write().await.insert(
            id,
            ConnectionInfo {
                user_id: None,
                connected_at: Utc::now(),
            },
        );
        id
    }

    /// Bind a connection to a user; false if the connection is gone
    pub async fn subscribe(&self, id: Uuid, user_id: String) -> bool {
        match self.connections.write().await.get_mut(&id) {
            Some(info) => {
                info.user_id = Some(user_id);
                true
            }
            None => false,
        }
    }

    pub async fn user_of(&self, id: Uuid) -> Option<String> {
        self.connections
            .read()
            .await
            .get(&id)
            .and_then(|info| info.user_id.clone())
    }

    pub async fn remove(&self, id: Uuid) {
        self.connections.write().await.remove(&id);
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }
}

pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerFrame>(OUTBOUND_BUFFER);

    // Subscribed before the welcome frame so nothing published after it is missed
    let mut notifications = state.node.escrow_service().subscribe();
    let connection_id = state.connections.register().await;
    info!("Push connection {} opened", connection_id);
    let _ = tx.send(ServerFrame::Welcome { connection_id }).await;

    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Dropping unserializable frame: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let recv_state = state.clone();
    let recv_tx = tx.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    let reply = handle_client_message(&recv_state, connection_id, &text).await;
                    if recv_tx.send(reply).await.is_err() {
                        break;
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    let push_state = state.clone();
    let mut push_task = tokio::spawn(async move {
        let period = push_state.keepalive;
        let mut keepalive = interval_at(Instant::now() + period, period);

        loop {
            let frame = tokio::select! {
                _ = keepalive.tick() => ServerFrame::Ping { timestamp: Utc::now() },
                received = notifications.recv() => match received {
                    Ok(notification) => {
                        match push_state.connections.user_of(connection_id).await {
                            Some(user) if notification.concerns(&user) => {
                                ServerFrame::Notification { notification }
                            }
                            _ => continue,
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Push connection {} skipped {} notifications", connection_id, skipped);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
            };
            if tx.send(frame).await.is_err() {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
            push_task.abort();
        },
        _ = &mut recv_task => {
            send_task.abort();
            push_task.abort();
        },
        _ = &mut push_task => {
            send_task.abort();
            recv_task.abort();
        }
    };

    state.connections.remove(connection_id).await;
    info!("Push connection {} closed", connection_id);
}

/// Reply frame for one client text message
pub async fn handle_client_message(state: &AppState, connection_id: Uuid, text: &str) -> ServerFrame {
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            debug!("Push connection {} sent invalid message: {}", connection_id, e);
            return ServerFrame::Error {
                message: format!("Invalid message: {}", e),
            };
        }
    };

    match message {
        ClientMessage::Subscribe { user_id } if user_id.trim().is_empty() => ServerFrame::Error {
            message: "user_id is required".to_string(),
        },
        ClientMessage::Subscribe { user_id } => {
            let user_id = user_id.trim().to_string();
            if state.connections.subscribe(connection_id, user_id.clone()).await {
                info!("Push connection {} subscribed as {}", connection_id, user_id);
                ServerFrame::Subscribed { user_id }
            } else {
                ServerFrame::Error {
                    message: "Connection is not registered".to_string(),
                }
            }
        }
        ClientMessage::Rpc { request } => ServerFrame::Rpc {
            response: state.node.rpc().dispatch_value(request).await,
        },
        ClientMessage::Ping => ServerFrame::Ping { timestamp: Utc::now() },
    }
}

pub fn keepalive_interval(secs: u64) -> Duration {
    Duration::from_secs(secs.max(1))
}
