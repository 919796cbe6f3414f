use escrow_engine::{
    escrow_service::InitiateEscrowRequest,
    node::{EscrowNode, EscrowNodeConfig},
};
use futures::{SinkExt, Stream, StreamExt};
use serde_json::{json, Value};
use std::{sync::Arc, time::Duration};
use tokio::{net::TcpListener, time::timeout};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use trustbridge_api::{create_router, AppState};

const FRAME_WAIT: Duration = Duration::from_secs(3);

/// Next JSON text frame, skipping transport-level messages
async fn next_frame<S>(ws: &mut S) -> Value
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let message = timeout(FRAME_WAIT, ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket closed")
            .expect("socket error");
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Next frame of `kind`, skipping keep-alive pings
async fn next_frame_of<S>(ws: &mut S, kind: &str) -> Value
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let frame = next_frame(ws).await;
        if frame["type"] == kind {
            return frame;
        }
        assert_eq!(frame["type"], "ping", "unexpected frame {}", frame);
    }
}

#[tokio::test]
async fn push_channel_lifecycle_over_real_socket() {
    let node = EscrowNode::new(EscrowNodeConfig::default()).await.unwrap();
    let state = AppState::new(Arc::new(node), Duration::from_millis(200));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = create_router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let (mut ws, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();

    let welcome = next_frame(&mut ws).await;
    assert_eq!(welcome["type"], "welcome");
    assert!(welcome["connection_id"].is_string());
    assert_eq!(state.connections.connection_count().await, 1);

    // Keep-alive arrives on its own without any client traffic
    let ping = next_frame(&mut ws).await;
    assert_eq!(ping["type"], "ping");
    assert!(ping["timestamp"].is_string());

    ws.send(Message::Text(json!({ "action": "subscribe", "user_id": "buyer-ws" }).to_string()))
        .await
        .unwrap();
    let subscribed = next_frame_of(&mut ws, "subscribed").await;
    assert_eq!(subscribed["user_id"], "buyer-ws");

    // Someone else's escrow is not pushed to this buyer
    state
        .node
        .escrow_service()
        .initiate(InitiateEscrowRequest {
            product_id: Some("prod-other".to_string()),
            amount: Some(json!(5)),
            buyer_id: Some("buyer-other".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();

    let transaction = state
        .node
        .escrow_service()
        .initiate(InitiateEscrowRequest {
            product_id: Some("prod-ws".to_string()),
            amount: Some(json!(42.5)),
            buyer_id: Some("buyer-ws".to_string()),
            seller_id: Some("seller-ws".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();

    let notification = next_frame_of(&mut ws, "notification").await;
    assert_eq!(
        notification["notification"]["transaction_id"],
        json!(transaction.id.to_string())
    );
    assert_eq!(notification["notification"]["buyer_id"], "buyer-ws");

    ws.close(None).await.unwrap();
    drop(ws);

    let mut remaining = state.connections.connection_count().await;
    for _ in 0..50 {
        if remaining == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        remaining = state.connections.connection_count().await;
    }
    assert_eq!(remaining, 0);
}
