use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::StreamExt;
use serde_json::json;
use tracing::{info, warn};

use crate::engine::dispatch::DispatchEngine;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(engine): State<Arc<DispatchEngine>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, engine))
}

async fn handle_socket(socket: WebSocket, engine: Arc<DispatchEngine>) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = engine.state.dispatch_events_tx.subscribe();

    info!("websocket client connected");

    let send_task = tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            let envelope = json!({
                "routingKey": event.routing_key(),
                "assignment": event.assignment(),
            });

            let text = match serde_json::to_string(&envelope) {
                Ok(text) => text,
                Err(err) => {
                    warn!(error = %err, "failed to serialize dispatch event for ws");
                    continue;
                }
            };

            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(_msg)) = receiver.next().await {}
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    info!("websocket client disconnected");
}
