//! WebSocket status broadcast (§4.8, §6: "its payload shape is specified;
//! its transport is not"). Each connection gets its own [`StatusSubscription`]
//! and forwards every event as a JSON text frame until the client
//! disconnects.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use serde_json::json;
use tracing::debug;

use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/", get(upgrade))
}

async fn upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    let mut sub = state.pipeline.status().subscribe();

    loop {
        tokio::select! {
            changed = sub.model_status.changed() => {
                if changed.is_err() { break; }
                let payload = sub.model_status.borrow().clone();
                if send_json(&mut socket, envelope("modelStatus", &payload)).await.is_err() { break; }
            }
            received = sub.category_status.recv() => {
                match received {
                    Ok(payload) => {
                        if send_json(&mut socket, envelope("categoryStatus", &payload)).await.is_err() { break; }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "ws subscriber lagged behind the category-status broadcast channel");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            received = sub.system_prompt_used.recv() => {
                match received {
                    Ok(payload) => {
                        if send_json(&mut socket, envelope("systemPromptUsed", &payload)).await.is_err() { break; }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "ws subscriber lagged behind the system-prompt broadcast channel");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            line = sub.log_rx.recv() => {
                match line {
                    Ok(line) => {
                        if send_json(&mut socket, envelope("log", &line)).await.is_err() { break; }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "ws subscriber lagged behind the log broadcast channel");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
}

fn envelope(kind: &str, payload: &impl serde::Serialize) -> serde_json::Value {
    json!({"kind": kind, "payload": payload})
}

async fn send_json(socket: &mut WebSocket, value: serde_json::Value) -> Result<(), axum::Error> {
    socket.send(Message::Text(value.to_string().into())).await
}
