use crate::device::DeviceId;
use crate::http::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// `WS /ws/ai-logs/{id}` — JSON log frames from the Agent Log Broker. Sends
/// a `{"type":"connected","device_id":...}` notice on accept, answers client
/// `{"type":"ping"}` with `{"type":"pong"}`, and sends its own idle
/// heartbeat ping every 30s.
pub async fn handle_ai_logs(
    ws: WebSocketUpgrade,
    Path(device_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_ai_logs(socket, DeviceId::from(device_id), state))
}

async fn run_ai_logs(mut socket: WebSocket, device_id: DeviceId, state: Arc<AppState>) {
    let preamble = serde_json::json!({"type": "connected", "device_id": device_id.as_str()});
    if socket.send(Message::Text(preamble.to_string())).await.is_err() {
        return;
    }

    let (sub_id, mut rx) = state.agent_logs.subscribe(device_id.clone());
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if text.contains("\"ping\"") {
                            if socket.send(Message::Text(r#"{"type":"pong"}"#.to_string())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!("ai-logs ws recv error for {}: {}", device_id, e);
                        break;
                    }
                    _ => {}
                }
            }
            line = rx.recv() => {
                match line {
                    Some(line) => {
                        if socket.send(Message::Text(line)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = heartbeat.tick() => {
                if socket.send(Message::Text(r#"{"type":"ping"}"#.to_string())).await.is_err() {
                    break;
                }
            }
        }
    }

    state.agent_logs.unsubscribe(&device_id, sub_id);
}
