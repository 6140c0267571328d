use crate::device::DeviceId;
use crate::http::AppState;
use crate::session::{BusMessage, StreamOptions, SubscriberId, VideoMetadata};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Deserialize)]
struct ConfigMessage {
    #[serde(rename = "type")]
    kind: String,
    max_size: Option<u32>,
    bit_rate: Option<u32>,
}

/// `WS /ws/h264/{id}` — live H.264 Annex-B stream as length-prefixed binary
/// WebSocket messages (one message per `MediaPacket`, raw payload bytes, no
/// extra wrapper). First message after handshake is a JSON
/// `{"type":"connected"}` notice; after the first real packet no more JSON
/// is interleaved except in response to a client "ping" or "config" message.
pub async fn handle_h264(
    ws: WebSocketUpgrade,
    Path(device_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_h264(socket, DeviceId::from(device_id), state))
}

async fn run_h264(mut socket: WebSocket, device_id: DeviceId, state: Arc<AppState>) {
    if send_json(&mut socket, &serde_json::json!({"type": "connected"})).await.is_err() {
        return;
    }

    let session = state.registry.get_or_create(device_id.clone());
    let mut options = state.default_stream_options.clone();

    let (mut bus, metadata, mut sub) = match session.subscribe(options.clone()).await {
        Ok(v) => v,
        Err(e) => {
            let _ = send_json(&mut socket, &serde_json::json!({"type": "error", "message": e.to_string()})).await;
            return;
        }
    };
    let mut sub_id: SubscriberId = sub.id;

    let mut last_metadata: Option<VideoMetadata> = None;
    if send_metadata_if_changed(&mut socket, &mut last_metadata, &metadata).await.is_err() {
        session.leave(sub_id).await;
        return;
    }

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if text.trim() == "ping" {
                            if socket.send(Message::Text("pong".to_string())).await.is_err() {
                                break;
                            }
                            continue;
                        }
                        if let Ok(cfg) = serde_json::from_str::<ConfigMessage>(&text) {
                            if cfg.kind == "config" {
                                let mut new_options = options.clone();
                                if let Some(max_size) = cfg.max_size {
                                    new_options.max_size = max_size;
                                }
                                if let Some(bit_rate) = cfg.bit_rate {
                                    new_options.bit_rate = bit_rate;
                                }
                                match session.restart_if_sole_subscriber(sub_id, new_options.clone()).await {
                                    Ok((new_bus, new_meta, new_sub)) => {
                                        bus = new_bus;
                                        sub_id = new_sub.id;
                                        sub = new_sub;
                                        options = new_options;
                                        let _ = send_metadata_if_changed(&mut socket, &mut last_metadata, &new_meta).await;
                                    }
                                    Err(e) => {
                                        let _ = send_json(&mut socket, &serde_json::json!({"type": "error", "message": e.to_string()})).await;
                                    }
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!("ws recv error for {}: {}", device_id, e);
                        break;
                    }
                    _ => {}
                }
            }
            msg = sub.recv() => {
                match msg {
                    Some(BusMessage::Packet(packet)) => {
                        if socket.send(Message::Binary(packet.payload().to_vec())).await.is_err() {
                            break;
                        }
                    }
                    Some(BusMessage::Closed(_)) | None => break,
                }
            }
        }
    }

    let _ = &bus;
    session.leave(sub_id).await;
}

/// `WS /ws/screen/{id}` — screenshot-fallback JPEG frames (binary), driven
/// by the `ScreencapLoop` capture source's periodic `adb exec-out screencap`.
pub async fn handle_screen(
    ws: WebSocketUpgrade,
    Path(device_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_screen(socket, DeviceId::from(device_id), state))
}

async fn run_screen(mut socket: WebSocket, device_id: DeviceId, state: Arc<AppState>) {
    if send_json(&mut socket, &serde_json::json!({"type": "connected"})).await.is_err() {
        return;
    }

    let interval_secs = state.screenshot_interval_secs;
    let adb = state.registry.adb().clone();
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs));

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
            _ = ticker.tick() => {
                match adb.exec_out(device_id.as_str(), &["screencap", "-p"]).await {
                    Ok(jpeg) => {
                        if socket.send(Message::Binary(jpeg)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("screencap failed for {}: {}", device_id, e);
                    }
                }
            }
        }
    }
}

async fn send_json(socket: &mut WebSocket, value: &serde_json::Value) -> Result<(), axum::Error> {
    socket.send(Message::Text(value.to_string())).await
}

/// Sends a `{"type":"metadata",...}` notice only when `metadata` differs from
/// the last one sent on this socket, so a session restart with unchanged
/// resolution/orientation doesn't re-announce anything.
async fn send_metadata_if_changed(
    socket: &mut WebSocket,
    last: &mut Option<VideoMetadata>,
    metadata: &VideoMetadata,
) -> Result<(), axum::Error> {
    if last.as_ref() == Some(metadata) {
        return Ok(());
    }
    *last = Some(metadata.clone());
    send_json(
        socket,
        &serde_json::json!({
            "type": "metadata",
            "deviceName": metadata.device_name,
            "width": metadata.width,
            "height": metadata.height,
            "codec": metadata.codec_id,
            "isLandscape": metadata.is_landscape,
        }),
    )
    .await
}
