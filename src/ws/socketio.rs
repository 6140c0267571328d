use crate::device::DeviceId;
use crate::http::AppState;
use crate::session::{BusMessage, DeviceSession, StreamOptions, SubscriberId, VideoMetadata};
use serde::Deserialize;
use socketioxide::extract::{Data, SocketRef, State};
use socketioxide::{SocketIo, SocketIoLayer};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Deserialize)]
struct ConnectDevicePayload {
    #[serde(alias = "deviceId")]
    device_id: String,
    #[serde(rename = "maxSize")]
    max_size: Option<u32>,
    #[serde(rename = "bitRate")]
    bit_rate: Option<u32>,
}

/// Per-socket bookkeeping so `disconnect` can tear its stream down, mirroring
/// the original service's `_socket_streamers`/`_stream_tasks` dicts.
struct ActiveStream {
    session: Arc<DeviceSession>,
    subscriber_id: SubscriberId,
}

/// The last `VideoMetadata` announced to this socket, kept across restarts of
/// the same socket so an unchanged resolution/orientation doesn't trigger a
/// redundant `video-metadata` event.
struct LastMetadata(VideoMetadata);

/// Builds the Socket.IO layer to merge into the axum router, and registers
/// the `connect-device` event per §6: emits `video-metadata` once, then
/// `video-data` per packet, or `error` on failure.
pub fn build_socketio_layer(state: Arc<AppState>) -> (SocketIoLayer, SocketIo) {
    let (layer, io) = SocketIo::builder().with_state(state).build_layer();

    io.ns("/", |socket: SocketRef| {
        info!("socket.io client connected: {}", socket.id);

        socket.on(
            "connect-device",
            |socket: SocketRef, Data(payload): Data<ConnectDevicePayload>, State(state): State<Arc<AppState>>| async move {
                on_connect_device(socket, payload, state).await;
            },
        );

        socket.on_disconnect(|socket: SocketRef| async move {
            stop_active_stream(&socket).await;
        });
    });

    (layer, io)
}

async fn on_connect_device(socket: SocketRef, payload: ConnectDevicePayload, state: Arc<AppState>) {
    stop_active_stream(&socket).await;

    let device_id = DeviceId::from(payload.device_id);
    let mut options = state.default_stream_options.clone();
    options.max_size = payload.max_size.unwrap_or(options.max_size);
    options.bit_rate = payload.bit_rate.unwrap_or(options.bit_rate);

    let session = state.registry.get_or_create(device_id.clone());

    // The original service's per-device lock stops every other viewer
    // before attaching a new one; `force_restart` provides the same
    // single-flight semantics without a separate lock map.
    match session.force_restart(options).await {
        Ok((_bus, metadata, sub)) => {
            let changed = socket
                .extensions
                .get::<LastMetadata>()
                .map(|prev| prev.0 != metadata)
                .unwrap_or(true);

            if changed {
                let _ = socket.emit(
                    "video-metadata",
                    &serde_json::json!({
                        "deviceName": metadata.device_name,
                        "width": metadata.width,
                        "height": metadata.height,
                        "codec": metadata.codec_id,
                        "isLandscape": metadata.is_landscape,
                    }),
                );
                socket.extensions.insert(LastMetadata(metadata.clone()));
            }

            let subscriber_id = sub.id;
            socket
                .extensions
                .insert(ActiveStream { session: session.clone(), subscriber_id });

            let socket_for_task = socket.clone();
            tokio::spawn(async move {
                let mut sub = sub;
                loop {
                    match sub.recv().await {
                        Some(BusMessage::Packet(packet)) => {
                            let payload = packet_to_payload(&packet);
                            if socket_for_task.emit("video-data", &payload).is_err() {
                                break;
                            }
                        }
                        Some(BusMessage::Closed(_)) | None => break,
                    }
                }
                session.leave(subscriber_id).await;
            });
        }
        Err(e) => {
            warn!("failed to start stream for {}: {}", device_id, e);
            let _ = socket.emit("error", &serde_json::json!({"message": e.to_string()}));
        }
    }
}

async fn stop_active_stream(socket: &SocketRef) {
    if let Some(active) = socket.extensions.remove::<ActiveStream>() {
        active.session.leave(active.subscriber_id).await;
    }
}

fn packet_to_payload(packet: &crate::session::MediaPacket) -> serde_json::Value {
    use crate::session::MediaPacket;
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0) as u64;

    match packet {
        MediaPacket::Configuration { payload } => serde_json::json!({
            "type": "config",
            "data": payload.to_vec(),
            "timestamp": now,
        }),
        MediaPacket::Data { pts, keyframe, payload } => serde_json::json!({
            "type": "data",
            "data": payload.to_vec(),
            "timestamp": now,
            "keyframe": keyframe,
            "pts": pts,
        }),
    }
}
