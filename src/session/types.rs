use bytes::Bytes;
use serde::Serialize;

/// Frozen parameters of a session. Changing any field requires a full
/// restart; an existing session with different options rejects a new
/// subscriber with `OptionsMismatch` (see `session::supervisor`).
#[derive(Debug, Clone, PartialEq)]
pub struct StreamOptions {
    pub max_size: u32,
    pub bit_rate: u32,
    pub max_fps: u32,
    pub codec: String,
    pub idr_interval_secs: u32,
    pub send_frame_meta: bool,
    pub send_device_meta: bool,
    pub send_codec_meta: bool,
    pub send_dummy_byte: bool,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            max_size: 1280,
            bit_rate: 4_000_000,
            max_fps: 60,
            codec: "h264".to_string(),
            idr_interval_secs: 1,
            send_frame_meta: true,
            send_device_meta: true,
            send_codec_meta: true,
            send_dummy_byte: true,
        }
    }
}

/// Populated exactly once per session from the scrcpy handshake; immutable
/// thereafter. `is_landscape` is derived from `width`/`height` so callers can
/// detect an orientation change across a session restart without
/// recomputing it themselves.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoMetadata {
    pub device_name: String,
    pub width: u32,
    pub height: u32,
    pub codec_id: u32,
    pub is_landscape: bool,
}

/// One unit handed from the Stream Codec to the Fan-Out Bus. Payload bytes
/// are never mutated once produced.
#[derive(Debug, Clone)]
pub enum MediaPacket {
    Configuration { payload: Bytes },
    Data {
        pts: u64,
        keyframe: bool,
        payload: Bytes,
    },
}

impl MediaPacket {
    pub fn payload(&self) -> &Bytes {
        match self {
            MediaPacket::Configuration { payload } => payload,
            MediaPacket::Data { payload, .. } => payload,
        }
    }

    pub fn is_keyframe(&self) -> bool {
        matches!(self, MediaPacket::Data { keyframe: true, .. })
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, MediaPacket::Configuration { .. })
    }

    /// True for packets the Fan-Out Bus's backpressure policy must never drop.
    pub fn is_protected(&self) -> bool {
        self.is_configuration() || self.is_keyframe()
    }
}

/// Per-device cache of the most recent configuration and keyframe payloads,
/// used to let a late-joining subscriber decode immediately.
#[derive(Debug, Clone, Default)]
pub struct FrameCache {
    pub configuration: Option<MediaPacket>,
    pub keyframe: Option<MediaPacket>,
}

impl FrameCache {
    /// Applies a published packet's effect on the cache. On a new
    /// configuration, the cached keyframe is invalidated until the next
    /// keyframe arrives.
    pub fn observe(&mut self, packet: &MediaPacket) {
        match packet {
            MediaPacket::Configuration { .. } => {
                self.configuration = Some(packet.clone());
                self.keyframe = None;
            }
            MediaPacket::Data { keyframe: true, .. } => {
                self.keyframe = Some(packet.clone());
            }
            MediaPacket::Data { keyframe: false, .. } => {}
        }
    }

    /// Replay order on join: configuration first, then keyframe.
    pub fn replay(&self) -> Vec<MediaPacket> {
        let mut out = Vec::with_capacity(2);
        if let Some(cfg) = &self.configuration {
            out.push(cfg.clone());
        }
        if let Some(kf) = &self.keyframe {
            out.push(kf.clone());
        }
        out
    }
}

pub type SubscriberId = u64;
