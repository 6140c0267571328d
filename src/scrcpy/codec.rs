use crate::error::{Result, ScrcpyError};
use crate::session::types::{MediaPacket, StreamOptions, VideoMetadata};
use bytes::{Bytes, BytesMut};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Known codec FourCC tags scrcpy's modern protocol emits as codec ids.
const CODEC_ID_H264: u32 = 0x68_32_36_34; // "h264"
const CODEC_ID_H265: u32 = 0x68_32_36_35; // "h265"
const CODEC_ID_AV1: u32 = 0x61_76_30_31; // "av01"

const KNOWN_CODEC_IDS: [u32; 3] = [CODEC_ID_H264, CODEC_ID_H265, CODEC_ID_AV1];

const PTS_CONFIG: u64 = u64::MAX;
const PTS_KEYFRAME_FLAG: u64 = 1 << 63;
const MAX_PACKET_LEN: u32 = 10 * 1024 * 1024;
const RESYNC_SCAN_LIMIT: usize = 200;

const NAL_TYPE_P: u8 = 1;
const NAL_TYPE_IDR: u8 = 5;
const NAL_TYPE_SPS: u8 = 7;
const NAL_TYPE_PPS: u8 = 8;

/// Reads exactly `buf.len()` bytes or fails with `ConnectionClosed`.
async fn read_exact(stream: &mut TcpStream, buf: &mut [u8]) -> Result<()> {
    stream
        .read_exact(buf)
        .await
        .map_err(|_| ScrcpyError::ConnectionClosed)?;
    Ok(())
}

/// Owns the read buffer for one scrcpy video socket. `read_metadata` must be
/// called exactly once, before any call to `read_packet`.
pub struct StreamCodec {
    stream: TcpStream,
    raw_nal_mode: bool,
    raw_buffer: BytesMut,
}

impl StreamCodec {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            raw_nal_mode: false,
            raw_buffer: BytesMut::new(),
        }
    }

    /// Parses the scrcpy handshake (all big-endian) per the toggles in
    /// `options`. Field order: optional dummy byte, optional 64-byte
    /// NUL-terminated device name, then either codec meta (4-byte codec id
    /// plus width/height, with a legacy packed-resolution fallback for
    /// unknown codec ids) or, if device meta was sent but codec meta wasn't,
    /// a bare 2-byte width/height pair.
    pub async fn read_metadata(&mut self, options: &StreamOptions) -> Result<VideoMetadata> {
        if options.send_dummy_byte {
            let mut dummy = [0u8; 1];
            read_exact(&mut self.stream, &mut dummy).await?;
        }

        let device_name = if options.send_device_meta {
            let mut buf = [0u8; 64];
            read_exact(&mut self.stream, &mut buf).await?;
            let nul_pos = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
            String::from_utf8_lossy(&buf[..nul_pos]).into_owned()
        } else {
            String::new()
        };

        let (codec_id, width, height) = if options.send_codec_meta {
            let mut buf = [0u8; 4];
            read_exact(&mut self.stream, &mut buf).await?;
            let raw = u32::from_be_bytes(buf);

            if KNOWN_CODEC_IDS.contains(&raw) {
                let mut wh = [0u8; 8];
                read_exact(&mut self.stream, &mut wh).await?;
                let width = u32::from_be_bytes([wh[0], wh[1], wh[2], wh[3]]);
                let height = u32::from_be_bytes([wh[4], wh[5], wh[6], wh[7]]);
                (raw, width, height)
            } else {
                debug!("unknown codec id 0x{:08x}, falling back to legacy packed resolution", raw);
                let width = (raw >> 16) & 0xFFFF;
                let height = raw & 0xFFFF;
                (CODEC_ID_H264, width, height)
            }
        } else if options.send_device_meta {
            let mut wh = [0u8; 4];
            read_exact(&mut self.stream, &mut wh).await?;
            let width = u16::from_be_bytes([wh[0], wh[1]]) as u32;
            let height = u16::from_be_bytes([wh[2], wh[3]]) as u32;
            (CODEC_ID_H264, width, height)
        } else {
            (CODEC_ID_H264, 0, 0)
        };

        Ok(VideoMetadata {
            device_name,
            width,
            height,
            codec_id,
            is_landscape: width > height,
        })
    }

    /// Reads the next media packet. Framed mode reads a 12-byte header
    /// (8-byte pts, 4-byte length) followed by the payload; on an
    /// out-of-range length it attempts resynchronization and, on success,
    /// permanently switches to raw NAL extraction mode for the rest of the
    /// session.
    pub async fn read_packet(&mut self) -> Result<MediaPacket> {
        if self.raw_nal_mode {
            return self.read_raw_nal().await;
        }

        let mut header = [0u8; 12];
        match self.stream.read_exact(&mut header).await {
            Ok(_) => {}
            Err(_) => return Err(ScrcpyError::ConnectionClosed),
        }

        let pts_raw = u64::from_be_bytes(header[0..8].try_into().unwrap());
        let len = u32::from_be_bytes(header[8..12].try_into().unwrap());

        if len > MAX_PACKET_LEN {
            warn!("packet length 0x{:x} out of range, attempting resync", len);
            return self.resync().await;
        }

        let mut payload = vec![0u8; len as usize];
        read_exact(&mut self.stream, &mut payload).await?;
        let payload = Bytes::from(payload);

        Ok(Self::classify_framed(pts_raw, payload))
    }

    fn classify_framed(pts_raw: u64, payload: Bytes) -> MediaPacket {
        if pts_raw == PTS_CONFIG {
            MediaPacket::Configuration { payload }
        } else if pts_raw & PTS_KEYFRAME_FLAG != 0 {
            MediaPacket::Data {
                pts: pts_raw & !PTS_KEYFRAME_FLAG,
                keyframe: true,
                payload,
            }
        } else {
            MediaPacket::Data {
                pts: pts_raw,
                keyframe: false,
                payload,
            }
        }
    }

    /// Scans forward for an Annex-B start code within `RESYNC_SCAN_LIMIT`
    /// bytes. On success, aligns the stream there and switches to raw NAL
    /// mode permanently. On failure, fails the whole codec with
    /// `ProtocolDesync`.
    ///
    /// `raw_buffer` is untouched up to this point, so the handoff into
    /// `read_raw_nal` starts from a clean boundary and loses nothing: the
    /// first NAL recovered after resync is read in full, same as any other.
    async fn resync(&mut self) -> Result<MediaPacket> {
        let mut window: Vec<u8> = Vec::new();
        for _ in 0..RESYNC_SCAN_LIMIT {
            let mut byte = [0u8; 1];
            read_exact(&mut self.stream, &mut byte).await?;
            window.push(byte[0]);

            if ends_with_start_code(&window) {
                self.raw_nal_mode = true;
                return self.read_raw_nal().await;
            }
        }
        Err(ScrcpyError::ProtocolDesync)
    }

    /// Raw NAL extraction: scan byte by byte for successive Annex-B start
    /// codes and emit one packet per NAL unit in between, classified by NAL
    /// type (1=P, 5=IDR, 7=SPS, 8=PPS). `raw_buffer` is a struct field, not a
    /// local, so the stream position right after the last start code found
    /// survives across calls instead of being rediscovered (and one NAL lost)
    /// on every invocation.
    async fn read_raw_nal(&mut self) -> Result<MediaPacket> {
        loop {
            let mut byte = [0u8; 1];
            read_exact(&mut self.stream, &mut byte).await?;
            self.raw_buffer.extend_from_slice(&byte);

            if self.raw_buffer.len() > MAX_PACKET_LEN as usize {
                return Err(ScrcpyError::OversizedPacket);
            }

            if !ends_with_start_code(&self.raw_buffer) {
                continue;
            }

            let start_code_len =
                if self.raw_buffer.len() >= 4 && &self.raw_buffer[self.raw_buffer.len() - 4..] == [0, 0, 0, 1] {
                    4
                } else {
                    3
                };
            let start_code_begin = self.raw_buffer.len() - start_code_len;

            let nal_data = self.raw_buffer[..start_code_begin].to_vec();
            self.raw_buffer = BytesMut::new();

            if nal_data.is_empty() {
                continue;
            }
            return Ok(Self::classify_nal(nal_data));
        }
    }

    fn classify_nal(nal_data: Vec<u8>) -> MediaPacket {
        let nal_type = nal_data[0] & 0x1F;
        let payload = Bytes::from(nal_data);
        match nal_type {
            NAL_TYPE_SPS | NAL_TYPE_PPS => MediaPacket::Configuration { payload },
            NAL_TYPE_IDR => MediaPacket::Data {
                pts: 0,
                keyframe: true,
                payload,
            },
            NAL_TYPE_P => MediaPacket::Data {
                pts: 0,
                keyframe: false,
                payload,
            },
            _ => MediaPacket::Data {
                pts: 0,
                keyframe: false,
                payload,
            },
        }
    }
}

fn ends_with_start_code(buf: &[u8]) -> bool {
    let len = buf.len();
    (len >= 3 && &buf[len - 3..] == [0, 0, 1]) || (len >= 4 && &buf[len - 4..] == [0, 0, 0, 1])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_framed_config_sentinel() {
        let packet = StreamCodec::classify_framed(PTS_CONFIG, Bytes::from_static(b"sps-pps"));
        assert!(packet.is_configuration());
    }

    #[test]
    fn classify_framed_keyframe_masks_high_bit() {
        let packet = StreamCodec::classify_framed(PTS_KEYFRAME_FLAG | 42, Bytes::from_static(b"idr"));
        match packet {
            MediaPacket::Data { pts, keyframe, .. } => {
                assert!(keyframe);
                assert_eq!(pts, 42);
            }
            _ => panic!("expected data packet"),
        }
    }

    #[test]
    fn classify_framed_plain_pts() {
        let packet = StreamCodec::classify_framed(7, Bytes::from_static(b"p-frame"));
        match packet {
            MediaPacket::Data { pts, keyframe, .. } => {
                assert!(!keyframe);
                assert_eq!(pts, 7);
            }
            _ => panic!("expected data packet"),
        }
    }

    #[test]
    fn classify_nal_types() {
        assert!(StreamCodec::classify_nal(vec![0x67, 1, 2]).is_configuration());
        assert!(StreamCodec::classify_nal(vec![0x68, 1, 2]).is_configuration());
        assert!(StreamCodec::classify_nal(vec![0x65, 1, 2]).is_keyframe());
        assert!(!StreamCodec::classify_nal(vec![0x61, 1, 2]).is_protected());
    }

    #[test]
    fn start_code_detection() {
        assert!(ends_with_start_code(&[0, 0, 1]));
        assert!(ends_with_start_code(&[0, 0, 0, 1]));
        assert!(!ends_with_start_code(&[0, 1, 1]));
    }
}
