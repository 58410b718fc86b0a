use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, warn};

use crate::error::{FrameError, Result};
use crate::packet::packet_name;

/// Frame header: type (4) + magic (4) + length (4) = 12 bytes.
pub const HEADER_SIZE: usize = 12;

/// Magic marker: "FOSC", stored big-endian at header offset 4.
pub const MAGIC: u32 = 0x464F_5343;

const MAGIC_BYTES: [u8; 4] = MAGIC.to_be_bytes();

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// One complete protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Device-defined packet type.
    pub packet_type: u32,
    /// The message payload.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(packet_type: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            packet_type,
            payload: payload.into(),
        }
    }

    /// The total wire size of this frame (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Human-readable name of the packet type.
    pub fn name(&self) -> &'static str {
        packet_name(self.packet_type)
    }
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────┬──────────────┬──────────────┬─────────────────┐
/// │ Type (4B LE) │ Magic (4B BE)│ Length (4B LE)│ Payload         │
/// │              │ "FOSC"       │              │ (Length bytes)  │
/// └──────────────┴──────────────┴──────────────┴─────────────────┘
/// ```
pub fn encode_frame(packet_type: u32, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > u32::MAX as usize {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        });
    }
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_u32_le(packet_type);
    dst.put_u32(MAGIC);
    dst.put_u32_le(payload.len() as u32);
    dst.put_slice(payload);
    Ok(())
}

/// Slide forward one byte at a time until the buffer either begins with a
/// candidate header or holds fewer than [`HEADER_SIZE`] bytes.
///
/// Returns the number of bytes discarded. Bytes are never skipped by a frame
/// length here, so a partially-arrived valid frame is never lost.
pub fn resync(src: &mut BytesMut) -> usize {
    let mut dropped = 0;
    while src.len() >= HEADER_SIZE && src[4..8] != MAGIC_BYTES {
        src.advance(1);
        dropped += 1;
    }
    dropped
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// Garbage in front of a frame is discarded via [`resync`]. On success,
/// consumes the frame bytes from the buffer.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>> {
    resync(src);
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    let payload_len = u32::from_le_bytes([src[8], src[9], src[10], src[11]]) as usize;
    if payload_len > max_payload {
        return Err(FrameError::Malformed {
            declared: payload_len,
            max: max_payload,
        });
    }

    let total = HEADER_SIZE + payload_len;
    if src.len() < total {
        src.reserve(total - src.len());
        return Ok(None);
    }

    let packet_type = src.get_u32_le();
    src.advance(HEADER_SIZE - 4);
    let payload = src.split_to(payload_len).freeze();

    Ok(Some(Frame {
        packet_type,
        payload,
    }))
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

/// `tokio_util` codec for device frames.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    config: FrameConfig,
    discarded: u64,
}

impl FrameCodec {
    /// Create a codec with default configuration.
    pub fn new() -> Self {
        Self::with_config(FrameConfig::default())
    }

    /// Create a codec with explicit configuration.
    pub fn with_config(config: FrameConfig) -> Self {
        Self {
            config,
            discarded: 0,
        }
    }

    /// Total bytes dropped while resynchronizing.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        let dropped = resync(src);
        if dropped > 0 {
            self.discarded += dropped as u64;
            warn!(dropped, total = self.discarded, "resynchronized on frame magic");
        }
        decode_frame(src, self.config.max_payload_size)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None => {
                if !src.is_empty() {
                    debug!(remaining = src.len(), "dropping incomplete bytes at end of stream");
                    src.clear();
                }
                Ok(None)
            }
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        if frame.payload.len() > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: frame.payload.len(),
                max: self.config.max_payload_size,
            });
        }
        encode_frame(frame.packet_type, &frame.payload, dst)
    }
}
