use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Frame header: big-endian payload length (4 bytes).
pub const HEADER_SIZE: usize = 4;

/// Largest payload the 32-bit length prefix can describe.
pub const MAX_PAYLOAD: usize = u32::MAX as usize;

/// Encode a payload into the wire format, appending to `dst`.
///
/// Wire format:
/// ```text
/// ┌──────────────────┬──────────────────┐
/// │ Length (4B BE)   │ Payload          │
/// │ u32              │ (Length bytes)   │
/// └──────────────────┴──────────────────┘
/// ```
pub fn encode_frame(payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > MAX_PAYLOAD {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD,
        });
    }
    dst.reserve(frame_len(payload.len()));
    dst.put_u32(payload.len() as u32);
    dst.put_slice(payload);
    Ok(())
}

/// Encode a payload into a freshly allocated frame.
pub fn encode(payload: &[u8]) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(frame_len(payload.len()));
    encode_frame(payload, &mut buf)?;
    Ok(buf.freeze())
}

/// Wire size of a frame carrying `payload_len` bytes.
///
/// Saturates instead of wrapping when `usize` is 32 bits wide and the prefix
/// is near `u32::MAX`.
pub fn frame_len(payload_len: usize) -> usize {
    HEADER_SIZE.saturating_add(payload_len)
}

/// Read the length prefix at the front of `src`, if it is buffered.
pub fn peek_length(src: &[u8]) -> Option<usize> {
    let header: [u8; HEADER_SIZE] = src.get(..HEADER_SIZE)?.try_into().ok()?;
    Some(u32::from_be_bytes(header) as usize)
}

/// Split the first complete frame off the front of `src`.
///
/// Leaves `src` untouched and yields `Ok(None)` until the header and the whole
/// payload are buffered. A declared length above `max_payload` is rejected
/// as soon as the header is visible, before any payload arrives.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Bytes>> {
    let Some(payload_len) = peek_length(src) else {
        return Ok(None);
    };

    if payload_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    let total = frame_len(payload_len);
    if src.len() < total {
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    Ok(Some(src.split_to(payload_len).freeze()))
}

/// Configuration for frame reading and writing.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: `u32::MAX`.
    pub max_payload_size: usize,
    /// Read timeout for blocking operations. Default: none (block forever).
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations. Default: none (block forever).
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: MAX_PAYLOAD,
            read_timeout: None,
            write_timeout: None,
        }
    }
}
