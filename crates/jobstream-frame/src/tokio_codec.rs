use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{decode_frame, encode_frame, frame_len, peek_length, FrameConfig, HEADER_SIZE};
use crate::error::{FrameError, Result};

/// `tokio_util` codec for the length-prefixed wire format.
///
/// Use with `FramedRead`/`FramedWrite`/`Framed` over any async byte stream.
#[derive(Debug, Clone)]
pub struct LengthPrefixCodec {
    max_payload_size: usize,
}

impl LengthPrefixCodec {
    /// Codec accepting any payload the length prefix can describe.
    pub fn new() -> Self {
        Self::with_config(&FrameConfig::default())
    }

    /// Codec honoring the payload limit of `config`.
    pub fn with_config(config: &FrameConfig) -> Self {
        Self {
            max_payload_size: config.max_payload_size,
        }
    }
}

impl Default for LengthPrefixCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LengthPrefixCodec {
    type Item = Bytes;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        decode_frame(src, self.max_payload_size)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        if let Some(payload) = self.decode(src)? {
            return Ok(Some(payload));
        }
        if src.is_empty() {
            return Ok(None);
        }
        let expected = match peek_length(src) {
            Some(len) => frame_len(len),
            None => HEADER_SIZE,
        };
        Err(FrameError::TruncatedFrame {
            received: src.len(),
            expected,
        })
    }
}

impl Encoder<Bytes> for LengthPrefixCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<()> {
        if item.len() > self.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: item.len(),
                max: self.max_payload_size,
            });
        }
        encode_frame(&item, dst)
    }
}
