use std::io::{ErrorKind, Read};

use bytes::{Bytes, BytesMut};
use jobstream_transport::NetStream;
use tracing::debug;

use crate::codec::{decode_frame, frame_len, peek_length, FrameConfig, HEADER_SIZE};
use crate::error::{transport_io, FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete frames from any `Read` stream.
///
/// Handles partial reads internally; callers always get complete payloads.
/// A frame that cannot be completed is an error; the reader never hands out
/// a partial payload and never tries to resynchronise after a failure.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Read the next complete frame payload (blocking).
    ///
    /// Returns `Err(FrameError::TruncatedFrame)` when end-of-stream arrives
    /// before the frame is complete. An end-of-stream on a frame boundary is
    /// reported the same way with `received == 0`.
    pub fn read_frame(&mut self) -> Result<Bytes> {
        loop {
            if let Some(payload) = decode_frame(&mut self.buf, self.config.max_payload_size)? {
                return Ok(payload);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Read(err)),
            };

            if read == 0 {
                return Err(self.truncated());
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    fn truncated(&self) -> FrameError {
        let expected = match peek_length(&self.buf) {
            Some(len) => frame_len(len),
            None => HEADER_SIZE,
        };
        if !self.buf.is_empty() {
            debug!(received = self.buf.len(), expected, "stream ended mid-frame");
        }
        FrameError::TruncatedFrame {
            received: self.buf.len(),
            expected,
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl FrameReader<NetStream> {
    /// Create a frame reader for a TCP stream and apply read timeout from config.
    pub fn with_config_tcp(inner: NetStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(|err| FrameError::Read(transport_io(err)))?;
        Ok(Self::with_config(inner, config))
    }
}
