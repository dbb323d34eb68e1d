/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload exceeds the configured (or protocol) maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The stream ended before a complete frame was received.
    ///
    /// `received` counts the bytes of the current frame (length prefix
    /// included) that arrived before end-of-stream.
    #[error("truncated frame ({received} of {expected} bytes received)")]
    TruncatedFrame { received: usize, expected: usize },

    /// Reading from the stream failed.
    #[error("stream read error: {0}")]
    Read(#[source] std::io::Error),

    /// Writing to the stream failed.
    #[error("stream write error: {0}")]
    Write(#[source] std::io::Error),
}

impl FrameError {
    /// True when the stream ended exactly on a frame boundary.
    pub fn is_clean_close(&self) -> bool {
        matches!(self, FrameError::TruncatedFrame { received: 0, .. })
    }
}

// tokio-util codecs require `From<io::Error>`; transport-level failures
// surfaced through a codec are read-side failures.
impl From<std::io::Error> for FrameError {
    fn from(err: std::io::Error) -> Self {
        FrameError::Read(err)
    }
}

pub(crate) fn transport_io(err: jobstream_transport::TransportError) -> std::io::Error {
    match err {
        jobstream_transport::TransportError::Io(io)
        | jobstream_transport::TransportError::Accept(io) => io,
        jobstream_transport::TransportError::Bind { source, .. }
        | jobstream_transport::TransportError::Connect { source, .. } => source,
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
