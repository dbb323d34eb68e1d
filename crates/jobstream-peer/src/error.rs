/// Errors that can occur in endpoint, server and client operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Transport-level error (bind, dial, accept, socket options).
    #[error("transport error: {0}")]
    Transport(#[from] jobstream_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] jobstream_frame::FrameError),

    /// The endpoint's outbound queue has been closed.
    #[error("send on closed connection {0}")]
    SendOnClosedConnection(String),

    /// The outbound queue is at capacity (non-blocking send only).
    #[error("outbound queue full for {0}")]
    QueueFull(String),

    /// No live endpoint is registered under this identity.
    #[error("no connection registered for {0}")]
    UnknownEndpoint(String),

    /// Spawning a read, write or accept thread failed.
    #[error("failed to spawn thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// A connection loop panicked.
    #[error("connection loop panicked for {0}")]
    LoopPanicked(String),
}

pub type Result<T> = std::result::Result<T, PeerError>;
