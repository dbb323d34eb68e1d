use jobstream_frame::FrameConfig;

/// Default bound of each endpoint's outbound queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Per-connection behavior configuration.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Outbound queue capacity; `send` blocks while this many frames are pending.
    /// Values below 1 are treated as 1.
    pub queue_capacity: usize,
    /// Payload limit and optional stream timeouts.
    pub frame: FrameConfig,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            frame: FrameConfig::default(),
        }
    }
}

impl EndpointConfig {
    /// Override the outbound queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Override the frame configuration.
    pub fn with_frame_config(mut self, frame: FrameConfig) -> Self {
        self.frame = frame;
        self
    }

    pub(crate) fn effective_capacity(&self) -> usize {
        self.queue_capacity.max(1)
    }
}
