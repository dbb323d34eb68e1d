use bytes::Bytes;
use tracing::info;

/// Consumer of decoded inbound frames.
///
/// Called on the endpoint's read thread for every frame, in wire order.
/// Implementations must return promptly: the read loop does not decode the
/// next frame until the handler returns.
pub trait MessageHandler: Send + Sync + 'static {
    fn on_message(&self, endpoint_id: &str, payload: Bytes);
}

impl<F> MessageHandler for F
where
    F: Fn(&str, Bytes) + Send + Sync + 'static,
{
    fn on_message(&self, endpoint_id: &str, payload: Bytes) {
        self(endpoint_id, payload)
    }
}

/// Logs every received frame.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogHandler;

impl MessageHandler for LogHandler {
    fn on_message(&self, endpoint_id: &str, payload: Bytes) {
        info!(
            endpoint = %endpoint_id,
            size = payload.len(),
            payload = %payload_preview(&payload),
            "received frame"
        );
    }
}

/// UTF-8 text of a payload, or a size marker for binary data.
pub fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}
