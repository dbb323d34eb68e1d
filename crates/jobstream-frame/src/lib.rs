//! Big-endian length-prefixed message framing.
//!
//! Every message on the wire is a 4-byte big-endian payload length followed
//! by exactly that many payload bytes. There is no magic number, version or
//! checksum: one corrupt or truncated frame ends the stream.
//!
//! No partial reads, no buffer management in user code.

pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

#[cfg(feature = "async")]
pub mod tokio_codec;

pub use codec::{
    decode_frame, encode, encode_frame, frame_len, peek_length, FrameConfig, HEADER_SIZE,
    MAX_PAYLOAD,
};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;

#[cfg(feature = "async")]
pub use tokio_codec::LengthPrefixCodec;
