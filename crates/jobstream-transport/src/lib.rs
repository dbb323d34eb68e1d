//! TCP transport for the jobstream framing protocol.
//!
//! This is the lowest layer of jobstream: binding a listener, accepting and
//! dialing connections. Everything else builds on top of the [`NetStream`]
//! type provided here.

pub mod error;
pub mod stream;
pub mod tcp;

pub use error::{Result, TransportError};
pub use stream::NetStream;
pub use tcp::{TcpTransport, DEFAULT_ADDR};
