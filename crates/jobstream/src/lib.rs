//! Length-prefixed TCP messaging with symmetric client and server roles.
//!
//! Every message travels as a 4-byte big-endian length followed by the
//! payload. A server tracks each accepted connection by its remote address;
//! a client owns exactly one connection. Both run one read thread and one
//! write thread per connection, fed by a bounded outbound queue.
//!
//! # Crate Structure
//!
//! - [`transport`]: TCP bind/accept/dial
//! - [`frame`]: Big-endian length-prefixed framing
//! - [`peer`]: Endpoints, server registry and client

/// Re-export transport types.
pub mod transport {
    pub use jobstream_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use jobstream_frame::*;
}

/// Re-export peer types.
pub mod peer {
    pub use jobstream_peer::*;
}

pub use jobstream_peer::{Client, Server, ServerHandle};
