//! Connection endpoints, server registry and client.
//!
//! This is the "just works" layer. A [`Server`] accepts TCP connections and
//! tracks each one as an [`Endpoint`] in its [`Registry`]; a [`Client`] dials
//! one server. Both sides send and receive opaque payloads framed by
//! `jobstream-frame`.

pub mod client;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod handler;
pub mod registry;
pub mod server;

pub use client::Client;
pub use config::{EndpointConfig, DEFAULT_QUEUE_CAPACITY};
pub use endpoint::{Endpoint, TeardownHook};
pub use error::{PeerError, Result};
pub use handler::{payload_preview, LogHandler, MessageHandler};
pub use registry::Registry;
pub use server::{Server, ServerHandle};
