//! One server, one client, one message.
//!
//! Run with:
//!   cargo run --example hello

use std::thread;
use std::time::Duration;

use jobstream::{Client, Server};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let server = Server::bind(jobstream::transport::DEFAULT_ADDR)?.spawn()?;
    eprintln!("Server listening on {}", server.local_addr());

    let client = Client::connect(server.local_addr())?;
    client.send(&b"Hello from client!"[..])?;

    // Give the server's read loop a moment to log the message.
    thread::sleep(Duration::from_millis(200));

    client.shutdown()?;
    server.shutdown();
    Ok(())
}
