//! Echo server: every frame is sent back to the connection it came from.
//!
//! Run with:
//!   cargo run --example echo-server
//!
//! In another terminal:
//!   cargo run --features cli -- send 127.0.0.1:9000 --data hello --wait

use std::sync::mpsc;

use bytes::Bytes;
use jobstream::Server;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (tx, rx) = mpsc::channel::<(String, Bytes)>();
    let server = Server::bind(jobstream::transport::DEFAULT_ADDR)?
        .with_handler(move |id: &str, payload: Bytes| {
            let _ = tx.send((id.to_string(), payload));
        })
        .spawn()?;
    eprintln!("Listening on {}", server.local_addr());

    for (id, payload) in rx {
        eprintln!("Received {} bytes from {id}", payload.len());
        if let Err(err) = server.send_to(&id, payload) {
            eprintln!("Echo to {id} failed: {err}");
        }
    }

    Ok(())
}
