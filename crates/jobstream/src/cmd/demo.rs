use std::sync::mpsc;
use std::time::Duration;

use bytes::Bytes;
use jobstream_peer::{Client, Server};

use crate::cmd::DemoArgs;
use crate::exit::{peer_error, CliError, CliResult, SUCCESS, TIMEOUT};
use crate::output::{print_frame, OutputFormat};

const DEMO_MESSAGE: &[u8] = b"Hello from client!";
const RECEIVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Start a server, dial it, send one message and shut both sides down.
pub fn run(args: DemoArgs, format: OutputFormat) -> CliResult<i32> {
    let (tx, rx) = mpsc::channel::<(String, Bytes)>();
    let server = Server::bind(args.addr.as_str())
        .map_err(|err| peer_error("bind failed", err))?
        .with_handler(move |id: &str, payload: Bytes| {
            let _ = tx.send((id.to_string(), payload));
        })
        .spawn()
        .map_err(|err| peer_error("server start failed", err))?;

    let client =
        Client::connect(server.local_addr()).map_err(|err| peer_error("connect failed", err))?;
    client
        .send(DEMO_MESSAGE)
        .map_err(|err| peer_error("send failed", err))?;

    let (id, payload) = rx.recv_timeout(RECEIVE_TIMEOUT).map_err(|_| {
        CliError::new(
            TIMEOUT,
            format!("server did not receive the message within {RECEIVE_TIMEOUT:?}"),
        )
    })?;
    print_frame(&payload, &id, format);

    client
        .shutdown()
        .map_err(|err| peer_error("client shutdown failed", err))?;
    server.shutdown();
    Ok(SUCCESS)
}
