use std::fs;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::Duration;

use bytes::Bytes;
use jobstream_peer::{Client, EndpointConfig};

use crate::cmd::SendArgs;
use crate::exit::{peer_error, CliError, CliResult, FAILURE, SUCCESS, TIMEOUT, USAGE};
use crate::output::{print_frame, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let wait_timeout = parse_duration(&args.wait_timeout)?;
    let payload = resolve_payload(&args)?;

    let (tx, rx) = mpsc::channel::<(String, Bytes)>();
    let client = Client::connect_with(
        args.addr.as_str(),
        EndpointConfig::default(),
        move |id: &str, payload: Bytes| {
            let _ = tx.send((id.to_string(), payload));
        },
    )
    .map_err(|err| peer_error("connect failed", err))?;

    client
        .send(payload)
        .map_err(|err| peer_error("send failed", err))?;

    if args.wait {
        match wait_for_response(&rx, wait_timeout) {
            Ok((id, frame)) => print_frame(&frame, &id, format),
            Err(err) => {
                client.close();
                return Err(err);
            }
        }
    }

    client
        .shutdown()
        .map_err(|err| peer_error("send failed", err))?;
    Ok(SUCCESS)
}

fn resolve_payload(args: &SendArgs) -> CliResult<Bytes> {
    if let Some(data) = &args.data {
        return Ok(Bytes::copy_from_slice(data.as_bytes()));
    }
    if let Some(path) = &args.file {
        return fs::read(path).map(Bytes::from).map_err(|err| {
            crate::exit::io_error(&format!("failed reading {}", path.display()), err)
        });
    }
    Ok(Bytes::new())
}

fn wait_for_response(
    rx: &Receiver<(String, Bytes)>,
    timeout: Duration,
) -> CliResult<(String, Bytes)> {
    match rx.recv_timeout(timeout) {
        Ok(received) => Ok(received),
        Err(RecvTimeoutError::Timeout) => Err(CliError::new(
            TIMEOUT,
            format!("no response within {timeout:?}"),
        )),
        Err(RecvTimeoutError::Disconnected) => Err(CliError::new(
            FAILURE,
            "connection closed before a response arrived",
        )),
    }
}

fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
