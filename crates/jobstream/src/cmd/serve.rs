use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use jobstream_peer::{EndpointConfig, Server};

use crate::cmd::ServeArgs;
use crate::exit::{peer_error, CliError, CliResult, SUCCESS};
use crate::output::{print_frame, OutputFormat};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let (tx, rx) = mpsc::channel::<(String, Bytes)>();
    let config = EndpointConfig::default().with_queue_capacity(args.queue_capacity);

    let handle = Server::bind(args.addr.as_str())
        .map_err(|err| peer_error("bind failed", err))?
        .with_config(config)
        .with_handler(move |id: &str, payload: Bytes| {
            let _ = tx.send((id.to_string(), payload));
        })
        .spawn()
        .map_err(|err| peer_error("server start failed", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut printed = 0usize;
    let mut last_sender = None;

    while running.load(Ordering::SeqCst) {
        let (id, payload) = match rx.recv_timeout(POLL_INTERVAL) {
            Ok(received) => received,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        print_frame(&payload, &id, format);

        if args.echo {
            if let Err(err) = handle.send_to(&id, payload) {
                tracing::warn!(endpoint = %id, error = %err, "echo failed");
            }
        }

        printed = printed.saturating_add(1);
        last_sender = Some(id);

        if let Some(count) = args.count {
            if printed >= count {
                break;
            }
        }
    }

    // Let the final echo reach the wire before connections are torn down.
    if args.echo {
        if let Some(endpoint) = last_sender.and_then(|id| handle.registry().lookup(&id)) {
            if let Err(err) = endpoint.finish() {
                tracing::debug!(endpoint = %endpoint.id(), error = %err, "final echo not delivered");
            }
        }
    }

    handle.shutdown();
    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| {
        CliError::new(
            crate::exit::INTERNAL,
            format!("signal handler setup failed: {err}"),
        )
    })
}
