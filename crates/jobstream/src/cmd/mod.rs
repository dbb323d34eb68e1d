use clap::{Args, Subcommand};
use std::path::PathBuf;

use jobstream_peer::DEFAULT_QUEUE_CAPACITY;
use jobstream_transport::DEFAULT_ADDR;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod demo;
pub mod send;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Accept connections and print received frames.
    Serve(ServeArgs),
    /// Connect, send a single frame and disconnect.
    Send(SendArgs),
    /// Run an in-process server and client exchanging one message.
    Demo(DemoArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Demo(args) => demo::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to listen on (host:port).
    #[arg(env = "JOBSTREAM_ADDR", default_value = DEFAULT_ADDR)]
    pub addr: String,
    /// Send every received frame back to its sender.
    #[arg(long)]
    pub echo: bool,
    /// Exit after receiving N frames.
    #[arg(long)]
    pub count: Option<usize>,
    /// Outbound queue capacity per connection.
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Address to connect to (host:port).
    #[arg(env = "JOBSTREAM_ADDR", default_value = DEFAULT_ADDR)]
    pub addr: String,
    /// Raw string payload.
    #[arg(long, conflicts_with = "file")]
    pub data: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with = "data")]
    pub file: Option<PathBuf>,
    /// Wait for one response frame and print it.
    #[arg(long)]
    pub wait: bool,
    /// Maximum time to wait for response when --wait is set (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub wait_timeout: String,
}

#[derive(Args, Debug)]
pub struct DemoArgs {
    /// Address the demo server listens on (host:port).
    #[arg(env = "JOBSTREAM_ADDR", default_value = DEFAULT_ADDR)]
    pub addr: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
