use clap::{Args, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::exit::{CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod config;
pub mod serve;
pub mod stream;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Connect to an upstream server and print streamed frames.
    Stream(StreamArgs),
    /// Serve stdin lines to one stream listener.
    Serve(ServeArgs),
    /// Load, validate and print a settings file.
    Config(ConfigArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Stream(args) => stream::run(args, format),
        Command::Serve(args) => serve::run(args, format),
        Command::Config(args) => config::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct StreamArgs {
    /// Upstream address (`host:port`, `tcp://host:port` or `unix:///path`).
    pub address: String,
    /// Stream to request from the upstream.
    #[arg(long, env = "STREAMTAP_STREAM_ID")]
    pub stream_id: String,
    /// Settings file supplying timeouts.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Read-idle timeout (e.g. 500ms, 5s; 0 disables). Overrides --config.
    #[arg(long, value_name = "DURATION")]
    pub read_timeout: Option<String>,
    /// Connect + handshake timeout (0 disables). Overrides --config.
    #[arg(long, value_name = "DURATION")]
    pub handshake_timeout: Option<String>,
    /// Exit after printing N frames.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to bind (`host:port`, `tcp://host:port` or `unix:///path`).
    pub bind: String,
    /// Time allowed for the client handshake (0 disables).
    #[arg(long, value_name = "DURATION", default_value = "5s")]
    pub handshake_timeout: String,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Settings JSON file.
    pub file: PathBuf,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse a human duration; a bare `0` disables the timeout.
pub(crate) fn parse_timeout(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "timeout must not be empty"));
    }
    if input == "0" {
        return Ok(Duration::ZERO);
    }
    humantime::parse_duration(input)
        .map_err(|err| CliError::new(USAGE, format!("invalid timeout '{input}': {err}")))
}

pub(crate) fn runtime() -> CliResult<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| CliError::new(INTERNAL, format!("runtime setup failed: {err}")))
}
