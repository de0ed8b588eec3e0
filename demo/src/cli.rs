//! # CLI Interface
//!
//! Command-line structure for `babble-demo`, via `clap` derive. Every flag
//! can also come from a `BABBLE_*` environment variable.

use clap::{Args, Parser, Subcommand};

use babble_sdk::config::{DEFAULT_BIND_ADDR, DEFAULT_NODE_ADDR};

use crate::logging::LogFormat;

/// Send messages through a Babble node and watch them come back as
/// committed blocks.
#[derive(Parser, Debug)]
#[command(
    name = "babble-demo",
    about = "Babble SDK send-message demo",
    version,
    propagate_version = true
)]
pub struct DemoCli {
    /// Log output format.
    #[arg(long, global = true, value_enum, env = "BABBLE_LOG_FORMAT", default_value = "pretty")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the proxy, submit each stdin line as a transaction, and print
    /// committed blocks.
    Run(RunArgs),
    /// Print the node's `/stats` counters.
    Stats(HttpArgs),
    /// Print one block fetched from the node's HTTP service.
    Block(BlockArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Address of the node's RPC listener.
    #[arg(long, env = "BABBLE_NODE_ADDR", default_value = DEFAULT_NODE_ADDR)]
    pub node_addr: String,

    /// Address this demo listens on for committed blocks.
    #[arg(long, env = "BABBLE_BIND_ADDR", default_value = DEFAULT_BIND_ADDR)]
    pub bind_addr: String,

    /// Address of the node's HTTP service. Enables the startup stats line.
    #[arg(long, env = "BABBLE_NODE_HTTP_ADDR")]
    pub node_http_addr: Option<String>,

    /// How often the consumer re-checks for shutdown while idle.
    #[arg(long, env = "BABBLE_POLL_INTERVAL_MS", default_value_t = 500)]
    pub poll_interval_ms: u64,

    /// Socket timeout for node connections.
    #[arg(long, env = "BABBLE_IO_TIMEOUT_MS", default_value_t = 10_000)]
    pub io_timeout_ms: u64,

    /// Stop consuming blocks after the first one that fails to apply.
    #[arg(long, env = "BABBLE_HALT_ON_ERROR")]
    pub halt_on_error: bool,
}

/// Where to find the node's HTTP service.
#[derive(Args, Debug)]
pub struct HttpArgs {
    /// Address of the node's RPC listener. The HTTP address defaults to the
    /// same host on port 80.
    #[arg(long, env = "BABBLE_NODE_ADDR", default_value = DEFAULT_NODE_ADDR)]
    pub node_addr: String,

    /// Explicit address of the node's HTTP service.
    #[arg(long, env = "BABBLE_NODE_HTTP_ADDR")]
    pub node_http_addr: Option<String>,
}

/// Arguments for the `block` subcommand.
#[derive(Args, Debug)]
pub struct BlockArgs {
    /// Block index.
    pub id: u64,

    #[command(flatten)]
    pub http: HttpArgs,
}
