// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Babble Send-Message Demo
//!
//! Entry point for the `babble-demo` binary: a minimal application on top
//! of a Babble node.
//!
//! - `run`     — submit stdin lines as transactions, print committed blocks
//! - `stats`   — print the node's `/stats` counters
//! - `block`   — print one block from the node's HTTP service
//! - `version` — print build version information

mod cli;
mod logging;

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;

use babble_sdk::config::{default_http_addr, SUBMIT_TX_METHOD};
use babble_sdk::{Block, CallbackPolicy, NodeHttpClient, Proxy, ProxyConfig};

use cli::{Commands, DemoCli, HttpArgs};
use logging::LogFormat;

/// Timeout for the one-shot HTTP subcommands.
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DemoCli::parse();

    match cli.command {
        Commands::Run(args) => run_demo(args, cli.log_format).await,
        Commands::Stats(args) => query_stats(args).await,
        Commands::Block(args) => query_block(args.id, args.http).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Starts a proxy and pumps stdin into it until EOF or a shutdown signal.
async fn run_demo(args: cli::RunArgs, log_format: LogFormat) -> Result<()> {
    logging::init_logging("babble_demo=info,babble_sdk=info", log_format);

    let config = ProxyConfig {
        node_addr: args.node_addr,
        bind_addr: args.bind_addr,
        node_http_addr: args.node_http_addr,
        poll_interval_ms: args.poll_interval_ms,
        io_timeout_ms: args.io_timeout_ms,
        callback_policy: if args.halt_on_error {
            CallbackPolicy::Halt
        } else {
            CallbackPolicy::LogAndContinue
        },
        ..ProxyConfig::default()
    };

    let proxy = Proxy::new(config, print_block);
    let local_addr = proxy
        .run()
        .await
        .context("failed to start the babble proxy")?;
    tracing::info!(
        %local_addr,
        node = %proxy.config().node_addr,
        "type a message and press enter to submit it"
    );

    if proxy.config().node_http_addr.is_some() {
        match proxy.stats().await {
            Ok(stats) => tracing::info!(?stats, "node stats"),
            Err(e) => tracing::warn!(kind = %e.kind(), error = %e, "node stats unavailable"),
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("shutdown signal received");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    tracing::info!("stdin closed");
                    break;
                };
                let message = line.trim();
                if message.is_empty() {
                    continue;
                }
                match proxy.send_tx(message).await {
                    Ok(reply) => tracing::info!(
                        method = SUBMIT_TX_METHOD,
                        bytes = message.len(),
                        acknowledged = reply.is_some(),
                        "transaction submitted"
                    ),
                    Err(e) => tracing::error!(kind = %e.kind(), error = %e, "submit failed"),
                }
            }
        }
    }

    proxy.shutdown().await;
    tokio::task::block_in_place(|| proxy.join_consumer());
    tracing::info!(
        committed = proxy.committed_count(),
        failed = proxy.failed_count(),
        "babble-demo stopped"
    );
    Ok(())
}

/// The demo's state machine: print every committed block to stdout.
fn print_block(block: Block) -> Result<()> {
    let transactions: Vec<String> = block
        .transactions()
        .iter()
        .map(|tx| String::from_utf8_lossy(tx).into_owned())
        .collect();

    let rendered = json!({
        "index": block.index(),
        "round_received": block.round_received(),
        "transactions": transactions,
        "block": block.to_value(),
    });
    println!("{}", serde_json::to_string_pretty(&rendered)?);
    Ok(())
}

fn http_client(args: &HttpArgs) -> NodeHttpClient {
    let addr = args
        .node_http_addr
        .clone()
        .unwrap_or_else(|| default_http_addr(&args.node_addr));
    NodeHttpClient::new(addr, HTTP_TIMEOUT)
}

async fn query_stats(args: HttpArgs) -> Result<()> {
    let client = http_client(&args);
    let stats = client
        .stats()
        .await
        .with_context(|| format!("failed to query {}/stats", client.http_addr()))?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

async fn query_block(id: u64, args: HttpArgs) -> Result<()> {
    let client = http_client(&args);
    let block = client
        .get_block(id)
        .await
        .with_context(|| format!("failed to fetch block {} from {}", id, client.http_addr()))?;
    println!("{}", serde_json::to_string_pretty(&block)?);
    Ok(())
}

fn print_version() {
    println!("babble-demo {}", env!("CARGO_PKG_VERSION"));
    println!("submit via  {}", SUBMIT_TX_METHOD);
}

/// Resolves on Ctrl+C or SIGTERM. If a handler cannot be installed, that
/// signal source simply never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
