//! # Structured Logging
//!
//! Sets up the `tracing` subscriber for the demo: `RUST_LOG` filtering and
//! either human-readable or JSON output.
//!
//! Logs go to stderr. Stdout belongs to the committed blocks the demo
//! prints, so the two can be piped apart.

use clap::ValueEnum;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable output with source locations.
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Installs the global subscriber. Call once, before the proxy starts.
///
/// `default_level` applies when `RUST_LOG` is unset, e.g.
/// `"babble_demo=info,babble_sdk=info"`. With `RUST_LOG` set, its
/// directives win:
///
/// ```text
/// RUST_LOG=babble_sdk=debug babble-demo --node-addr 10.0.0.5:1338
/// ```
pub fn init_logging(default_level: &str, format: LogFormat) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    match format {
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(true)
                        .with_file(true)
                        .with_line_number(true),
                )
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .json()
                        .with_writer(std::io::stderr)
                        .with_current_span(true)
                        .with_target(true),
                )
                .init();
        }
    }

    tracing::debug!(?format, "logging initialized");
}
