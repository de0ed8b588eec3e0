//! # Proxy Configuration & Constants
//!
//! Every wire name, timeout, and buffer size the SDK relies on lives here.
//! The Babble node is an external process, so most of these values are a
//! contract with somebody else's code: change them and the node stops
//! talking to you.

use std::time::Duration;

use serde::Deserialize;

use crate::error::ProxyError;

// ---------------------------------------------------------------------------
// Wire Names
// ---------------------------------------------------------------------------

/// Fully-qualified procedure the application calls on the node to submit a
/// transaction.
pub const SUBMIT_TX_METHOD: &str = "Babble.SubmitTx";

/// Procedure name (namespace stripped) the node calls on the application
/// when a block is committed.
pub const COMMIT_BLOCK_PROCEDURE: &str = "CommitBlock";

// ---------------------------------------------------------------------------
// Network Defaults
// ---------------------------------------------------------------------------

/// Default address of the node's application-facing RPC listener.
pub const DEFAULT_NODE_ADDR: &str = "127.0.0.1:1338";

/// Default address the application listens on for inbound block commits.
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:1339";

/// Port the node serves its HTTP diagnostics (`/stats`, `/block/<id>`) on
/// when nobody says otherwise.
pub const DEFAULT_NODE_HTTP_PORT: u16 = 80;

// ---------------------------------------------------------------------------
// Timing
// ---------------------------------------------------------------------------

/// How long the consumer waits on an empty queue before re-checking its
/// shutdown flag. Bounds shutdown latency without spinning.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Upper bound on a single connect, read, or write against a peer socket.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Framing
// ---------------------------------------------------------------------------

/// Bytes requested from the socket per read while assembling a message.
pub const READ_CHUNK_SIZE: usize = 1024;

/// Largest single message (request or reply) we are willing to buffer.
/// Blocks with thousands of transactions fit comfortably; anything larger is
/// treated as a misbehaving peer.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Callback Policy
// ---------------------------------------------------------------------------

/// What the consumer loop does when the application's commit callback fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackPolicy {
    /// Log the failure and move on to the next block.
    #[default]
    LogAndContinue,
    /// Log the failure and stop the loop. Blocks still queued stay queued.
    Halt,
}

// ---------------------------------------------------------------------------
// ProxyConfig
// ---------------------------------------------------------------------------

/// Everything a [`Proxy`](crate::proxy::Proxy) needs to know about its
/// surroundings.
///
/// Addresses are kept as strings and resolved in
/// [`Proxy::run`](crate::proxy::Proxy::run) so that hostnames work and
/// resolution failures surface as configuration errors at startup.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// `host:port` of the node's RPC listener (outbound `SubmitTx`).
    pub node_addr: String,

    /// `host:port` this application binds for inbound `CommitBlock` calls.
    /// Port 0 asks the OS for an ephemeral port.
    pub bind_addr: String,

    /// `host:port` of the node's HTTP diagnostics service. `None` disables
    /// [`Proxy::stats`](crate::proxy::Proxy::stats) and
    /// [`Proxy::get_block`](crate::proxy::Proxy::get_block).
    pub node_http_addr: Option<String>,

    /// Consumer poll interval, in milliseconds.
    pub poll_interval_ms: u64,

    /// Socket timeout for connect/read/write, in milliseconds.
    pub io_timeout_ms: u64,

    /// Maximum size of a single framed message, in bytes.
    pub max_message_size: usize,

    /// Behaviour on commit callback failure.
    pub callback_policy: CallbackPolicy,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            node_addr: DEFAULT_NODE_ADDR.to_string(),
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            node_http_addr: None,
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            io_timeout_ms: DEFAULT_IO_TIMEOUT.as_millis() as u64,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            callback_policy: CallbackPolicy::default(),
        }
    }
}

impl ProxyConfig {
    /// Config pointing at the given node and bind addresses, defaults for
    /// everything else.
    pub fn new(node_addr: impl Into<String>, bind_addr: impl Into<String>) -> Self {
        Self {
            node_addr: node_addr.into(),
            bind_addr: bind_addr.into(),
            ..Self::default()
        }
    }

    /// Consumer poll interval as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Socket timeout as a [`Duration`].
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    /// Rejects configurations that cannot possibly work. Address
    /// resolvability is checked later, at startup.
    pub fn validate(&self) -> Result<(), ProxyError> {
        if self.node_addr.trim().is_empty() {
            return Err(ProxyError::Config("node address is empty".into()));
        }
        if self.bind_addr.trim().is_empty() {
            return Err(ProxyError::Config("bind address is empty".into()));
        }
        if matches!(&self.node_http_addr, Some(addr) if addr.trim().is_empty()) {
            return Err(ProxyError::Config("node http address is empty".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(ProxyError::Config(
                "poll interval must be greater than zero".into(),
            ));
        }
        if self.io_timeout_ms == 0 {
            return Err(ProxyError::Config(
                "io timeout must be greater than zero".into(),
            ));
        }
        if self.max_message_size < READ_CHUNK_SIZE {
            return Err(ProxyError::Config(format!(
                "max message size {} is smaller than one read chunk ({})",
                self.max_message_size, READ_CHUNK_SIZE
            )));
        }
        Ok(())
    }
}

/// Derives the diagnostics address from a node RPC address by swapping in
/// [`DEFAULT_NODE_HTTP_PORT`]. `"10.0.0.5:1338"` becomes `"10.0.0.5:80"`.
pub fn default_http_addr(node_addr: &str) -> String {
    let host = match node_addr.rsplit_once(':') {
        Some((host, _port)) => host,
        None => node_addr,
    };
    format!("{}:{}", host, DEFAULT_NODE_HTTP_PORT)
}
