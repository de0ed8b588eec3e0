//! Outbound RPC client.
//!
//! Opens a fresh TCP connection for every call, writes one request, reads at
//! most one reply, and hangs up. No pooling and no multiplexing: the
//! application submits transactions one at a time, so the connection setup
//! cost is irrelevant next to consensus latency. No retries either; that
//! policy belongs to the caller.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::Value;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::config::{DEFAULT_MAX_MESSAGE_SIZE, SUBMIT_TX_METHOD};
use crate::error::{ProxyError, Result};
use crate::rpc::codec::{read_message, write_message, RpcReply, RpcRequest};
use crate::rpc::with_timeout;

/// Base64-encodes a transaction payload for the wire. Text and raw bytes
/// take the same path, so callers never have to care which they hold.
pub fn encode_tx(payload: impl AsRef<[u8]>) -> String {
    BASE64.encode(payload.as_ref())
}

/// Client for the node's RPC listener.
#[derive(Debug)]
pub struct RpcClient {
    node_addr: String,
    io_timeout: Duration,
    max_reply_size: usize,
    next_id: AtomicU64,
}

impl RpcClient {
    /// Creates a client for `node_addr` (`host:port`). Every connect, write,
    /// and read is bounded by `io_timeout`.
    pub fn new(node_addr: impl Into<String>, io_timeout: Duration) -> Self {
        Self {
            node_addr: node_addr.into(),
            io_timeout,
            max_reply_size: DEFAULT_MAX_MESSAGE_SIZE,
            next_id: AtomicU64::new(0),
        }
    }

    /// Caps the size of a reply the client will buffer.
    pub fn with_max_reply_size(mut self, max_reply_size: usize) -> Self {
        self.max_reply_size = max_reply_size;
        self
    }

    /// The node address this client dials.
    pub fn node_addr(&self) -> &str {
        &self.node_addr
    }

    /// Hands out the next request id. The first call gets `1`.
    pub fn next_unique_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Performs one call.
    ///
    /// With `expect_reply`, waits for the node to answer and returns the
    /// parsed reply. A reply that is empty or does not parse is logged and
    /// reported as `Ok(None)`: the call itself went through.
    pub async fn call(
        &self,
        method: &str,
        args: Vec<String>,
        expect_reply: bool,
    ) -> Result<Option<RpcReply>> {
        let unique_id = self.next_unique_id();
        let request = RpcRequest::new(
            method,
            args.into_iter().map(Value::String).collect(),
            unique_id,
        );

        let mut stream = with_timeout(
            self.io_timeout,
            "connect",
            TcpStream::connect(self.node_addr.as_str()),
        )
        .await?;
        with_timeout(
            self.io_timeout,
            "write request",
            write_message(&mut stream, &request),
        )
        .await?;
        debug!(method, unique_id, node = %self.node_addr, "rpc request sent");

        if !expect_reply {
            return Ok(None);
        }

        let framed = with_timeout(
            self.io_timeout,
            "read reply",
            read_message(&mut stream, self.max_reply_size),
        )
        .await;

        let reply = match framed {
            Ok(Some(value)) => match serde_json::from_value::<RpcReply>(value) {
                Ok(reply) => Some(reply),
                Err(e) => {
                    warn!(method, unique_id, error = %e, "ignoring reply with unexpected shape");
                    None
                }
            },
            Ok(None) => None,
            Err(ProxyError::Codec(e)) => {
                warn!(method, unique_id, kind = "transport", error = %e, "ignoring unreadable reply");
                None
            }
            Err(e) => return Err(e),
        };

        if let Some(error) = reply.as_ref().and_then(|r| r.error.as_ref()) {
            warn!(method, unique_id, error = %error, "node reported an error");
        }
        Ok(reply)
    }

    /// Submits one transaction via `Babble.SubmitTx`.
    pub async fn submit_tx(&self, payload: impl AsRef<[u8]>) -> Result<Option<RpcReply>> {
        self.call(SUBMIT_TX_METHOD, vec![encode_tx(payload)], true)
            .await
    }
}
