//! # RPC Transport
//!
//! Both directions of the node ↔ application conversation. Each call is one
//! TCP connection carrying one JSON request (and, outbound, at most one
//! reply).
//!
//! ```text
//! codec.rs     — wire message types and read-until-complete framing
//! client.rs    — outbound calls (SubmitTx), one connection per call
//! server.rs    — inbound listener, one request per connection
//! dispatch.rs  — procedure name → handler table
//! ```

pub mod client;
pub mod codec;
pub mod dispatch;
pub mod server;

pub use client::{encode_tx, RpcClient};
pub use codec::{CodecError, RpcReply, RpcRequest};
pub use dispatch::{DispatchError, DispatchTable, DispatchTableBuilder, Handler};
pub use server::{RpcServer, ServerConfig};

use std::future::Future;
use std::io;
use std::time::Duration;

use crate::error::{ProxyError, Result};

/// Runs `fut` with a deadline. Expiry surfaces as an `io::ErrorKind::TimedOut`
/// transport error naming the operation.
pub(crate) async fn with_timeout<T, E, F>(limit: Duration, op: &'static str, fut: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, E>>,
    ProxyError: From<E>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(ProxyError::from),
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("{} timed out after {:?}", op, limit),
        )
        .into()),
    }
}
