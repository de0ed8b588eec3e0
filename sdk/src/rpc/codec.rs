//! # Wire Codec
//!
//! One JSON object per TCP connection, in both directions:
//!
//! ```text
//! {"method": "<Namespace>.<Procedure>", "params": [<arg0>, ...], "unique_id": <n>}
//! ```
//!
//! There is no length prefix. A message ends where its JSON value ends, so
//! the reader keeps pulling [`READ_CHUNK_SIZE`] chunks off the socket until
//! the buffer holds one complete value, the peer hangs up, or the size limit
//! is hit. Whitespace and newlines around the object are irrelevant.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::READ_CHUNK_SIZE;
use crate::error::Result;
use crate::rpc::dispatch::DispatchError;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Framing and JSON failures. Always fatal to the connection, never to the
/// process.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Not JSON, or JSON missing a required key.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The peer hung up halfway through a message.
    #[error("connection closed after {received} bytes of an incomplete message")]
    Truncated {
        /// Bytes buffered when the connection closed.
        received: usize,
    },

    /// The message grew past the configured limit before it was complete.
    #[error("message exceeds {limit} bytes")]
    TooLarge {
        /// The configured limit.
        limit: usize,
    },
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// A single RPC call on the wire.
///
/// Field order is the serialization order, and the node's decoder does not
/// care, but tests and packet captures do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Dot-qualified method name, e.g. `"Babble.SubmitTx"`.
    pub method: String,
    /// Positional arguments. Only the first one is ever handed to a handler.
    pub params: Vec<Value>,
    /// Per-client sequence number. The protocol does not correlate replies
    /// by it, so inbound requests whose id is missing, negative, or not a
    /// number decode as `0` instead of being dropped.
    #[serde(default, deserialize_with = "lenient_unique_id")]
    pub unique_id: u64,
}

fn lenient_unique_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    let id = Value::deserialize(deserializer)?;
    Ok(id
        .as_u64()
        .or_else(|| id.as_str().and_then(|s| s.parse().ok()))
        .unwrap_or(0))
}

impl RpcRequest {
    /// Builds a request.
    pub fn new(method: impl Into<String>, params: Vec<Value>, unique_id: u64) -> Self {
        Self {
            method: method.into(),
            params,
            unique_id,
        }
    }

    /// Serializes to the exact bytes sent on the wire.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parses wire bytes. `method` and `params` are required.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Converts an already-framed JSON value.
    pub fn from_value(value: Value) -> Result<Self, CodecError> {
        Ok(serde_json::from_value(value)?)
    }

    /// The procedure name used for dispatch: everything after the first `.`.
    ///
    /// `"Babble.CommitBlock"` yields `"CommitBlock"`. A method without a
    /// namespace cannot be routed.
    pub fn procedure(&self) -> Result<&str, DispatchError> {
        self.method
            .split_once('.')
            .map(|(_, procedure)| procedure)
            .ok_or_else(|| DispatchError::MalformedMethod(self.method.clone()))
    }

    /// The single argument a handler receives.
    pub fn first_param(&self) -> Option<&Value> {
        self.params.first()
    }
}

// ---------------------------------------------------------------------------
// Reply
// ---------------------------------------------------------------------------

/// Whatever the node sends back after a call.
///
/// Every field is optional because nothing downstream depends on the reply;
/// it is parsed so it can be logged and inspected by callers who care.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RpcReply {
    /// Echoed request id, if the node sent one.
    #[serde(default)]
    pub id: Option<Value>,
    /// Procedure result.
    #[serde(default)]
    pub result: Option<Value>,
    /// Procedure error. JSON `null` decodes as `None`.
    #[serde(default)]
    pub error: Option<Value>,
}

impl RpcReply {
    /// `true` when the node reported a failure.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

// ---------------------------------------------------------------------------
// Framing
// ---------------------------------------------------------------------------

/// Reads one complete JSON value from `reader`.
///
/// Returns `Ok(None)` if the peer closes the connection before sending
/// anything but whitespace. Bytes after the first complete value are
/// ignored.
pub async fn read_message<R>(reader: &mut R, max_size: usize) -> Result<Option<Value>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(READ_CHUNK_SIZE);
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return match try_parse(&buf)? {
                Some(value) => Ok(Some(value)),
                None if buf.iter().all(u8::is_ascii_whitespace) => Ok(None),
                None => Err(CodecError::Truncated {
                    received: buf.len(),
                }
                .into()),
            };
        }

        if buf.len() + n > max_size {
            return Err(CodecError::TooLarge { limit: max_size }.into());
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some(value) = try_parse(&buf)? {
            return Ok(Some(value));
        }
    }
}

/// Writes one encoded request and flushes.
pub async fn write_message<W>(writer: &mut W, request: &RpcRequest) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = request.encode()?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// `Ok(None)` means "need more bytes".
fn try_parse(buf: &[u8]) -> Result<Option<Value>, CodecError> {
    let mut values = serde_json::Deserializer::from_slice(buf).into_iter::<Value>();
    match values.next() {
        None => Ok(None),
        Some(Ok(value)) => Ok(Some(value)),
        Some(Err(e)) if e.is_eof() => Ok(None),
        Some(Err(e)) => Err(CodecError::Malformed(e)),
    }
}
