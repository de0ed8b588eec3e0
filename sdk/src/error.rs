//! Error types for the proxy.
//!
//! Every fallible public operation returns a [`ProxyError`]. Each variant
//! maps to exactly one [`ErrorKind`], and that kind is attached to every
//! logged failure as the `kind` field, so an operator can tell a peer that
//! sent garbage from a callback that crashed from a port that was taken.

use std::fmt;

use thiserror::Error;

use crate::block::BlockDecodeError;
use crate::rpc::codec::CodecError;
use crate::rpc::dispatch::DispatchError;

/// Coarse error classification used in structured logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Socket-level failures and unreadable bytes from a peer.
    Transport,
    /// A well-framed message whose block payload could not be decoded.
    Decode,
    /// A request naming a procedure nobody registered.
    Dispatch,
    /// The application's commit callback failed.
    Callback,
    /// Bad configuration or lifecycle misuse; surfaces at startup.
    Config,
}

impl ErrorKind {
    /// Stable lowercase label for log fields.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Decode => "decode",
            Self::Dispatch => "dispatch",
            Self::Callback => "callback",
            Self::Config => "config",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by the proxy and its components.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Connect, read, or write failed, or timed out.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// A peer sent bytes that do not frame into a JSON message.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The node's HTTP diagnostics endpoint answered with a non-success status.
    #[error("http {status} from {path}")]
    Http {
        /// Status code from the response line.
        status: u16,
        /// Request path that produced it.
        path: String,
    },

    /// The HTTP client failed to connect, timed out, or could not read a
    /// JSON body from the node's diagnostics endpoint.
    #[error("http request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// A block payload was missing fields or carried invalid base64.
    #[error("block decode error: {0}")]
    Decode(#[from] BlockDecodeError),

    /// A request could not be routed to a handler.
    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// The application's `commit_block` returned an error or panicked.
    #[error("commit callback failed: {0:#}")]
    Callback(anyhow::Error),

    /// Invalid configuration, unresolvable address, or bind failure.
    #[error("configuration error: {0}")]
    Config(String),

    /// A lifecycle method was called in the wrong state.
    #[error("invalid state: cannot {action} while {state}")]
    InvalidState {
        /// What the caller tried to do.
        action: &'static str,
        /// The state the component was in.
        state: String,
    },
}

impl ProxyError {
    /// The [`ErrorKind`] this error is reported under.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(_) | Self::Codec(_) | Self::Http { .. } => ErrorKind::Transport,
            Self::Request(e) if e.is_decode() => ErrorKind::Decode,
            Self::Request(_) => ErrorKind::Transport,
            Self::Decode(_) => ErrorKind::Decode,
            Self::Dispatch(_) => ErrorKind::Dispatch,
            Self::Callback(_) => ErrorKind::Callback,
            Self::Config(_) | Self::InvalidState { .. } => ErrorKind::Config,
        }
    }
}

/// Shorthand used throughout the crate.
pub type Result<T, E = ProxyError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_cover_the_taxonomy() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert_eq!(ProxyError::from(io).kind(), ErrorKind::Transport);
        assert_eq!(
            ProxyError::from(CodecError::Truncated { received: 3 }).kind(),
            ErrorKind::Transport
        );
        assert_eq!(
            ProxyError::from(BlockDecodeError::MissingField("Body.Index")).kind(),
            ErrorKind::Decode
        );
        assert_eq!(
            ProxyError::from(DispatchError::UnknownMethod("Nope".into())).kind(),
            ErrorKind::Dispatch
        );
        assert_eq!(
            ProxyError::Callback(anyhow::anyhow!("boom")).kind(),
            ErrorKind::Callback
        );
        assert_eq!(
            ProxyError::Config("port in use".into()).kind(),
            ErrorKind::Config
        );
    }

    #[test]
    fn kind_labels_are_lowercase() {
        for kind in [
            ErrorKind::Transport,
            ErrorKind::Decode,
            ErrorKind::Dispatch,
            ErrorKind::Callback,
            ErrorKind::Config,
        ] {
            assert_eq!(kind.as_str(), kind.as_str().to_lowercase());
            assert_eq!(kind.to_string(), kind.as_str());
        }
    }

    #[test]
    fn callback_error_keeps_context_chain() {
        let err = anyhow::anyhow!("disk full").context("applying block 7");
        let msg = ProxyError::Callback(err).to_string();
        assert!(msg.contains("applying block 7"));
        assert!(msg.contains("disk full"));
    }
}
