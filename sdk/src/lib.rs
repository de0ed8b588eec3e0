// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Babble SDK
//!
//! Client-side plumbing for applications that sit on top of a Babble
//! consensus node. The node orders transactions; the application owns the
//! state. This crate carries the two between them:
//!
//! - transactions go **out** to the node with `Babble.SubmitTx`;
//! - committed blocks come **in** from the node as `*.CommitBlock` calls,
//!   are queued, and are handed to the application one at a time, in order.
//!
//! ## Architecture
//!
//! - **rpc**: JSON-over-TCP codec, outbound client, inbound listener, and
//!   the procedure dispatch table.
//! - **block**: the committed block model and its wire decoding.
//! - **queue**: the FIFO between the listener and the consumer.
//! - **consumer**: the thread that feeds queued blocks to the application.
//! - **proxy**: the facade that wires everything together.
//! - **http**: read-only access to the node's diagnostics endpoints.
//! - **config**: protocol constants and proxy settings.
//! - **error**: the error type and its operator-facing categories.
//!
//! ## Usage
//!
//! ```no_run
//! use babble_sdk::{Block, Proxy, ProxyConfig};
//!
//! # async fn demo() -> babble_sdk::Result<()> {
//! let config = ProxyConfig::new("127.0.0.1:1338", "127.0.0.1:1339");
//! let proxy = Proxy::new(config, |block: Block| -> anyhow::Result<()> {
//!     println!("block {} with {} txs", block.index(), block.transactions().len());
//!     Ok(())
//! });
//!
//! proxy.run().await?;
//! proxy.send_tx("hello").await?;
//! proxy.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod block;
pub mod config;
pub mod consumer;
pub mod error;
pub mod http;
pub mod proxy;
pub mod queue;
pub mod rpc;

pub use block::{Block, BlockDecodeError};
pub use config::{CallbackPolicy, ProxyConfig};
pub use consumer::{CommitHandler, ConsumerConfig, ConsumerState, StateConsumer};
pub use error::{ErrorKind, ProxyError, Result};
pub use http::{NodeHttpClient, NodeStats};
pub use proxy::Proxy;
pub use queue::BlockQueue;
pub use rpc::{RpcClient, RpcReply, RpcServer};
