//! # Proxy
//!
//! The object applications actually hold. A `Proxy` ties together:
//!
//! ```text
//!   application ── send_tx ──► RpcClient ──► node (Babble.SubmitTx)
//!
//!   node ── *.CommitBlock ──► RpcServer ──► DispatchTable ──► BlockQueue
//!                                                                │
//!   application ◄── CommitHandler::commit_block ◄── StateConsumer ┘
//! ```
//!
//! Each proxy owns its queue, so several proxies in one process (for
//! example, one per simulated validator in a test) never see each other's
//! blocks. Everything a proxy logs is recorded inside a `proxy{bind=...}`
//! span created at construction.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{info, Instrument, Span};

use crate::block::Block;
use crate::config::{ProxyConfig, COMMIT_BLOCK_PROCEDURE};
use crate::consumer::{CommitHandler, ConsumerConfig, ConsumerState, StateConsumer};
use crate::error::{ProxyError, Result};
use crate::http::{NodeHttpClient, NodeStats};
use crate::queue::{commit_block_handler, BlockQueue};
use crate::rpc::{DispatchTable, RpcClient, RpcReply, RpcServer, ServerConfig};

/// Application-side endpoint of a Babble node.
pub struct Proxy {
    config: ProxyConfig,
    queue: Arc<BlockQueue>,
    client: RpcClient,
    server: RpcServer,
    consumer: StateConsumer,
    http: Option<NodeHttpClient>,
    span: Span,
}

impl Proxy {
    /// Builds a stopped proxy. `handler` receives every committed block once
    /// [`run`](Self::run) has been called.
    pub fn new(config: ProxyConfig, handler: impl CommitHandler) -> Self {
        let span = tracing::info_span!("proxy", bind = %config.bind_addr);
        let queue = Arc::new(BlockQueue::new());

        let dispatch = DispatchTable::builder()
            .register_handler(COMMIT_BLOCK_PROCEDURE, commit_block_handler(Arc::clone(&queue)))
            .build();

        let server = RpcServer::new(
            config.bind_addr.clone(),
            dispatch,
            ServerConfig {
                io_timeout: config.io_timeout(),
                max_message_size: config.max_message_size,
            },
        )
        .in_span(span.clone());

        let consumer = StateConsumer::new(
            Arc::clone(&queue),
            Arc::new(handler),
            ConsumerConfig {
                poll_interval: config.poll_interval(),
                callback_policy: config.callback_policy,
            },
        )
        .in_span(span.clone());

        let client = RpcClient::new(config.node_addr.clone(), config.io_timeout())
            .with_max_reply_size(config.max_message_size);
        let http = config
            .node_http_addr
            .as_ref()
            .map(|addr| NodeHttpClient::new(addr.clone(), config.io_timeout()));

        Self {
            config,
            queue,
            client,
            server,
            consumer,
            http,
            span,
        }
    }

    /// Starts the proxy: checks the configuration, starts the listener, then
    /// starts the consumer. Returns the address the listener bound.
    ///
    /// Invalid configuration, an unresolvable node address, and a bind
    /// failure are all reported as [`ErrorKind::Config`](crate::ErrorKind).
    pub async fn run(&self) -> Result<SocketAddr> {
        self.config.validate()?;
        self.resolve_node().await?;

        let local_addr = self.server.run().await?;
        if let Err(e) = self.consumer.start() {
            self.server.shutdown().await;
            return Err(e);
        }

        info!(
            parent: &self.span,
            %local_addr,
            node = %self.config.node_addr,
            policy = ?self.config.callback_policy,
            "proxy running"
        );
        Ok(local_addr)
    }

    /// Submits one transaction to the node. Text and bytes are both accepted
    /// and sent base64-encoded. Returns the node's reply, if it sent one.
    pub async fn send_tx(&self, payload: impl AsRef<[u8]>) -> Result<Option<RpcReply>> {
        self.client
            .submit_tx(payload)
            .instrument(self.span.clone())
            .await
    }

    /// Stops the listener, then asks the consumer to drain and stop. Safe
    /// to call more than once. Use [`join_consumer`](Self::join_consumer) to
    /// wait for the drain to finish.
    pub async fn shutdown(&self) {
        self.server.shutdown().await;
        self.consumer.shutdown();
    }

    /// Blocks the calling thread until the consumer thread has exited.
    pub fn join_consumer(&self) {
        self.consumer.join();
    }

    /// Fetches the node's `/stats` counters.
    pub async fn stats(&self) -> Result<NodeStats> {
        self.http()?.stats().instrument(self.span.clone()).await
    }

    /// Fetches one block from the node's `/block/<id>` endpoint.
    pub async fn get_block(&self, id: u64) -> Result<Block> {
        self.http()?
            .get_block(id)
            .instrument(self.span.clone())
            .await
    }

    /// The listener's bound address while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.local_addr()
    }

    pub fn consumer_state(&self) -> ConsumerState {
        self.consumer.state()
    }

    /// Blocks received but not yet handed to the handler.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn committed_count(&self) -> u64 {
        self.consumer.committed_count()
    }

    pub fn failed_count(&self) -> u64 {
        self.consumer.failed_count()
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    async fn resolve_node(&self) -> Result<SocketAddr> {
        let node_addr = self.config.node_addr.as_str();
        let mut addrs = tokio::net::lookup_host(node_addr).await.map_err(|e| {
            ProxyError::Config(format!("cannot resolve node address {}: {}", node_addr, e))
        })?;
        addrs.next().ok_or_else(|| {
            ProxyError::Config(format!("node address {} resolved to nothing", node_addr))
        })
    }

    fn http(&self) -> Result<&NodeHttpClient> {
        self.http.as_ref().ok_or_else(|| {
            ProxyError::Config("node http address is not configured".to_string())
        })
    }
}

impl std::fmt::Debug for Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy")
            .field("config", &self.config)
            .field("local_addr", &self.local_addr())
            .field("consumer_state", &self.consumer_state())
            .field("queued", &self.queue_len())
            .finish()
    }
}
