//! # Node HTTP Diagnostics
//!
//! The node serves a small read-only HTTP API next to its RPC port. Two
//! endpoints matter to applications:
//!
//! - `GET /stats`: a flat JSON object of counters and status strings.
//! - `GET /block/<id>`: one block, in the same layout `CommitBlock` uses.
//!
//! Requests go through a shared `reqwest::Client`, so chunked bodies,
//! keep-alive, and HTTP/1.1 framing are handled by the client. System proxy
//! settings are ignored; the node is addressed directly.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::block::Block;
use crate::error::{ProxyError, Result};

/// Node counters as returned by `/stats`.
pub type NodeStats = BTreeMap<String, Value>;

/// Client for the node's diagnostics endpoints.
#[derive(Debug, Clone)]
pub struct NodeHttpClient {
    http_addr: String,
    base_url: String,
    io_timeout: Duration,
    client: reqwest::Client,
}

impl NodeHttpClient {
    /// Creates a client for the node's HTTP service at `http_addr`
    /// (`host:port`, or a full `http://` URL).
    pub fn new(http_addr: impl Into<String>, io_timeout: Duration) -> Self {
        let http_addr = http_addr.into();
        let base_url = if http_addr.starts_with("http://") || http_addr.starts_with("https://") {
            http_addr.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", http_addr)
        };
        let client = reqwest::Client::builder()
            .no_proxy()
            .connect_timeout(io_timeout)
            .build()
            .unwrap_or_default();

        Self {
            http_addr,
            base_url,
            io_timeout,
            client,
        }
    }

    /// The address requests go to.
    pub fn http_addr(&self) -> &str {
        &self.http_addr
    }

    /// Fetches `/stats`.
    pub async fn stats(&self) -> Result<NodeStats> {
        self.get_json("/stats").await
    }

    /// Fetches `/block/<id>` and decodes it.
    pub async fn get_block(&self, id: u64) -> Result<Block> {
        let value: Value = self.get_json(&format!("/block/{}", id)).await?;
        Ok(Block::from_value(&value)?)
    }

    /// Issues one GET and decodes the JSON body. Anything other than a 2xx
    /// status is [`ProxyError::Http`].
    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(self.io_timeout)
            .send()
            .await?;

        let status = response.status();
        debug!(path, status = status.as_u16(), "node http response");
        if !status.is_success() {
            return Err(ProxyError::Http {
                status: status.as_u16(),
                path: path.to_string(),
            });
        }
        Ok(response.json::<T>().await?)
    }
}
