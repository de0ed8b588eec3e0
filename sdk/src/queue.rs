//! Unbounded FIFO of decoded blocks.
//!
//! Sits between the RPC listener (producer, on a tokio task) and the state
//! consumer (a plain OS thread). Producers never wait on the consumer:
//! a push takes the lock for one `VecDeque::push_back` and leaves. The
//! consumer blocks on a `Condvar` with a timeout instead of spinning.
//!
//! Strict FIFO and unbounded: a committed block is never dropped and the
//! listener never waits for room. Many producers are fine; the API assumes
//! one consumer at a time.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde_json::Value;
use tracing::debug;

use crate::block::{Block, BlockDecodeError};
use crate::error::Result;
use crate::rpc::dispatch::Handler;

/// Thread-safe block FIFO.
#[derive(Debug, Default)]
pub struct BlockQueue {
    blocks: Mutex<VecDeque<Block>>,
    available: Condvar,
}

impl BlockQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `block` and wakes the consumer.
    pub fn push(&self, block: Block) {
        self.blocks.lock().push_back(block);
        self.available.notify_one();
    }

    /// Takes the oldest block, waiting up to `timeout` for one to arrive.
    ///
    /// `None` after the timeout is normal; it is how the consumer gets a
    /// chance to look at its shutdown flag.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<Block> {
        let deadline = Instant::now() + timeout;
        let mut blocks = self.blocks.lock();
        loop {
            if let Some(block) = blocks.pop_front() {
                return Some(block);
            }
            if self.available.wait_until(&mut blocks, deadline).timed_out() {
                return blocks.pop_front();
            }
        }
    }

    /// Takes the oldest block without waiting.
    pub fn try_pop(&self) -> Option<Block> {
        self.blocks.lock().pop_front()
    }

    /// Number of queued blocks.
    pub fn len(&self) -> usize {
        self.blocks.lock().len()
    }

    /// `true` when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.blocks.lock().is_empty()
    }

    /// Handler body for the inbound `CommitBlock` procedure: decode the
    /// payload and enqueue it. A payload that fails to decode is rejected
    /// whole and nothing is enqueued.
    pub fn on_commit_block(&self, payload: Option<Value>) -> Result<()> {
        let payload = payload.ok_or(BlockDecodeError::MissingField("params[0]"))?;
        let block = Block::from_value(&payload)?;
        debug!(
            index = block.index(),
            round = block.round_received(),
            txs = block.transactions().len(),
            "block enqueued"
        );
        self.push(block);
        Ok(())
    }
}

/// Builds the dispatch handler for the inbound `CommitBlock` procedure,
/// feeding `queue`.
pub fn commit_block_handler(queue: Arc<BlockQueue>) -> Handler {
    Arc::new(move |payload: Option<Value>| queue.on_commit_block(payload))
}
