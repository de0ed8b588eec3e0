//! # State Consumer Loop
//!
//! Drains the [`BlockQueue`] on a dedicated thread and feeds each block to
//! the application's [`CommitHandler`], one at a time, in queue order.
//!
//! ## Lifecycle
//!
//! ```text
//! Idle --start()--> Running --shutdown()--> Stopping --(next poll)--> Idle
//! ```
//!
//! `shutdown()` only raises a flag. The loop looks at it between polls, so
//! it takes effect within one poll interval. Before going Idle the loop
//! commits every block that was already queued; nothing enqueued before the
//! flag was observed is lost.
//!
//! ## Callback failures
//!
//! A callback that returns an error (or panics) is logged under
//! `kind="callback"`. With [`CallbackPolicy::LogAndContinue`] the loop moves
//! on to the next block; with [`CallbackPolicy::Halt`] it stops and leaves the
//! rest of the queue untouched.
//!
//! The handler runs on a plain OS thread rather than a tokio worker so that
//! application code is free to block.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn, Span};

use crate::block::Block;
use crate::config::{CallbackPolicy, DEFAULT_POLL_INTERVAL};
use crate::error::{ProxyError, Result};
use crate::queue::BlockQueue;

// ---------------------------------------------------------------------------
// CommitHandler
// ---------------------------------------------------------------------------

/// The application's side of the pipeline: apply one committed block.
///
/// Implemented for any `Fn(Block) -> anyhow::Result<()>`, so a closure is
/// usually enough.
pub trait CommitHandler: Send + Sync + 'static {
    /// Applies `block` to application state.
    fn commit_block(&self, block: Block) -> anyhow::Result<()>;
}

impl<F> CommitHandler for F
where
    F: Fn(Block) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn commit_block(&self, block: Block) -> anyhow::Result<()> {
        self(block)
    }
}

// ---------------------------------------------------------------------------
// Configuration & State
// ---------------------------------------------------------------------------

/// Consumer tuning.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Longest wait on an empty queue before re-checking the shutdown flag.
    pub poll_interval: Duration,
    /// What to do when the handler fails.
    pub callback_policy: CallbackPolicy,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            callback_policy: CallbackPolicy::default(),
        }
    }
}

/// Where the consumer is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    /// No worker thread is draining the queue.
    Idle,
    /// The worker is polling the queue.
    Running,
    /// Shutdown requested; the worker has not noticed yet or is draining.
    Stopping,
}

impl ConsumerState {
    fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Stopping => "stopping",
        }
    }
}

/// State shared between the owner and the worker thread.
#[derive(Debug)]
struct Shared {
    shutdown: AtomicBool,
    state: Mutex<ConsumerState>,
    committed: AtomicU64,
    failed: AtomicU64,
}

// ---------------------------------------------------------------------------
// StateConsumer
// ---------------------------------------------------------------------------

/// Owner handle for the consumer loop.
pub struct StateConsumer {
    queue: Arc<BlockQueue>,
    handler: Arc<dyn CommitHandler>,
    config: ConsumerConfig,
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    span: Span,
}

impl StateConsumer {
    /// Creates an idle consumer. Nothing runs until [`start`](Self::start).
    pub fn new(
        queue: Arc<BlockQueue>,
        handler: Arc<dyn CommitHandler>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            queue,
            handler,
            config,
            shared: Arc::new(Shared {
                shutdown: AtomicBool::new(false),
                state: Mutex::new(ConsumerState::Idle),
                committed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
            }),
            worker: Mutex::new(None),
            span: Span::current(),
        }
    }

    /// Runs the worker inside `span` instead of the span current at
    /// construction.
    pub fn in_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Idle → Running. Clears the shutdown flag and spawns a fresh worker.
    pub fn start(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        if *state != ConsumerState::Idle {
            return Err(ProxyError::InvalidState {
                action: "start the state consumer",
                state: state.label().to_string(),
            });
        }

        // A previous worker that reached Idle has finished its last lock;
        // reaping it here cannot block for long.
        if let Some(previous) = self.worker.lock().take() {
            let _ = previous.join();
        }

        self.shared.shutdown.store(false, Ordering::SeqCst);
        *state = ConsumerState::Running;

        let worker = Worker {
            queue: Arc::clone(&self.queue),
            handler: Arc::clone(&self.handler),
            config: self.config.clone(),
            shared: Arc::clone(&self.shared),
            span: self.span.clone(),
        };
        let spawned = thread::Builder::new()
            .name("babble-state-consumer".into())
            .spawn(move || worker.run());

        match spawned {
            Ok(handle) => {
                *self.worker.lock() = Some(handle);
                Ok(())
            }
            Err(e) => {
                *state = ConsumerState::Idle;
                Err(ProxyError::Config(format!(
                    "failed to spawn state consumer thread: {}",
                    e
                )))
            }
        }
    }

    /// Running → Stopping. Returns immediately; the worker goes Idle on its
    /// next poll after draining the queue. A no-op in any other state.
    pub fn shutdown(&self) {
        let mut state = self.shared.state.lock();
        if *state == ConsumerState::Running {
            self.shared.shutdown.store(true, Ordering::SeqCst);
            *state = ConsumerState::Stopping;
            let _enter = self.span.enter();
            info!(queued = self.queue.len(), "state consumer stopping");
        }
    }

    /// Blocks until the worker thread has exited. Returns at once if no
    /// worker was started. Only call after [`shutdown`](Self::shutdown) or
    /// with a `Halt` policy, otherwise this waits forever.
    pub fn join(&self) {
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("state consumer thread panicked");
                *self.shared.state.lock() = ConsumerState::Idle;
            }
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConsumerState {
        *self.shared.state.lock()
    }

    /// Blocks successfully handed to the callback since construction.
    pub fn committed_count(&self) -> u64 {
        self.shared.committed.load(Ordering::Relaxed)
    }

    /// Callback failures since construction.
    pub fn failed_count(&self) -> u64 {
        self.shared.failed.load(Ordering::Relaxed)
    }

    /// Returns a reference to the consumer configuration.
    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }
}

impl Drop for StateConsumer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Everything the worker thread owns.
struct Worker {
    queue: Arc<BlockQueue>,
    handler: Arc<dyn CommitHandler>,
    config: ConsumerConfig,
    shared: Arc<Shared>,
    span: Span,
}

impl Worker {
    fn run(self) {
        let _enter = self.span.enter();
        info!(
            poll_ms = self.config.poll_interval.as_millis() as u64,
            "state consumer started"
        );

        let mut halted = false;
        while !self.shared.shutdown.load(Ordering::SeqCst) {
            if let Some(block) = self.queue.pop_timeout(self.config.poll_interval) {
                if !self.commit(block) {
                    halted = true;
                    break;
                }
            }
        }

        if !halted {
            while let Some(block) = self.queue.try_pop() {
                if !self.commit(block) {
                    break;
                }
            }
        }

        *self.shared.state.lock() = ConsumerState::Idle;
        info!(
            committed = self.shared.committed.load(Ordering::Relaxed),
            "state consumer stopped"
        );
    }

    /// Hands one block to the application. `false` means stop the loop.
    fn commit(&self, block: Block) -> bool {
        let index = block.index();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.handler.commit_block(block)));

        let err = match outcome {
            Ok(Ok(())) => {
                self.shared.committed.fetch_add(1, Ordering::Relaxed);
                debug!(index, "block committed");
                return true;
            }
            Ok(Err(e)) => ProxyError::Callback(e),
            Err(payload) => ProxyError::Callback(anyhow::anyhow!(
                "callback panicked: {}",
                panic_message(payload.as_ref())
            )),
        };

        self.shared.failed.fetch_add(1, Ordering::Relaxed);
        error!(index, kind = %err.kind(), error = %err, "commit callback failed");

        match self.config.callback_policy {
            CallbackPolicy::LogAndContinue => true,
            CallbackPolicy::Halt => {
                warn!(
                    index,
                    queued = self.queue.len(),
                    "halting state consumer after callback failure"
                );
                false
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::time::Instant;

    fn block(index: i64) -> Block {
        Block::new(index, 0, Vec::new(), Vec::new(), Value::Null).unwrap()
    }

    fn fast_config(policy: CallbackPolicy) -> ConsumerConfig {
        ConsumerConfig {
            poll_interval: Duration::from_millis(20),
            callback_policy: policy,
        }
    }

    /// Consumer whose handler records indices and fails on `fail_on`.
    fn recording_consumer(
        policy: CallbackPolicy,
        fail_on: Option<i64>,
    ) -> (StateConsumer, Arc<BlockQueue>, Arc<Mutex<Vec<i64>>>) {
        let queue = Arc::new(BlockQueue::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler = move |b: Block| -> anyhow::Result<()> {
            if Some(b.index()) == fail_on {
                anyhow::bail!("refusing block {}", b.index());
            }
            sink.lock().push(b.index());
            Ok(())
        };
        let consumer = StateConsumer::new(Arc::clone(&queue), Arc::new(handler), fast_config(policy));
        (consumer, queue, seen)
    }

    fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    #[test]
    fn commits_every_block_in_fifo_order() {
        let (consumer, queue, seen) = recording_consumer(CallbackPolicy::LogAndContinue, None);
        for i in 1..=50 {
            queue.push(block(i));
        }

        consumer.start().unwrap();
        assert!(wait_until(Duration::from_secs(5), || seen.lock().len() == 50));
        consumer.shutdown();
        consumer.join();

        assert_eq!(*seen.lock(), (1..=50).collect::<Vec<_>>());
        assert_eq!(consumer.committed_count(), 50);
        assert_eq!(consumer.state(), ConsumerState::Idle);
    }

    #[test]
    fn concurrent_producers_are_committed_exactly_once() {
        let (consumer, queue, seen) = recording_consumer(CallbackPolicy::LogAndContinue, None);
        consumer.start().unwrap();

        let producers: Vec<_> = (0..3)
            .map(|p| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..100 {
                        queue.push(block(p * 1000 + i));
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        assert!(wait_until(Duration::from_secs(5), || seen.lock().len() == 300));
        consumer.shutdown();
        consumer.join();

        let seen = seen.lock();
        for p in 0..3 {
            let mine: Vec<_> = seen.iter().copied().filter(|i| i / 1000 == p).collect();
            assert_eq!(mine, (0..100).map(|i| p * 1000 + i).collect::<Vec<_>>());
        }
    }

    #[test]
    fn shutdown_drains_already_queued_blocks() {
        let queue = Arc::new(BlockQueue::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let slow = move |b: Block| -> anyhow::Result<()> {
            thread::sleep(Duration::from_millis(2));
            sink.lock().push(b.index());
            Ok(())
        };
        let consumer = StateConsumer::new(
            Arc::clone(&queue),
            Arc::new(slow),
            fast_config(CallbackPolicy::LogAndContinue),
        );

        for i in 0..40 {
            queue.push(block(i));
        }
        consumer.start().unwrap();
        consumer.shutdown();
        assert_ne!(consumer.state(), ConsumerState::Running);
        consumer.join();

        assert_eq!(*seen.lock(), (0..40).collect::<Vec<_>>());
        assert!(queue.is_empty());
        assert_eq!(consumer.state(), ConsumerState::Idle);
    }

    #[test]
    fn shutdown_is_idempotent() {
        let (consumer, _queue, _seen) = recording_consumer(CallbackPolicy::LogAndContinue, None);

        // Before ever starting.
        consumer.shutdown();
        assert_eq!(consumer.state(), ConsumerState::Idle);

        consumer.start().unwrap();
        consumer.shutdown();
        consumer.shutdown();
        consumer.join();
        consumer.shutdown();
        assert_eq!(consumer.state(), ConsumerState::Idle);
    }

    #[test]
    fn start_while_running_is_rejected() {
        let (consumer, _queue, _seen) = recording_consumer(CallbackPolicy::LogAndContinue, None);
        consumer.start().unwrap();

        let err = consumer.start().unwrap_err();
        assert!(matches!(err, ProxyError::InvalidState { .. }));

        consumer.shutdown();
        consumer.join();
    }

    #[test]
    fn restarts_after_reaching_idle() {
        let (consumer, queue, seen) = recording_consumer(CallbackPolicy::LogAndContinue, None);

        consumer.start().unwrap();
        queue.push(block(1));
        assert!(wait_until(Duration::from_secs(5), || seen.lock().len() == 1));
        consumer.shutdown();
        consumer.join();

        consumer.start().unwrap();
        assert_eq!(consumer.state(), ConsumerState::Running);
        queue.push(block(2));
        assert!(wait_until(Duration::from_secs(5), || seen.lock().len() == 2));
        consumer.shutdown();
        consumer.join();

        assert_eq!(*seen.lock(), vec![1, 2]);
    }

    #[test]
    fn failing_callback_does_not_stop_ingestion() {
        let (consumer, queue, seen) = recording_consumer(CallbackPolicy::LogAndContinue, Some(2));
        for i in 1..=3 {
            queue.push(block(i));
        }

        consumer.start().unwrap();
        assert!(wait_until(Duration::from_secs(5), || seen.lock().len() == 2));
        consumer.shutdown();
        consumer.join();

        assert_eq!(*seen.lock(), vec![1, 3]);
        assert_eq!(consumer.failed_count(), 1);
        assert_eq!(consumer.committed_count(), 2);
    }

    #[test]
    fn panicking_callback_is_contained() {
        let queue = Arc::new(BlockQueue::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler = move |b: Block| -> anyhow::Result<()> {
            if b.index() == 1 {
                panic!("corrupt state");
            }
            sink.lock().push(b.index());
            Ok(())
        };
        let consumer = StateConsumer::new(
            Arc::clone(&queue),
            Arc::new(handler),
            fast_config(CallbackPolicy::LogAndContinue),
        );
        queue.push(block(1));
        queue.push(block(2));

        consumer.start().unwrap();
        assert!(wait_until(Duration::from_secs(5), || seen.lock().len() == 1));
        consumer.shutdown();
        consumer.join();

        assert_eq!(*seen.lock(), vec![2]);
        assert_eq!(consumer.failed_count(), 1);
    }

    #[test]
    fn halt_policy_stops_at_first_failure() {
        let (consumer, queue, seen) = recording_consumer(CallbackPolicy::Halt, Some(2));
        for i in 1..=3 {
            queue.push(block(i));
        }

        consumer.start().unwrap();
        consumer.join();

        assert_eq!(consumer.state(), ConsumerState::Idle);
        assert_eq!(*seen.lock(), vec![1]);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.try_pop().unwrap().index(), 3);
    }
}
