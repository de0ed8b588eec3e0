//! Inbound RPC listener.
//!
//! Accepts connections from the node, reads exactly one request per
//! connection, and routes it through the [`DispatchTable`]. Connections are
//! served one at a time in accept order, which keeps block enqueue order
//! equal to the order the node delivered them. Each read is bounded by the
//! configured I/O timeout so a stalled peer cannot wedge the listener.
//!
//! Nothing a peer sends can take the listener down: bad framing, bad JSON,
//! unknown procedures, and handler failures are logged with their
//! [`ErrorKind`](crate::error::ErrorKind) and the connection is dropped.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument, Span};

use crate::config::{DEFAULT_IO_TIMEOUT, DEFAULT_MAX_MESSAGE_SIZE};
use crate::error::{ErrorKind, ProxyError, Result};
use crate::rpc::codec::{read_message, RpcRequest};
use crate::rpc::dispatch::DispatchTable;
use crate::rpc::with_timeout;

/// Pause after a failed `accept()` (e.g. file descriptor exhaustion) before
/// trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Listener tuning.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Deadline for reading one request off a connection.
    pub io_timeout: Duration,
    /// Largest request the listener will buffer.
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            io_timeout: DEFAULT_IO_TIMEOUT,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

/// Handles of a listener that is accepting.
struct Running {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// The application-side RPC listener.
pub struct RpcServer {
    bind_addr: String,
    dispatch: Arc<DispatchTable>,
    config: ServerConfig,
    running: Mutex<Option<Running>>,
    span: Span,
}

impl RpcServer {
    /// Creates a stopped listener for `bind_addr`.
    pub fn new(bind_addr: impl Into<String>, dispatch: DispatchTable, config: ServerConfig) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            dispatch: Arc::new(dispatch),
            config,
            running: Mutex::new(None),
            span: Span::current(),
        }
    }

    /// Runs the accept loop inside `span`.
    pub fn in_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Binds the socket and starts accepting on a background task.
    ///
    /// Returns once the socket is bound, with the actual local address
    /// (useful when binding port 0). Bind failures are configuration errors.
    /// Of two concurrent calls exactly one starts the listener; the other
    /// gets [`ProxyError::InvalidState`].
    pub async fn run(&self) -> Result<SocketAddr> {
        if self.is_running() {
            return Err(already_running());
        }

        let listener = TcpListener::bind(self.bind_addr.as_str())
            .await
            .map_err(|e| ProxyError::Config(format!("failed to bind {}: {}", self.bind_addr, e)))?;
        let local_addr = listener.local_addr()?;

        // Checked again under the same guard that installs the handles; a
        // racing run that got here first keeps its listener and ours drops.
        let mut running = self.running.lock();
        if running.is_some() {
            return Err(already_running());
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(
            accept_loop(
                listener,
                Arc::clone(&self.dispatch),
                self.config.clone(),
                shutdown_rx,
            )
            .instrument(self.span.clone()),
        );

        *running = Some(Running {
            local_addr,
            shutdown_tx,
            task,
        });
        drop(running);

        self.span.in_scope(|| info!(%local_addr, "rpc server listening"));
        Ok(local_addr)
    }

    /// Stops accepting and waits for the accept loop to exit, so the socket
    /// is closed by the time this returns. An in-flight connection is
    /// abandoned. Calling it on a stopped server does nothing.
    pub async fn shutdown(&self) {
        let running = self.running.lock().take();
        let Some(running) = running else {
            return;
        };

        let _ = running.shutdown_tx.send(true);
        if let Err(e) = running.task.await {
            if !e.is_cancelled() {
                self.span
                    .in_scope(|| error!(error = %e, "rpc server task failed"));
            }
        }
        self.span.in_scope(|| {
            info!(local_addr = %running.local_addr, "rpc server stopped")
        });
    }

    /// The bound address while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().as_ref().map(|r| r.local_addr)
    }

    /// `true` between a successful [`run`](Self::run) and
    /// [`shutdown`](Self::shutdown).
    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// The configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.bind_addr
    }
}

fn already_running() -> ProxyError {
    ProxyError::InvalidState {
        action: "start the rpc server",
        state: "running".to_string(),
    }
}

async fn accept_loop(
    listener: TcpListener,
    dispatch: Arc<DispatchTable>,
    config: ServerConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tokio::select! {
                        _ = shutdown.changed() => {
                            debug!(%peer, "abandoning in-flight connection");
                            break;
                        }
                        _ = handle_connection(stream, peer, &dispatch, &config) => {}
                    }
                }
                Err(e) => {
                    warn!(kind = %ErrorKind::Transport, error = %e, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }
}

/// Read, decode, dispatch. Every failure ends here as a log line.
async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    dispatch: &DispatchTable,
    config: &ServerConfig,
) {
    let outcome = async {
        let framed = with_timeout(
            config.io_timeout,
            "read request",
            read_message(&mut stream, config.max_message_size),
        )
        .await?;
        let Some(value) = framed else {
            debug!(%peer, "connection closed without a request");
            return Ok(());
        };

        let request = RpcRequest::from_value(value)?;
        dispatch.dispatch(&request)?;
        debug!(%peer, method = %request.method, unique_id = request.unique_id, "rpc request handled");
        Ok::<(), ProxyError>(())
    }
    .await;

    if let Err(e) = outcome {
        match e.kind() {
            ErrorKind::Dispatch => {
                warn!(%peer, kind = %e.kind(), error = %e, "unrecognized rpc method, message dropped")
            }
            kind => warn!(%peer, kind = %kind, error = %e, "inbound request dropped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tokio::io::AsyncWriteExt;
    use tokio::sync::mpsc;

    const WAIT: Duration = Duration::from_secs(5);

    fn echo_server(bind: &str) -> (RpcServer, mpsc::UnboundedReceiver<Option<Value>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatch = DispatchTable::builder()
            .register("Echo", move |param| {
                let _ = tx.send(param);
                Ok(())
            })
            .build();
        (RpcServer::new(bind, dispatch, ServerConfig::default()), rx)
    }

    async fn send(addr: SocketAddr, bytes: &[u8]) {
        let mut conn = TcpStream::connect(addr).await.unwrap();
        conn.write_all(bytes).await.unwrap();
        conn.shutdown().await.unwrap();
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<Option<Value>>) -> Option<Value> {
        tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn dispatches_first_param() {
        let (server, mut rx) = echo_server("127.0.0.1:0");
        let addr = server.run().await.unwrap();

        send(addr, br#"{"method":"Test.Echo","params":[{"n":1},2],"unique_id":4}"#).await;
        assert_eq!(next(&mut rx).await, Some(json!({"n": 1})));

        server.shutdown().await;
    }

    #[tokio::test]
    async fn survives_unknown_methods_and_garbage() {
        let (server, mut rx) = echo_server("127.0.0.1:0");
        let addr = server.run().await.unwrap();

        send(addr, br#"{"method":"Test.Unknown","params":[1]}"#).await;
        send(addr, br#"{"method":"NoNamespace","params":[1]}"#).await;
        send(addr, b"this is not json").await;
        send(addr, br#"{"params":[1]}"#).await;
        send(addr, br#"{"method":"Test.Echo","par"#).await;
        send(addr, b"").await;
        send(addr, br#"{"method":"Test.Echo","params":["still alive"]}"#).await;

        assert_eq!(next(&mut rx).await, Some(json!("still alive")));
        assert!(server.is_running());
        server.shutdown().await;
    }

    #[tokio::test]
    async fn odd_unique_ids_are_still_dispatched() {
        let (server, mut rx) = echo_server("127.0.0.1:0");
        let addr = server.run().await.unwrap();

        send(addr, br#"{"method":"A.Echo","params":["neg"],"unique_id":-1}"#).await;
        send(addr, br#"{"method":"A.Echo","params":["text"],"unique_id":"x-9"}"#).await;
        assert_eq!(next(&mut rx).await, Some(json!("neg")));
        assert_eq!(next(&mut rx).await, Some(json!("text")));

        server.shutdown().await;
    }

    #[tokio::test]
    async fn connections_are_served_in_accept_order() {
        let (server, mut rx) = echo_server("127.0.0.1:0");
        let addr = server.run().await.unwrap();

        for i in 0..10 {
            send(addr, format!(r#"{{"method":"A.Echo","params":[{}]}}"#, i).as_bytes()).await;
        }
        for i in 0..10 {
            assert_eq!(next(&mut rx).await, Some(json!(i)));
        }

        server.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_releases_socket_and_is_idempotent() {
        let (server, _rx) = echo_server("127.0.0.1:0");
        let addr = server.run().await.unwrap();
        assert_eq!(server.local_addr(), Some(addr));

        server.shutdown().await;
        server.shutdown().await;
        assert!(!server.is_running());
        assert!(server.local_addr().is_none());

        // The port is free again.
        let rebound = TcpListener::bind(addr).await;
        assert!(rebound.is_ok());
    }

    #[tokio::test]
    async fn bind_conflict_is_config_error() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap().to_string();

        let (server, _rx) = echo_server(&addr);
        let err = server.run().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(!server.is_running());
    }

    #[tokio::test]
    async fn double_run_is_rejected() {
        let (server, _rx) = echo_server("127.0.0.1:0");
        server.run().await.unwrap();
        assert!(matches!(
            server.run().await,
            Err(ProxyError::InvalidState { .. })
        ));
        server.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_runs_start_one_listener() {
        let (server, mut rx) = echo_server("127.0.0.1:0");

        let (a, b) = tokio::join!(server.run(), server.run());
        let (winner, loser) = match (a, b) {
            (Ok(addr), Err(e)) | (Err(e), Ok(addr)) => (addr, e),
            other => panic!("expected exactly one listener, got {:?}", other),
        };
        assert!(matches!(loser, ProxyError::InvalidState { .. }));
        assert_eq!(server.local_addr(), Some(winner));

        send(winner, br#"{"method":"A.Echo","params":["one"]}"#).await;
        assert_eq!(next(&mut rx).await, Some(json!("one")));

        server.shutdown().await;
        assert!(!server.is_running());
        assert!(TcpListener::bind(winner).await.is_ok());
    }

    #[tokio::test]
    async fn stalled_peer_does_not_wedge_listener() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let dispatch = DispatchTable::builder()
            .register("Echo", move |param| {
                let _ = tx.send(param);
                Ok(())
            })
            .build();
        let config = ServerConfig {
            io_timeout: Duration::from_millis(100),
            ..ServerConfig::default()
        };
        let server = RpcServer::new("127.0.0.1:0", dispatch, config);
        let addr = server.run().await.unwrap();

        // Opens a connection and sends half a message, then goes quiet.
        let mut stalled = TcpStream::connect(addr).await.unwrap();
        stalled.write_all(br#"{"method":"#).await.unwrap();

        send(addr, br#"{"method":"A.Echo","params":["after"]}"#).await;
        assert_eq!(next(&mut rx).await, Some(json!("after")));

        drop(stalled);
        server.shutdown().await;
    }
}
