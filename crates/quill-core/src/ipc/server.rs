//! IPC session: the first instance listens for later invocations.
//!
//! [`start_session`] binds a fresh local endpoint, publishes it in the
//! address record, and accepts connections in the background. Each
//! connection gets its own task serving an axum router whose single route
//! pushes decoded messages into the session's queue. The owner of the
//! returned [`Session`] is the queue's only reader.

use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware;
use axum::response::Response;
use axum::routing::post;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use quill_config::Transport;

use super::address::{self, Endpoint};
use super::types::{MAX_MESSAGE_BYTES, MESSAGE_ROUTE, SESSION_HEADER};

/// Socket file name inside the session's private directory.
pub const SOCKET_FILE_NAME: &str = "ipc.sock";

/// Pause after an accept error before accepting again.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Errors that prevent a session from starting.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to bind IPC endpoint ({what}): {source}")]
    Bind {
        what: &'static str,
        source: io::Error,
    },

    #[error("failed to write address record {path}: {source}")]
    AddressRecord { path: PathBuf, source: io::Error },

    #[error("transport {0:?} is not available on this platform")]
    UnsupportedTransport(Transport),
}

/// Shared state for the message route.
struct QueueState<M> {
    queue: mpsc::UnboundedSender<M>,
}

/// Build the axum router that feeds `queue`.
pub fn router<M>(queue: mpsc::UnboundedSender<M>) -> axum::Router
where
    M: DeserializeOwned + Send + 'static,
{
    axum::Router::new()
        .route(MESSAGE_ROUTE, post(handle_message::<M>))
        .layer(DefaultBodyLimit::max(MAX_MESSAGE_BYTES))
        .layer(middleware::map_response(mark_session))
        .with_state(Arc::new(QueueState { queue }))
}

async fn mark_session(mut response: Response) -> Response {
    response
        .headers_mut()
        .insert(SESSION_HEADER, HeaderValue::from_static(env!("CARGO_PKG_VERSION")));
    response
}

async fn handle_message<M>(
    State(state): State<Arc<QueueState<M>>>,
    Json(message): Json<M>,
) -> StatusCode
where
    M: DeserializeOwned + Send + 'static,
{
    match state.queue.send(message) {
        Ok(()) => StatusCode::ACCEPTED,
        // The session owner dropped its receiver.
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// A listening single-instance session.
///
/// Dropping the session stops the accept loop; [`Session::close`] does the
/// same and also waits for the listener to be released.
pub struct Session<M> {
    endpoint: Endpoint,
    address_file: PathBuf,
    messages: mpsc::UnboundedReceiver<M>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    accept_task: Option<JoinHandle<()>>,
    // Holds the Unix socket; removed with the session.
    _socket_dir: Option<tempfile::TempDir>,
}

impl<M> Session<M> {
    /// The endpoint this session listens on.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// The address record this session published.
    pub fn address_file(&self) -> &Path {
        &self.address_file
    }

    /// Wait for the next message.
    ///
    /// Pends for as long as the session listens and nothing arrives. Returns
    /// `None` only if the accept loop has ended without [`Session::close`],
    /// after every accepted connection has finished and been drained.
    pub async fn next_message(&mut self) -> Option<M> {
        self.messages.recv().await
    }

    /// Take the next queued message without waiting.
    pub fn try_next_message(&mut self) -> Option<M> {
        self.messages.try_recv().ok()
    }

    /// Whether the accept loop is still running.
    pub fn is_listening(&self) -> bool {
        self.accept_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Stop accepting connections and release the listening endpoint.
    ///
    /// Connections accepted before the call are served to completion in
    /// their own tasks. The address record is removed if it still names
    /// this session.
    pub async fn close(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.accept_task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "IPC accept loop ended abnormally");
            }
        }
        address::retract(&self.address_file, &self.endpoint).await;
        info!(endpoint = %self.endpoint, "IPC session closed");
    }
}

/// Start a session: bind, publish the address record, accept in the background.
///
/// Failing to bind or to write the record is fatal to the feature and is
/// returned to the caller.
pub async fn start_session<M>(
    address_file: &Path,
    transport: Transport,
) -> Result<Session<M>, SessionError>
where
    M: DeserializeOwned + Send + 'static,
{
    let (listener, endpoint, socket_dir) = bind(transport).await?;

    address::publish(address_file, &endpoint)
        .await
        .map_err(|source| SessionError::AddressRecord {
            path: address_file.to_path_buf(),
            source,
        })?;

    let (queue_tx, queue_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let accept_task = tokio::spawn(accept_loop(listener, router(queue_tx), shutdown_rx));

    info!(%endpoint, record = %address_file.display(), "IPC session listening");

    Ok(Session {
        endpoint,
        address_file: address_file.to_path_buf(),
        messages: queue_rx,
        shutdown_tx: Some(shutdown_tx),
        accept_task: Some(accept_task),
        _socket_dir: socket_dir,
    })
}

// ── Listener plumbing ───────────────────────────────────────────────────

/// Source of incoming connections for the accept loop.
trait Acceptor: Send + Sync + 'static {
    /// Accept one connection and hand it to its own handler task.
    fn accept(&self, router: &axum::Router) -> impl Future<Output = io::Result<()>> + Send;
}

enum BoundListener {
    #[cfg(unix)]
    Unix(UnixListener),
    Tcp(TcpListener),
}

impl Acceptor for BoundListener {
    async fn accept(&self, router: &axum::Router) -> io::Result<()> {
        match self {
            #[cfg(unix)]
            BoundListener::Unix(listener) => {
                let (stream, _) = listener.accept().await?;
                tokio::spawn(serve_connection(stream, router.clone()));
            }
            BoundListener::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                debug!(%peer, "IPC connection accepted");
                tokio::spawn(serve_connection(stream, router.clone()));
            }
        }
        Ok(())
    }
}

async fn bind(
    transport: Transport,
) -> Result<(BoundListener, Endpoint, Option<tempfile::TempDir>), SessionError> {
    match transport.resolve() {
        Transport::Tcp => {
            let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
                .await
                .map_err(|source| SessionError::Bind {
                    what: "loopback tcp",
                    source,
                })?;
            let addr = listener.local_addr().map_err(|source| SessionError::Bind {
                what: "loopback tcp",
                source,
            })?;
            Ok((BoundListener::Tcp(listener), Endpoint::Tcp(addr), None))
        }
        #[cfg(unix)]
        _ => {
            let dir = tempfile::Builder::new()
                .prefix("quill-ipc-")
                .tempdir()
                .map_err(|source| SessionError::Bind {
                    what: "socket directory",
                    source,
                })?;
            let path = dir.path().join(SOCKET_FILE_NAME);
            let listener = UnixListener::bind(&path).map_err(|source| SessionError::Bind {
                what: "unix socket",
                source,
            })?;
            Ok((BoundListener::Unix(listener), Endpoint::Unix(path), Some(dir)))
        }
        #[cfg(not(unix))]
        other => Err(SessionError::UnsupportedTransport(other)),
    }
}

async fn accept_loop(
    listener: impl Acceptor,
    router: axum::Router,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            // Resolves on an explicit close and when the session is dropped.
            _ = &mut shutdown_rx => {
                debug!("IPC listener closing");
                break;
            }
            accepted = listener.accept(&router) => {
                if let Err(e) = accepted {
                    warn!(error = %e, "Failed to accept IPC connection");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            }
        }
    }
    drop(listener);
}

async fn serve_connection<S>(stream: S, router: axum::Router)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(stream);
    let service = TowerToHyperService::new(router);
    if let Err(e) = hyper::server::conn::http1::Builder::new()
        .serve_connection(io, service)
        .await
    {
        debug!(error = %e, "IPC connection ended with error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    use crate::ipc::types::OpenRequest;

    fn post_json(body: impl Into<Body>) -> Request<Body> {
        Request::post(MESSAGE_ROUTE)
            .header("content-type", "application/json")
            .body(body.into())
            .unwrap()
    }

    #[tokio::test]
    async fn test_message_route_queues() {
        let (tx, mut rx) = mpsc::unbounded_channel::<OpenRequest>();
        let app = router(tx);

        let body = serde_json::to_string(&OpenRequest::file("/tmp/a.txt", "x")).unwrap();
        let resp = app.oneshot(post_json(body)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        assert_eq!(rx.try_recv().unwrap(), OpenRequest::file("/tmp/a.txt", "x"));
    }

    #[tokio::test]
    async fn test_message_route_rejects_bad_body() {
        let (tx, mut rx) = mpsc::unbounded_channel::<OpenRequest>();
        let app = router(tx);

        let resp = app.oneshot(post_json("{not json")).await.unwrap();
        assert!(resp.status().is_client_error());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_message_route_wrong_shape() {
        let (tx, mut rx) = mpsc::unbounded_channel::<u32>();
        let app = router(tx);

        let resp = app.oneshot(post_json("\"seven\"")).await.unwrap();
        assert!(resp.status().is_client_error());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_replies_carry_session_header() {
        let (tx, _rx) = mpsc::unbounded_channel::<u32>();

        let ok = router(tx.clone()).oneshot(post_json("7")).await.unwrap();
        assert!(ok.headers().contains_key(SESSION_HEADER));

        let bad = router(tx).oneshot(post_json("\"seven\"")).await.unwrap();
        assert!(bad.status().is_client_error());
        assert!(bad.headers().contains_key(SESSION_HEADER));
    }

    /// Fails the first `failures` accepts, then waits forever.
    struct FlakyAcceptor {
        failures: usize,
        calls: Arc<AtomicUsize>,
    }

    impl Acceptor for FlakyAcceptor {
        async fn accept(&self, _router: &axum::Router) -> io::Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(io::Error::other("too many open files"));
            }
            std::future::pending().await
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_accept_errors_do_not_stop_the_loop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let acceptor = FlakyAcceptor {
            failures: 3,
            calls: calls.clone(),
        };
        let (tx, _rx) = mpsc::unbounded_channel::<u32>();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(accept_loop(acceptor, router(tx), shutdown_rx));

        // Three failures, each followed by a backoff, then a fourth attempt.
        tokio::time::timeout(Duration::from_secs(2), async {
            while calls.load(Ordering::SeqCst) < 4 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("accept loop should keep accepting after errors");
        assert!(!task.is_finished());

        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("accept loop should stop on shutdown")
            .unwrap();
    }

    #[tokio::test]
    async fn test_message_route_after_receiver_dropped() {
        let (tx, rx) = mpsc::unbounded_channel::<u32>();
        drop(rx);
        let app = router(tx);

        let resp = app.oneshot(post_json("7")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_session_publishes_and_closes() {
        let tmp = tempfile::TempDir::new().unwrap();
        let record = tmp.path().join("ipc_address.txt");

        let session = start_session::<u32>(&record, Transport::Tcp).await.unwrap();
        assert!(session.is_listening());
        assert_eq!(address::read(&record).await.unwrap(), *session.endpoint());
        assert_eq!(session.address_file(), record.as_path());

        session.close().await;
        assert!(!record.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unix_session_removes_socket_on_close() {
        let tmp = tempfile::TempDir::new().unwrap();
        let record = tmp.path().join("ipc_address.txt");

        let session = start_session::<u32>(&record, Transport::Unix).await.unwrap();
        let Endpoint::Unix(socket) = session.endpoint().clone() else {
            panic!("expected a unix endpoint");
        };
        assert!(socket.exists());

        session.close().await;
        assert!(!socket.exists());
    }

    #[tokio::test]
    async fn test_dropped_session_stops_listening() {
        let tmp = tempfile::TempDir::new().unwrap();
        let record = tmp.path().join("ipc_address.txt");

        let mut session = start_session::<u32>(&record, Transport::Tcp).await.unwrap();
        assert!(session.try_next_message().is_none());
        let task = session.accept_task.take().unwrap();
        drop(session);

        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("accept loop should stop when the session is dropped")
            .unwrap();
    }
}
