//! IPC client: hands messages to an already running instance.
//!
//! Reads the address record, connects to the recorded endpoint, and posts
//! each message over one HTTP/1.1 connection using `hyper`. A missing or
//! stale record, a refused or timed-out connection, and an endpoint answered
//! by something other than a session are the same outcome:
//! [`IpcClientError::NotRunning`], after which the caller becomes the server.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use http_body_util::{BodyExt, Full};
use hyper::StatusCode;
use hyper::body::Bytes;
use hyper::client::conn::http1::SendRequest;
use hyper_util::rt::TokioIo;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
use tracing::debug;

use quill_config::AppConfig;

use super::address::{self, Endpoint};
use super::types::{MESSAGE_ROUTE, SESSION_HEADER};

/// Deadline for connecting, and for the first reply, when none is configured.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Errors from the IPC client.
#[derive(Debug, thiserror::Error)]
pub enum IpcClientError {
    #[error("no running instance (address record {0})")]
    NotRunning(PathBuf),

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("request failed: {0}")]
    Request(String),

    #[error("running instance rejected message: {0}")]
    Rejected(StatusCode),
}

/// Client for handing messages to the running instance.
#[derive(Debug, Clone)]
pub struct IpcClient {
    address_file: PathBuf,
    connect_timeout: Duration,
}

impl IpcClient {
    /// Create a client that reads the address record at `address_file`.
    pub fn new(address_file: impl Into<PathBuf>) -> Self {
        Self {
            address_file: address_file.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Create a client from the resolved configuration.
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.address_file()).with_connect_timeout(config.connect_timeout())
    }

    /// Set the deadline for connecting and for the first reply.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// The address record this client reads.
    pub fn address_file(&self) -> &Path {
        &self.address_file
    }

    /// Send every message, in order, over one connection.
    ///
    /// Returns [`IpcClientError::NotRunning`] when no instance can be reached.
    pub async fn try_send<M, I>(&self, messages: I) -> Result<(), IpcClientError>
    where
        M: Serialize,
        I: IntoIterator<Item = M>,
    {
        let endpoint = match address::read(&self.address_file).await {
            Ok(endpoint) => endpoint,
            Err(e) => {
                debug!(error = %e, "No usable IPC address record");
                return Err(self.not_running());
            }
        };

        match &endpoint {
            #[cfg(unix)]
            Endpoint::Unix(path) => {
                let stream = self.connect(&endpoint, UnixStream::connect(path)).await?;
                self.post_all(&endpoint, stream, messages).await
            }
            Endpoint::Tcp(addr) => {
                let stream = self.connect(&endpoint, TcpStream::connect(*addr)).await?;
                self.post_all(&endpoint, stream, messages).await
            }
        }
    }

    /// Post each message as its own request on one connection, waiting for
    /// the acknowledgement before sending the next.
    ///
    /// Until a session has acknowledged a message, the peer may be anything
    /// that reused the recorded address. The first exchange therefore runs
    /// under the connect deadline, and a timeout, a broken connection, or a
    /// reply without [`SESSION_HEADER`] means no instance is running.
    async fn post_all<S, M, I>(
        &self,
        endpoint: &Endpoint,
        stream: S,
        messages: I,
    ) -> Result<(), IpcClientError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
        M: Serialize,
        I: IntoIterator<Item = M>,
    {
        let io = TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake::<_, Full<Bytes>>(io)
            .await
            .map_err(|e| IpcClientError::Request(format!("HTTP handshake failed: {e}")))?;

        // Drive the connection in the background
        let conn_task = tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "IPC connection error");
            }
        });

        let mut confirmed = false;
        for message in messages {
            let body = serde_json::to_vec(&message)?;

            let reply = if confirmed {
                post_one(&mut sender, body).await?
            } else {
                let first =
                    tokio::time::timeout(self.connect_timeout, post_one(&mut sender, body)).await;
                match first {
                    Ok(Ok(reply)) if reply.from_session => reply,
                    Ok(Ok(reply)) => {
                        debug!(
                            %endpoint,
                            status = %reply.status,
                            "IPC address answered by another program"
                        );
                        conn_task.abort();
                        return Err(self.not_running());
                    }
                    Ok(Err(e)) => {
                        debug!(%endpoint, error = %e, "Stale IPC address");
                        conn_task.abort();
                        return Err(self.not_running());
                    }
                    Err(_) => {
                        debug!(
                            %endpoint,
                            timeout = ?self.connect_timeout,
                            "IPC address did not answer"
                        );
                        conn_task.abort();
                        return Err(self.not_running());
                    }
                }
            };

            if !reply.status.is_success() {
                return Err(IpcClientError::Rejected(reply.status));
            }
            confirmed = true;
        }

        drop(sender);
        let _ = conn_task.await;
        Ok(())
    }

    async fn connect<S, F>(&self, endpoint: &Endpoint, connecting: F) -> Result<S, IpcClientError>
    where
        F: Future<Output = io::Result<S>>,
    {
        match tokio::time::timeout(self.connect_timeout, connecting).await {
            Ok(Ok(stream)) => {
                debug!(%endpoint, "Connected to running instance");
                Ok(stream)
            }
            Ok(Err(e)) => {
                debug!(%endpoint, error = %e, "Stale IPC address");
                Err(self.not_running())
            }
            Err(_) => {
                debug!(%endpoint, timeout = ?self.connect_timeout, "IPC connect timed out");
                Err(self.not_running())
            }
        }
    }

    fn not_running(&self) -> IpcClientError {
        IpcClientError::NotRunning(self.address_file.clone())
    }
}

/// The status of one acknowledged request.
struct Reply {
    status: StatusCode,
    from_session: bool,
}

/// Post one message and wait for its acknowledgement.
async fn post_one(
    sender: &mut SendRequest<Full<Bytes>>,
    body: Vec<u8>,
) -> Result<Reply, IpcClientError> {
    sender
        .ready()
        .await
        .map_err(|e| IpcClientError::Request(format!("connection closed: {e}")))?;

    let req = hyper::Request::builder()
        .method(hyper::Method::POST)
        .uri(MESSAGE_ROUTE)
        .header("host", "localhost")
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from(body)))
        .map_err(|e| IpcClientError::Request(format!("failed to build request: {e}")))?;

    let resp = sender
        .send_request(req)
        .await
        .map_err(|e| IpcClientError::Request(format!("request failed: {e}")))?;
    let status = resp.status();
    let from_session = resp.headers().contains_key(SESSION_HEADER);

    // Drain the body so the connection can carry the next request.
    resp.into_body()
        .collect()
        .await
        .map_err(|e| IpcClientError::Request(format!("failed to read response body: {e}")))?;

    Ok(Reply {
        status,
        from_session,
    })
}
