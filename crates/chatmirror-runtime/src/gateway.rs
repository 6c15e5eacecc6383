//! Unix-socket send gateway.
//!
//! The process holding the live session binds `<store_dir>/send.sock` and
//! accepts one JSON request line per connection. Other processes try the
//! socket first and fall back to their own session when nobody listens.

use std::future::Future;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chatmirror_core::config::GatewayConfig;
use chatmirror_core::{Error, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::send::{SendRequest, SendResponse, SendService};

/// Per-connection deadlines.
#[derive(Debug, Clone, Copy)]
pub struct GatewayTimeouts {
    pub text: Duration,
    pub file: Duration,
}

impl Default for GatewayTimeouts {
    fn default() -> Self {
        Self {
            text: Duration::from_secs(30),
            file: Duration::from_secs(120),
        }
    }
}

impl From<&GatewayConfig> for GatewayTimeouts {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            text: Duration::from_secs(config.text_timeout_secs),
            file: Duration::from_secs(config.file_timeout_secs),
        }
    }
}

pub struct SendGateway {
    listener: UnixListener,
    path: PathBuf,
    service: Arc<SendService>,
    timeouts: GatewayTimeouts,
}

impl SendGateway {
    /// Bind the socket. A leftover socket file nobody answers on is removed
    /// first; a live one means another process already owns the gateway.
    pub async fn bind(path: &Path, service: SendService, timeouts: GatewayTimeouts) -> Result<Self> {
        if path.exists() {
            if UnixStream::connect(path).await.is_ok() {
                return Err(Error::Other(format!(
                    "send gateway already running at {}",
                    path.display()
                )));
            }
            tokio::fs::remove_file(path).await?;
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let listener = UnixListener::bind(path)?;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
        tracing::info!(path = %path.display(), "Send gateway listening");

        Ok(Self {
            listener,
            path: path.to_path_buf(),
            service: Arc::new(service),
            timeouts,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept connections until cancelled. Requests already accepted get
    /// up to the file deadline to finish, then the socket file is removed.
    pub async fn serve(self, cancel: CancellationToken) {
        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        tracing::warn!("Gateway connection task failed: {e}");
                    }
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, _addr)) => {
                            let service = Arc::clone(&self.service);
                            let timeouts = self.timeouts;
                            connections.spawn(async move {
                                if let Err(e) = handle_connection(stream, &service, timeouts).await {
                                    tracing::debug!("Gateway connection ended: {e}");
                                }
                            });
                        }
                        Err(e) => {
                            tracing::warn!("Gateway accept failed: {e}");
                        }
                    }
                }
            }
        }

        drop(self.listener);
        let drain = async {
            while let Some(joined) = connections.join_next().await {
                if let Err(e) = joined {
                    tracing::warn!("Gateway connection task failed: {e}");
                }
            }
        };
        if tokio::time::timeout(self.timeouts.file, drain).await.is_err() {
            tracing::warn!(pending = connections.len(), "Aborting unfinished gateway requests");
            connections.shutdown().await;
        }
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            tracing::debug!(path = %self.path.display(), "Failed to remove gateway socket: {e}");
        }
        tracing::debug!("Send gateway stopped");
    }
}

async fn handle_connection(
    stream: UnixStream,
    service: &SendService,
    timeouts: GatewayTimeouts,
) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    let response = match tokio::time::timeout(timeouts.text, reader.read_line(&mut line)).await {
        Err(_) | Ok(Ok(0)) => SendResponse::failure("no input"),
        Ok(Err(e)) => SendResponse::failure(format!("read failed: {e}")),
        Ok(Ok(_)) => match serde_json::from_str::<SendRequest>(line.trim_end()) {
            Err(e) => SendResponse::failure(format!("invalid json: {e}")),
            Ok(req) => {
                let deadline = if req.is_file() {
                    timeouts.file
                } else {
                    timeouts.text
                };
                tokio::time::timeout(deadline, service.handle(req))
                    .await
                    .unwrap_or_else(|_| SendResponse::failure("send timed out"))
            }
        },
    };

    let mut payload = serde_json::to_vec(&response)?;
    payload.push(b'\n');
    write_half.write_all(&payload).await?;
    write_half.shutdown().await?;
    Ok(())
}

/// Client side of the gateway.
#[derive(Debug, Clone)]
pub struct GatewayClient {
    path: PathBuf,
    timeout: Duration,
}

impl GatewayClient {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            timeout: GatewayTimeouts::default().file,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send through a running gateway. `Ok(None)` means no gateway is
    /// reachable. An error reply is returned as an error and not retried.
    pub async fn send(&self, req: &SendRequest) -> Result<Option<SendResponse>> {
        let stream = match UnixStream::connect(&self.path).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::debug!(path = %self.path.display(), "No send gateway: {e}");
                return Ok(None);
            }
        };

        let exchange = async {
            let (read_half, mut write_half) = stream.into_split();
            let mut payload = serde_json::to_vec(req)?;
            payload.push(b'\n');
            write_half.write_all(&payload).await?;

            let mut line = String::new();
            BufReader::new(read_half).read_line(&mut line).await?;
            if line.trim().is_empty() {
                return Err(Error::Other("empty response from send gateway".to_string()));
            }
            Ok::<_, Error>(serde_json::from_str::<SendResponse>(line.trim_end())?)
        };

        let response = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| Error::Timeout("waiting for send gateway".to_string()))??;

        if response.success {
            Ok(Some(response))
        } else {
            Err(Error::Other(
                response
                    .error
                    .unwrap_or_else(|| "send failed".to_string()),
            ))
        }
    }
}

/// Try the gateway first; run `fallback` only when no gateway is reachable.
pub async fn send_with_fallback<F, Fut>(
    client: &GatewayClient,
    req: SendRequest,
    fallback: F,
) -> Result<SendResponse>
where
    F: FnOnce(SendRequest) -> Fut,
    Fut: Future<Output = Result<SendResponse>>,
{
    match client.send(&req).await? {
        Some(response) => Ok(response),
        None => fallback(req).await,
    }
}
