//! Trust authority side: answers verification requests.

use std::path::Path;
use std::sync::Arc;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::error::IpcResult;
use super::message::{read_frame, write_frame, VerdictMessage, VerifyRequestMessage};

/// Decides whether a peer chain is trusted.
pub trait VerdictHandler: Send + Sync + 'static {
    /// Produce the verdict for a request. Must echo its correlation id.
    fn verdict(&self, request: &VerifyRequestMessage) -> VerdictMessage;
}

/// Stops a running [`AuthorityServer`] from another task.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: mpsc::Sender<()>,
}

impl ShutdownHandle {
    /// Signals the server to stop accepting links and remove its socket.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(()).await;
    }
}

/// Server that listens on a Unix socket for verification requests.
pub struct AuthorityServer {
    /// Path to the Unix socket.
    socket_path: std::path::PathBuf,

    /// Kept so the channel stays open while the server lives.
    shutdown_tx: mpsc::Sender<()>,

    /// Taken by `start`.
    shutdown_rx: Option<mpsc::Receiver<()>>,
}

impl AuthorityServer {
    /// Creates a new server bound to the given socket path.
    #[must_use]
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            shutdown_tx,
            shutdown_rx: Some(shutdown_rx),
        }
    }

    /// Returns a handle that stops the server once started.
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    /// Starts the server and answers links until shut down.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be created or the server was
    /// already started.
    pub async fn start<H: VerdictHandler>(
        &mut self,
        handler: Arc<H>,
    ) -> Result<(), std::io::Error> {
        let mut shutdown_rx = self
            .shutdown_rx
            .take()
            .ok_or_else(|| std::io::Error::other("trust authority already started"))?;

        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        info!(socket = ?self.socket_path, "Trust authority listening");

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, _)) => {
                            let handler = Arc::clone(&handler);
                            tokio::spawn(async move {
                                if let Err(e) = Self::handle_connection(stream, handler).await {
                                    error!(error = %e, "Authority link error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Accept error");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Trust authority shutting down");
                    break;
                }
            }
        }

        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }

        Ok(())
    }

    /// Answers requests on a single link.
    async fn handle_connection<H: VerdictHandler>(
        mut stream: UnixStream,
        handler: Arc<H>,
    ) -> IpcResult<()> {
        debug!("New authority link");

        while let Some(body) = read_frame(&mut stream).await? {
            let request = match VerifyRequestMessage::from_bytes(&body) {
                Ok(request) => request,
                Err(e) => {
                    warn!(error = %e, "Failed to deserialize verification request");
                    continue;
                },
            };

            debug!(
                correlation_id = request.correlation_id,
                session = request.session_id,
                chain_len = request.certificate_chain.len(),
                "Verification request received"
            );

            let verdict = handler.verdict(&request);
            let bytes = match verdict.to_bytes() {
                Ok(bytes) => bytes,
                Err(e) => {
                    error!(error = %e, "Failed to serialize verdict");
                    continue;
                },
            };

            write_frame(&mut stream, &bytes).await?;
        }

        debug!("Authority link closed");
        Ok(())
    }

    /// Returns the socket path.
    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

impl Drop for AuthorityServer {
    fn drop(&mut self) {
        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
    }
}
