//! Session-process side of the trust authority link.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::error::{IpcError, IpcResult};
use super::message::{read_frame, write_frame, VerdictMessage, VerifyRequestMessage};
use crate::session::GateEvent;
use crate::verification::{VerificationRequest, VerificationVerdict};

/// Carries verification requests to the trust authority and verdicts back.
#[derive(Debug, Clone)]
pub struct AuthorityLink {
    /// Path to the authority's Unix socket.
    socket_path: PathBuf,

    /// Connect timeout.
    timeout: Duration,
}

impl AuthorityLink {
    /// Creates a link for the given socket path.
    #[must_use]
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            timeout: Duration::from_secs(5),
        }
    }

    /// Sets the connect timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the socket path.
    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Connects to the authority.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails or times out.
    pub async fn connect(&self) -> IpcResult<UnixStream> {
        let stream = timeout(self.timeout, UnixStream::connect(&self.socket_path))
            .await
            .map_err(|_| IpcError::Timeout)?
            .map_err(|e| IpcError::ConnectionFailed(e.to_string()))?;

        info!(socket = ?self.socket_path, "Connected to trust authority");
        Ok(stream)
    }

    /// Connects and relays until either side goes away.
    ///
    /// Every request drained from `requests` is written to the authority;
    /// every verdict read back is delivered to `events` as
    /// [`GateEvent::Verdict`]. When this returns `requests` is dropped, so
    /// later submissions fail with `AuthorityUnavailable`.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails or the authority violates
    /// the protocol.
    pub async fn run(
        &self,
        requests: mpsc::UnboundedReceiver<VerificationRequest>,
        events: mpsc::UnboundedSender<GateEvent>,
    ) -> IpcResult<()> {
        let stream = self.connect().await?;
        relay(stream, requests, events).await
    }
}

/// Relay requests and verdicts over an established stream.
///
/// # Errors
///
/// Returns an error if the stream fails or carries a malformed frame.
pub async fn relay<S>(
    stream: S,
    mut requests: mpsc::UnboundedReceiver<VerificationRequest>,
    events: mpsc::UnboundedSender<GateEvent>,
) -> IpcResult<()>
where
    S: AsyncRead + AsyncWrite,
{
    let (mut reader, mut writer) = tokio::io::split(stream);

    let outbound = async {
        while let Some(request) = requests.recv().await {
            let message = VerifyRequestMessage::from(&request);
            let bytes = message
                .to_bytes()
                .map_err(|e| IpcError::SerializationError(e.to_string()))?;
            write_frame(&mut writer, &bytes).await?;

            debug!(
                correlation_id = message.correlation_id,
                session = message.session_id,
                "Verification request sent"
            );
        }
        debug!("Verification queue closed");
        Ok::<(), IpcError>(())
    };

    let inbound = async {
        while let Some(body) = read_frame(&mut reader).await? {
            let message = VerdictMessage::from_bytes(&body)
                .map_err(|e| IpcError::DeserializationError(e.to_string()))?;
            let verdict = VerificationVerdict::from(message);

            if events.send(GateEvent::Verdict(verdict)).is_err() {
                debug!("Session gate gone; dropping verdict");
                return Ok(());
            }
        }
        warn!("Trust authority closed the link");
        Ok::<(), IpcError>(())
    };

    tokio::select! {
        result = outbound => result,
        result = inbound => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::server::{AuthorityServer, VerdictHandler};
    use crate::session::SessionId;
    use crate::verification::{CorrelationId, VerdictOutcome};
    use std::sync::Arc;
    use std::time::Instant;
    use tempfile::tempdir;
    use tokio_rustls::rustls::pki_types::CertificateDer;

    /// Accepts chains with intermediates, rejects bare leaves.
    struct ChainLengthHandler;

    impl VerdictHandler for ChainLengthHandler {
        fn verdict(&self, request: &VerifyRequestMessage) -> VerdictMessage {
            if request.certificate_chain.len() > 1 {
                VerdictMessage::accept(request.correlation_id)
            } else {
                VerdictMessage::reject(request.correlation_id, "no intermediate")
            }
        }
    }

    fn request(id: u64, chain_len: usize) -> VerificationRequest {
        VerificationRequest {
            correlation_id: CorrelationId(id),
            session_id: SessionId(id),
            certificate_chain: vec![CertificateDer::from(vec![0x30, 0x00]); chain_len],
            requested_at: Instant::now(),
        }
    }

    #[tokio::test]
    async fn test_link_round_trip() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("authority.sock");

        let server_socket_path = socket_path.clone();
        let server_handle = tokio::spawn(async move {
            let mut server = AuthorityServer::new(&server_socket_path);
            server.start(Arc::new(ChainLengthHandler)).await.unwrap();
        });

        tokio::time::sleep(Duration::from_millis(100)).await;

        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();

        let link = AuthorityLink::new(&socket_path).with_timeout(Duration::from_secs(5));
        let link_handle = tokio::spawn(async move { link.run(request_rx, event_tx).await });

        request_tx.send(request(1, 2)).unwrap();
        request_tx.send(request(2, 1)).unwrap();

        let mut verdicts = Vec::new();
        for _ in 0..2 {
            match event_rx.recv().await.unwrap() {
                GateEvent::Verdict(verdict) => verdicts.push(verdict),
                other => panic!("unexpected event {other:?}"),
            }
        }
        verdicts.sort_by_key(|v| v.correlation_id);

        assert_eq!(verdicts[0].outcome, VerdictOutcome::Accept);
        assert_eq!(
            verdicts[1].outcome,
            VerdictOutcome::Reject("no intermediate".to_string())
        );

        drop(request_tx);
        assert!(link_handle.await.unwrap().is_ok());
        server_handle.abort();
    }

    #[tokio::test]
    async fn test_connect_to_missing_socket() {
        let dir = tempdir().unwrap();
        let link = AuthorityLink::new(dir.path().join("missing.sock"));

        assert!(matches!(
            link.connect().await,
            Err(IpcError::ConnectionFailed(_))
        ));
    }
}
