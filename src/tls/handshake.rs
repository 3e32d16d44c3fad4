//! Drives a single connection's TLS handshake and captures the peer chain.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName};
use tokio_rustls::rustls::CommonState;
use tracing::{debug, warn};

use super::context::{Role, TlsContext};
use super::error::{TlsError, TlsResult};
use super::stats::HandshakeStats;

/// Default bound on a single handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Byte stream usable by a session after the handshake.
pub trait SecureIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SecureIo for T {}

/// Owned, type-erased encrypted stream.
pub type SecureStream = Box<dyn SecureIo>;

/// A completed handshake, before any trust decision.
pub struct Handshake {
    /// Role the daemon played.
    role: Role,

    /// Encrypted stream.
    stream: SecureStream,

    /// Chain the peer offered, leaf first.
    peer_chain: Option<Vec<CertificateDer<'static>>>,

    /// Server name requested by the client (server role) or dialed (client role).
    server_name: Option<String>,

    /// Negotiated protocol version.
    protocol: Option<String>,

    /// Negotiated cipher suite.
    cipher_suite: Option<String>,
}

impl std::fmt::Debug for Handshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handshake")
            .field("role", &self.role)
            .field("peer_chain_len", &self.peer_chain.as_ref().map(Vec::len))
            .field("server_name", &self.server_name)
            .field("protocol", &self.protocol)
            .field("cipher_suite", &self.cipher_suite)
            .finish()
    }
}

impl Handshake {
    fn new(
        role: Role,
        stream: SecureStream,
        details: NegotiatedDetails,
        server_name: Option<String>,
    ) -> Self {
        Self {
            role,
            stream,
            peer_chain: details.peer_chain,
            server_name,
            protocol: details.protocol,
            cipher_suite: details.cipher_suite,
        }
    }

    /// Get the role.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Get the peer chain, if one was offered.
    #[must_use]
    pub fn peer_chain(&self) -> Option<&[CertificateDer<'static>]> {
        self.peer_chain.as_deref()
    }

    /// Get the server name.
    #[must_use]
    pub fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    /// Get the negotiated protocol version.
    #[must_use]
    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    /// Get the negotiated cipher suite.
    #[must_use]
    pub fn cipher_suite(&self) -> Option<&str> {
        self.cipher_suite.as_deref()
    }

    /// Split into the stream and the captured chain.
    #[must_use]
    pub fn into_parts(self) -> (SecureStream, Option<Vec<CertificateDer<'static>>>) {
        (self.stream, self.peer_chain)
    }
}

/// What the engine negotiated, copied out before the stream is boxed.
struct NegotiatedDetails {
    peer_chain: Option<Vec<CertificateDer<'static>>>,
    protocol: Option<String>,
    cipher_suite: Option<String>,
}

impl NegotiatedDetails {
    fn capture(state: &CommonState) -> Self {
        Self {
            peer_chain: state
                .peer_certificates()
                .filter(|chain| !chain.is_empty())
                .map(|chain| chain.iter().map(|c| c.clone().into_owned()).collect()),
            protocol: state.protocol_version().map(|v| format!("{v:?}")),
            cipher_suite: state
                .negotiated_cipher_suite()
                .map(|s| format!("{:?}", s.suite())),
        }
    }
}

/// Runs handshakes for one role using a shared context.
///
/// The driver never judges the peer certificate; it only reports what was
/// offered.
#[derive(Debug, Clone)]
pub struct HandshakeDriver {
    /// Shared context.
    context: Arc<TlsContext>,

    /// Bound on each handshake.
    timeout: Duration,

    /// Counters.
    stats: Arc<HandshakeStats>,
}

impl HandshakeDriver {
    /// Create a driver for a context.
    #[must_use]
    pub fn new(context: Arc<TlsContext>) -> Self {
        Self {
            context,
            timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            stats: Arc::new(HandshakeStats::new()),
        }
    }

    /// Set the handshake timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Share counters with other components.
    #[must_use]
    pub fn with_stats(mut self, stats: Arc<HandshakeStats>) -> Self {
        self.stats = stats;
        self
    }

    /// Get the role of the underlying context.
    #[must_use]
    pub fn role(&self) -> Role {
        self.context.role()
    }

    /// Get the counters.
    #[must_use]
    pub fn stats(&self) -> &Arc<HandshakeStats> {
        &self.stats
    }

    /// Negotiate TLS over a raw connection.
    ///
    /// `server_name` is the remote hostname for outbound connections and is
    /// ignored for inbound ones. The future only makes progress as the
    /// connection becomes readable or writable.
    ///
    /// # Errors
    ///
    /// Returns `HandshakeFailed` on protocol errors, peer disconnect, timeout,
    /// or a missing/invalid outbound server name. The caller tears down the
    /// raw connection.
    pub async fn begin_handshake<IO>(
        &self,
        io: IO,
        server_name: Option<&str>,
    ) -> TlsResult<Handshake>
    where
        IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let result = match self.context.role() {
            Role::Server => self.accept(io).await,
            Role::Client => self.connect(io, server_name).await,
        };

        match result {
            Ok(handshake) => {
                self.stats.record_handshake_success();
                debug!(
                    role = %handshake.role,
                    sni = ?handshake.server_name,
                    protocol = ?handshake.protocol,
                    cipher = ?handshake.cipher_suite,
                    peer_certificates = handshake.peer_chain.as_ref().map_or(0, Vec::len),
                    "TLS handshake completed"
                );
                Ok(handshake)
            },
            Err(e) => {
                self.stats.record_handshake_failure();
                warn!(role = %self.context.role(), error = %e, "TLS handshake failed");
                Err(e)
            },
        }
    }

    async fn accept<IO>(&self, io: IO) -> TlsResult<Handshake>
    where
        IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let acceptor = self
            .context
            .acceptor()
            .ok_or_else(|| TlsError::handshake("context cannot accept connections"))?;

        let stream = timeout(self.timeout, acceptor.accept(io))
            .await
            .map_err(|_| TlsError::handshake("handshake timed out"))?
            .map_err(|e| TlsError::handshake(e.to_string()))?;

        let (_, connection) = stream.get_ref();
        let server_name = connection.server_name().map(str::to_string);
        let details = NegotiatedDetails::capture(connection);

        Ok(Handshake::new(Role::Server, Box::new(stream), details, server_name))
    }

    async fn connect<IO>(&self, io: IO, server_name: Option<&str>) -> TlsResult<Handshake>
    where
        IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let connector = self
            .context
            .connector()
            .ok_or_else(|| TlsError::handshake("context cannot open connections"))?;

        let hostname =
            server_name.ok_or_else(|| TlsError::handshake("outbound handshake needs a server name"))?;
        let dns_name = ServerName::try_from(hostname.to_string())
            .map_err(|e| TlsError::handshake(format!("invalid server name '{hostname}': {e}")))?;

        let stream = timeout(self.timeout, connector.connect(dns_name, io))
            .await
            .map_err(|_| TlsError::handshake("handshake timed out"))?
            .map_err(|e| TlsError::handshake(e.to_string()))?;

        let details = NegotiatedDetails::capture(stream.get_ref().1);

        Ok(Handshake::new(
            Role::Client,
            Box::new(stream),
            details,
            Some(hostname.to_string()),
        ))
    }
}
