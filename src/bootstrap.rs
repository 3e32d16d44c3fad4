//! Startup assembly: credentials, contexts and drivers from configuration.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::TlsSettings;
use crate::session::{GateEvent, SessionGate, SessionId, SessionPolicy};
use crate::tls::{
    build_client_context, build_server_context, CredentialStore, HandshakeDriver, HandshakeStats,
    Role, TlsContext, TlsError, TlsResult,
};
use crate::verification::{VerificationBroker, VerificationRequest};

/// Everything the daemon needs to start negotiating TLS.
#[derive(Debug)]
pub struct TlsBootstrap {
    settings: TlsSettings,
    store: Arc<CredentialStore>,
    server: Option<Arc<TlsContext>>,
    client: Arc<TlsContext>,
    stats: Arc<HandshakeStats>,
}

impl TlsBootstrap {
    /// Load credentials and build both contexts.
    ///
    /// Without credentials only the client context is built; inbound
    /// sessions cannot be accepted.
    ///
    /// # Errors
    ///
    /// Returns the first credential or context failure, or
    /// `UnknownCredential` if configuration names a credential that was not
    /// loaded.
    pub fn from_settings(settings: TlsSettings) -> TlsResult<Self> {
        let mut store = CredentialStore::load_all(&settings.credentials)?;

        if let Some(ref name) = settings.server.default_credential {
            store.set_default(name)?;
        }

        let client_credential = match settings.client.credential {
            Some(ref name) => Some(store.get(name).ok_or_else(|| TlsError::UnknownCredential {
                name: name.clone(),
            })?),
            None => None,
        };

        let default = store.default_credential();
        let store = Arc::new(store);

        let server = match default {
            Some(default) => Some(Arc::new(build_server_context(
                Some(default),
                Arc::clone(&store),
            )?)),
            None => {
                warn!("No credentials loaded; inbound TLS disabled");
                None
            },
        };
        let client = Arc::new(build_client_context(client_credential)?);

        info!(
            credentials = store.len(),
            hostnames = ?store.hostnames(),
            inbound = server.is_some(),
            "TLS bootstrap ready"
        );

        Ok(Self {
            settings,
            store,
            server,
            client,
            stats: Arc::new(HandshakeStats::new()),
        })
    }

    /// Get the loaded credentials.
    #[must_use]
    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    /// Get the server context, if any credential was loaded.
    #[must_use]
    pub fn server_context(&self) -> Option<&Arc<TlsContext>> {
        self.server.as_ref()
    }

    /// Get the client context.
    #[must_use]
    pub fn client_context(&self) -> &Arc<TlsContext> {
        &self.client
    }

    /// Get the shared counters.
    #[must_use]
    pub fn stats(&self) -> &Arc<HandshakeStats> {
        &self.stats
    }

    /// Build a handshake driver for a role.
    ///
    /// Returns `None` for the server role when no credential was loaded.
    #[must_use]
    pub fn driver(&self, role: Role) -> Option<HandshakeDriver> {
        let context = match role {
            Role::Server => Arc::clone(self.server.as_ref()?),
            Role::Client => Arc::clone(&self.client),
        };

        Some(
            HandshakeDriver::new(context)
                .with_timeout(self.settings.handshake.timeout())
                .with_stats(Arc::clone(&self.stats)),
        )
    }

    /// Get the configured policy for a role.
    #[must_use]
    pub fn policy(&self, role: Role) -> SessionPolicy {
        self.settings.session_policy(role)
    }

    /// Open a session for a new connection and drive its handshake on its
    /// own task.
    ///
    /// The session starts in HANDSHAKING under the configured policy for
    /// `role`. The outcome is sent to `events` as
    /// [`GateEvent::HandshakeFinished`] for the gate's owner to apply.
    ///
    /// # Errors
    ///
    /// Returns `NoCredential` for the server role when no credential was
    /// loaded. No session is opened in that case.
    pub fn start_handshake<IO>(
        &self,
        gate: &mut SessionGate,
        role: Role,
        io: IO,
        server_name: Option<String>,
        events: mpsc::UnboundedSender<GateEvent>,
    ) -> TlsResult<SessionId>
    where
        IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let driver = self.driver(role).ok_or(TlsError::NoCredential)?;
        let session = gate.open(role, self.policy(role));

        tokio::spawn(async move {
            let result = driver.begin_handshake(io, server_name.as_deref()).await;
            if events
                .send(GateEvent::HandshakeFinished { session, result })
                .is_err()
            {
                debug!(session = %session, "Gate gone before handshake finished");
            }
        });

        Ok(session)
    }

    /// Create a session gate sharing these counters, plus the queue its
    /// verification requests are written to.
    #[must_use]
    pub fn gate(&self) -> (SessionGate, mpsc::UnboundedReceiver<VerificationRequest>) {
        let (broker, requests) = VerificationBroker::new();
        let gate = SessionGate::new(broker).with_stats(Arc::clone(&self.stats));
        (gate, requests)
    }

    /// Get the settings.
    #[must_use]
    pub fn settings(&self) -> &TlsSettings {
        &self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CredentialConfig;
    use crate::session::SessionState;
    use crate::tls::test_support::self_signed;

    fn write_credential(dir: &std::path::Path, hostname: &str) -> CredentialConfig {
        let (cert, key) = self_signed(hostname);
        let cert_path = dir.join(format!("{hostname}.crt"));
        let key_path = dir.join(format!("{hostname}.key"));
        std::fs::write(&cert_path, cert).unwrap();
        std::fs::write(&key_path, key).unwrap();
        CredentialConfig::new(hostname, cert_path, key_path)
    }

    #[test]
    fn test_bootstrap_from_settings() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = TlsSettings::default();
        settings.credentials.push(write_credential(dir.path(), "mx.example.org"));
        settings.credentials.push(write_credential(dir.path(), "relay.example.org"));
        settings.server.default_credential = Some("relay.example.org".to_string());
        settings.client.credential = Some("relay.example.org".to_string());

        let bootstrap = TlsBootstrap::from_settings(settings).unwrap();

        let server = bootstrap.server_context().unwrap();
        assert_eq!(
            server.default_credential().unwrap().hostname(),
            "relay.example.org"
        );
        assert!(bootstrap.client_context().default_credential().is_some());
        assert!(bootstrap.driver(Role::Server).is_some());
        assert!(bootstrap.policy(Role::Client).verification_required);
    }

    #[test]
    fn test_bootstrap_without_credentials() {
        let bootstrap = TlsBootstrap::from_settings(TlsSettings::default()).unwrap();

        assert!(bootstrap.server_context().is_none());
        assert!(bootstrap.driver(Role::Server).is_none());
        assert!(bootstrap.driver(Role::Client).is_some());
    }

    #[tokio::test]
    async fn test_start_handshake_feeds_gate() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = TlsSettings::default();
        settings.credentials.push(write_credential(dir.path(), "mx.example.org"));
        settings.verification.inbound_required = true;
        let bootstrap = TlsBootstrap::from_settings(settings).unwrap();

        let (mut gate, mut requests) = bootstrap.gate();
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let (server_io, client_io) = tokio::io::duplex(64 * 1024);

        let inbound = bootstrap
            .start_handshake(&mut gate, Role::Server, server_io, None, events_tx.clone())
            .unwrap();
        let outbound = bootstrap
            .start_handshake(
                &mut gate,
                Role::Client,
                client_io,
                Some("mx.example.org".to_string()),
                events_tx,
            )
            .unwrap();
        assert_eq!(gate.state(inbound), Some(SessionState::Handshaking));

        let mut applied = Vec::new();
        for _ in 0..2 {
            let event = events.recv().await.unwrap();
            applied.push(gate.handle(event).unwrap());
        }
        applied.sort_by_key(|(id, _)| *id);

        // The anonymous outbound client offers no certificate to the server.
        assert_eq!(applied[0], (inbound, SessionState::Rejected));
        // Outbound verification is required by default; the server's chain is queued.
        assert_eq!(applied[1], (outbound, SessionState::PendingVerification));
        assert_eq!(requests.recv().await.unwrap().session_id, outbound);
        assert_eq!(bootstrap.stats().snapshot().handshakes_succeeded, 2);
    }

    #[test]
    fn test_start_handshake_without_server_credential() {
        let bootstrap = TlsBootstrap::from_settings(TlsSettings::default()).unwrap();
        let (mut gate, _requests) = bootstrap.gate();
        let (events_tx, _events) = mpsc::unbounded_channel();
        let (io, _peer) = tokio::io::duplex(1024);

        let result = bootstrap.start_handshake(&mut gate, Role::Server, io, None, events_tx);
        assert!(matches!(result, Err(TlsError::NoCredential)));
        assert!(gate.is_empty());
    }

    #[test]
    fn test_unknown_client_credential() {
        let mut settings = TlsSettings::default();
        settings.client.credential = Some("relay.example.org".to_string());

        assert!(matches!(
            TlsBootstrap::from_settings(settings),
            Err(TlsError::UnknownCredential { .. })
        ));
    }
}
