//! TLS context construction for both directions of SMTP traffic.
//!
//! A context is built once per role at startup and shared read-only by every
//! connection of that role.

use std::sync::Arc;

use tokio_rustls::rustls::crypto::{aws_lc_rs, CryptoProvider};
use tokio_rustls::rustls::{ClientConfig, ServerConfig};
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::info;

use super::credential::{Credential, CredentialStore};
use super::error::{TlsError, TlsResult};
use super::sni::SniResolver;
use super::verifier::{DeferredClientVerifier, DeferredServerVerifier};

/// Which side of the connection the daemon plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Outbound relay; the daemon connects to a remote MX.
    Client,
    /// Inbound SMTP (STARTTLS or implicit TLS).
    Server,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Client => write!(f, "client"),
            Self::Server => write!(f, "server"),
        }
    }
}

/// Engine configuration for one role.
#[derive(Clone)]
enum EngineConfig {
    Client(Arc<ClientConfig>),
    Server(Arc<ServerConfig>),
}

/// A reusable, immutable TLS configuration for one role.
#[derive(Clone)]
pub struct TlsContext {
    /// Role this context was built for.
    role: Role,

    /// Credential presented when nothing more specific applies.
    default_credential: Option<Arc<Credential>>,

    /// Engine configuration.
    engine: EngineConfig,
}

impl std::fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsContext")
            .field("role", &self.role)
            .field(
                "default_credential",
                &self.default_credential.as_ref().map(|c| c.hostname()),
            )
            .finish()
    }
}

impl TlsContext {
    /// Get the role.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Get the default credential, if any.
    #[must_use]
    pub fn default_credential(&self) -> Option<&Arc<Credential>> {
        self.default_credential.as_ref()
    }

    /// Build an acceptor for inbound handshakes.
    ///
    /// Returns `None` for a client context.
    #[must_use]
    pub fn acceptor(&self) -> Option<TlsAcceptor> {
        match &self.engine {
            EngineConfig::Server(config) => Some(TlsAcceptor::from(Arc::clone(config))),
            EngineConfig::Client(_) => None,
        }
    }

    /// Build a connector for outbound handshakes.
    ///
    /// Returns `None` for a server context.
    #[must_use]
    pub fn connector(&self) -> Option<TlsConnector> {
        match &self.engine {
            EngineConfig::Client(config) => Some(TlsConnector::from(Arc::clone(config))),
            EngineConfig::Server(_) => None,
        }
    }
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(aws_lc_rs::default_provider())
}

fn context_error(e: impl std::fmt::Display) -> TlsError {
    TlsError::ContextError {
        message: e.to_string(),
    }
}

/// Build the context used when relaying mail to remote servers.
///
/// Without a credential the client is anonymous and offers no certificate.
/// With one, the credential is presented when the server asks for it.
///
/// # Errors
///
/// Returns an error if the TLS engine rejects the configuration.
pub fn build_client_context(default_credential: Option<Arc<Credential>>) -> TlsResult<TlsContext> {
    let provider = provider();

    let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .map_err(context_error)?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(DeferredServerVerifier::new(provider)));

    let config = match default_credential {
        Some(ref credential) => builder
            .with_client_auth_cert(
                credential.chain().to_vec(),
                credential.private_key().clone_key(),
            )
            .map_err(context_error)?,
        None => builder.with_no_client_auth(),
    };

    info!(
        credential = ?default_credential.as_ref().map(|c| c.hostname()),
        "Client TLS context built"
    );

    Ok(TlsContext {
        role: Role::Client,
        default_credential,
        engine: EngineConfig::Client(Arc::new(config)),
    })
}

/// Build the context used for inbound SMTP sessions.
///
/// The resolver swaps in a virtual host's credential when the client names
/// one; otherwise the default credential is used. Client certificates are
/// requested but never required, and any offered chain is accepted so it can
/// be verified out of band.
///
/// # Errors
///
/// Returns `NoCredential` without a default credential, or an error if the
/// TLS engine rejects the configuration.
pub fn build_server_context(
    default_credential: Option<Arc<Credential>>,
    store: Arc<CredentialStore>,
) -> TlsResult<TlsContext> {
    let default_credential = default_credential.ok_or(TlsError::NoCredential)?;
    let provider = provider();

    let resolver = SniResolver::new(Arc::clone(&default_credential), Arc::clone(&store));

    let config = ServerConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .map_err(context_error)?
        .with_client_cert_verifier(Arc::new(DeferredClientVerifier::new(provider)))
        .with_cert_resolver(Arc::new(resolver));

    info!(
        default = %default_credential.hostname(),
        virtual_hosts = store.len(),
        "Server TLS context built"
    );

    Ok(TlsContext {
        role: Role::Server,
        default_credential: Some(default_credential),
        engine: EngineConfig::Server(Arc::new(config)),
    })
}
