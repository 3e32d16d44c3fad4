//! Server-name based credential selection.

use std::sync::Arc;

use tokio_rustls::rustls::server::{ClientHello, ResolvesServerCert};
use tokio_rustls::rustls::sign::CertifiedKey;
use tracing::{debug, trace};

use super::credential::{Credential, CredentialStore};

/// Picks the credential for a handshake from the client's requested name.
///
/// Resolution is total: an unknown name or a missing SNI extension selects
/// the default credential, so a lookup miss never fails the handshake.
pub struct SniResolver {
    /// Credential used when the client asks for nothing we serve.
    default: Arc<Credential>,

    /// Virtual-host credentials.
    store: Arc<CredentialStore>,
}

impl std::fmt::Debug for SniResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SniResolver")
            .field("default", &self.default.hostname())
            .field("hostnames", &self.store.hostnames())
            .finish()
    }
}

impl SniResolver {
    /// Create a resolver over a store with an explicit default.
    #[must_use]
    pub fn new(default: Arc<Credential>, store: Arc<CredentialStore>) -> Self {
        Self { default, store }
    }

    /// Get the default credential.
    #[must_use]
    pub fn default_credential(&self) -> &Arc<Credential> {
        &self.default
    }

    /// Resolve an optional server name to a credential.
    #[must_use]
    pub fn resolve_name(&self, server_name: Option<&str>) -> Arc<Credential> {
        let Some(name) = server_name else {
            trace!("No SNI offered, using default credential");
            return Arc::clone(&self.default);
        };

        match self.store.matching(name) {
            Some(credential) => credential,
            None => {
                debug!(sni = %name, default = %self.default.hostname(), "No credential for SNI, using default");
                Arc::clone(&self.default)
            },
        }
    }
}

impl ResolvesServerCert for SniResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        Some(self.resolve_name(client_hello.server_name()).certified_key())
    }
}
