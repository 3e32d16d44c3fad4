//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::session::SessionPolicy;
use crate::tls::Role;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TlsSettings {
    /// Credentials to load at startup.
    pub credentials: Vec<CredentialConfig>,

    /// Inbound (server role) settings.
    pub server: ServerSection,

    /// Outbound (client role) settings.
    pub client: ClientSection,

    /// Peer verification policy.
    pub verification: VerificationSection,

    /// Handshake limits.
    pub handshake: HandshakeSection,

    /// Trust authority connection.
    pub authority: AuthoritySection,
}

impl TlsSettings {
    /// Build the session policy for a role.
    #[must_use]
    pub fn session_policy(&self, role: Role) -> SessionPolicy {
        let required = match role {
            Role::Server => self.verification.inbound_required,
            Role::Client => self.verification.outbound_required,
        };

        let policy = if required {
            SessionPolicy::verified()
        } else {
            SessionPolicy::unverified()
        };

        match self.verification.timeout() {
            Some(timeout) => policy.with_timeout(timeout),
            None => policy,
        }
    }
}

/// A certificate and key pair served for a hostname.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialConfig {
    /// Hostname the credential is registered for. Also its identifier.
    pub hostname: String,

    /// Certificate (leaf first), PEM or DER.
    pub cert_path: PathBuf,

    /// Private key, PEM or DER.
    pub key_path: PathBuf,

    /// Optional intermediates appended to the certificate chain.
    #[serde(default)]
    pub chain_path: Option<PathBuf>,

    /// Additional SNI names (exact or `*.` wildcard).
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl CredentialConfig {
    /// Create a credential entry.
    pub fn new(
        hostname: impl Into<String>,
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            cert_path: cert_path.into(),
            key_path: key_path.into(),
            chain_path: None,
            aliases: Vec::new(),
        }
    }

    /// Set the intermediate chain file.
    #[must_use]
    pub fn with_chain(mut self, chain_path: impl Into<PathBuf>) -> Self {
        self.chain_path = Some(chain_path.into());
        self
    }

    /// Add an SNI alias.
    #[must_use]
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }
}

/// Server role settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServerSection {
    /// Hostname of the default credential. The first credential otherwise.
    pub default_credential: Option<String>,
}

/// Client role settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ClientSection {
    /// Hostname of the credential presented to remote servers.
    pub credential: Option<String>,
}

/// Peer verification policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationSection {
    /// Require a trust verdict for inbound sessions.
    pub inbound_required: bool,

    /// Require a trust verdict for outbound sessions.
    pub outbound_required: bool,

    /// Reject pending sessions after this many seconds. Absent disables it.
    pub timeout_secs: Option<u64>,
}

impl VerificationSection {
    /// Get the verification timeout.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

impl Default for VerificationSection {
    fn default() -> Self {
        Self {
            inbound_required: false,
            outbound_required: true,
            timeout_secs: None,
        }
    }
}

/// Handshake limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakeSection {
    /// Abort handshakes that take longer than this many seconds.
    pub timeout_secs: u64,
}

impl HandshakeSection {
    /// Get the handshake timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for HandshakeSection {
    fn default() -> Self {
        Self { timeout_secs: 10 }
    }
}

/// Trust authority connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthoritySection {
    /// Unix socket the authority listens on.
    pub socket_path: PathBuf,
}

impl Default for AuthoritySection {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/var/run/smtpd/authority.sock"),
        }
    }
}
