//! Credential loading and the per-virtual-host credential store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use rustls_pemfile::{certs, private_key};
use tokio_rustls::rustls::crypto::aws_lc_rs::sign::any_supported_type;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::sign::CertifiedKey;
use tracing::{debug, info, warn};

use super::error::{TlsError, TlsResult};
use crate::config::CredentialConfig;

const PEM_MARKER: &[u8] = b"-----BEGIN";

/// Where credential material comes from.
#[derive(Debug, Clone)]
pub enum CredentialSource {
    /// Read the material from a file.
    Path(PathBuf),
    /// Material already held in memory.
    Bytes(Vec<u8>),
}

impl CredentialSource {
    fn read(&self) -> std::io::Result<Vec<u8>> {
        match self {
            Self::Path(path) => std::fs::read(path),
            Self::Bytes(bytes) => Ok(bytes.clone()),
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Path(path) => path.display().to_string(),
            Self::Bytes(bytes) => format!("<{} bytes>", bytes.len()),
        }
    }
}

impl From<&Path> for CredentialSource {
    fn from(path: &Path) -> Self {
        Self::Path(path.to_path_buf())
    }
}

impl From<Vec<u8>> for CredentialSource {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

/// A certificate chain and its private key for one virtual host.
///
/// Immutable once loaded. The key has already been checked against the
/// leaf certificate.
pub struct Credential {
    /// Virtual host identifier.
    hostname: String,

    /// Additional SNI names (exact or `*.` wildcard) served by this credential.
    aliases: Vec<String>,

    /// Certificate chain, leaf first.
    chain: Vec<CertificateDer<'static>>,

    /// Private key.
    private_key: PrivateKeyDer<'static>,

    /// Chain and signing key ready for the TLS engine.
    certified: Arc<CertifiedKey>,

    /// Leaf subject, for logging.
    subject: String,

    /// When the credential was loaded.
    loaded_at: Instant,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("hostname", &self.hostname)
            .field("aliases", &self.aliases)
            .field("chain_len", &self.chain.len())
            .field("subject", &self.subject)
            .finish()
    }
}

impl Credential {
    /// Parse and validate a credential from raw certificate and key bytes.
    ///
    /// Both inputs may be PEM or DER. The chain must parse as X.509, the key
    /// must be loadable by the TLS engine, and the key must match the public
    /// key of the leaf certificate.
    ///
    /// # Errors
    ///
    /// Returns `MalformedCertificate`, `MalformedKey` or `KeyMismatch`.
    pub fn from_bytes(hostname: &str, cert_chain: &[u8], private_key: &[u8]) -> TlsResult<Self> {
        let chain = parse_chain(hostname, cert_chain)?;
        let subject = leaf_subject(hostname, &chain)?;
        let private_key = parse_key(hostname, private_key)?;

        let signing_key = any_supported_type(&private_key).map_err(|e| TlsError::MalformedKey {
            hostname: hostname.to_string(),
            message: e.to_string(),
        })?;

        let certified = CertifiedKey::new(chain.clone(), signing_key);
        if let Err(e) = certified.keys_match() {
            debug!(hostname, error = %e, "Key consistency check failed");
            return Err(TlsError::KeyMismatch {
                hostname: hostname.to_string(),
            });
        }

        Ok(Self {
            hostname: normalize(hostname),
            aliases: Vec::new(),
            chain,
            private_key,
            certified: Arc::new(certified),
            subject,
            loaded_at: Instant::now(),
        })
    }

    /// Add SNI names served by this credential besides its hostname.
    #[must_use]
    pub fn with_aliases(mut self, aliases: &[String]) -> Self {
        self.aliases = aliases.iter().map(|a| normalize(a)).collect();
        self
    }

    /// Get the virtual host identifier.
    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Get the additional SNI names.
    #[must_use]
    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    /// Get the certificate chain, leaf first.
    #[must_use]
    pub fn chain(&self) -> &[CertificateDer<'static>] {
        &self.chain
    }

    /// Get the private key.
    #[must_use]
    pub fn private_key(&self) -> &PrivateKeyDer<'static> {
        &self.private_key
    }

    /// Get the chain and signing key in the form the TLS engine consumes.
    #[must_use]
    pub fn certified_key(&self) -> Arc<CertifiedKey> {
        Arc::clone(&self.certified)
    }

    /// Get the leaf certificate subject.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Get the time since the credential was loaded.
    #[must_use]
    pub fn age(&self) -> std::time::Duration {
        self.loaded_at.elapsed()
    }
}

fn parse_chain(hostname: &str, bytes: &[u8]) -> TlsResult<Vec<CertificateDer<'static>>> {
    let malformed = |message: String| TlsError::MalformedCertificate {
        hostname: hostname.to_string(),
        message,
    };

    let chain: Vec<CertificateDer<'static>> = if is_pem(bytes) {
        certs(&mut &bytes[..])
            .collect::<Result<_, _>>()
            .map_err(|e| malformed(e.to_string()))?
    } else {
        split_der(bytes).map_err(&malformed)?
    };

    if chain.is_empty() || chain.iter().any(|c| c.is_empty()) {
        return Err(malformed("no certificates found".to_string()));
    }

    for (index, cert) in chain.iter().enumerate() {
        let (rem, _) = x509_parser::parse_x509_certificate(cert.as_ref())
            .map_err(|e| malformed(format!("certificate {index}: {e}")))?;
        if !rem.is_empty() {
            return Err(malformed(format!(
                "certificate {index}: {} trailing bytes",
                rem.len()
            )));
        }
    }

    Ok(chain)
}

/// Split concatenated DER certificates, leaf first.
fn split_der(mut bytes: &[u8]) -> Result<Vec<CertificateDer<'static>>, String> {
    let mut chain = Vec::new();

    while !bytes.is_empty() {
        let (rem, _) = x509_parser::parse_x509_certificate(bytes)
            .map_err(|e| format!("certificate {}: {e}", chain.len()))?;
        let len = bytes.len() - rem.len();
        chain.push(CertificateDer::from(bytes[..len].to_vec()));
        bytes = rem;
    }

    Ok(chain)
}

fn leaf_subject(hostname: &str, chain: &[CertificateDer<'static>]) -> TlsResult<String> {
    let leaf = chain.first().ok_or_else(|| TlsError::MalformedCertificate {
        hostname: hostname.to_string(),
        message: "empty chain".to_string(),
    })?;
    let (_, parsed) = x509_parser::parse_x509_certificate(leaf.as_ref()).map_err(|e| {
        TlsError::MalformedCertificate {
            hostname: hostname.to_string(),
            message: e.to_string(),
        }
    })?;
    Ok(parsed.subject().to_string())
}

fn parse_key(hostname: &str, bytes: &[u8]) -> TlsResult<PrivateKeyDer<'static>> {
    let malformed = |message: String| TlsError::MalformedKey {
        hostname: hostname.to_string(),
        message,
    };

    if is_pem(bytes) {
        private_key(&mut &bytes[..])
            .map_err(|e| malformed(e.to_string()))?
            .ok_or_else(|| malformed("no private key found".to_string()))
    } else {
        PrivateKeyDer::try_from(bytes.to_vec()).map_err(|e| malformed(e.to_string()))
    }
}

fn is_pem(bytes: &[u8]) -> bool {
    bytes
        .windows(PEM_MARKER.len())
        .any(|window| window == PEM_MARKER)
}

/// Lowercase a hostname and strip any trailing root dot.
pub(crate) fn normalize(hostname: &str) -> String {
    hostname.trim_end_matches('.').to_ascii_lowercase()
}

/// Check if an SNI pattern matches a hostname.
///
/// `*.example.com` matches exactly one extra label.
fn pattern_matches(pattern: &str, hostname: &str) -> bool {
    if pattern == hostname {
        return true;
    }

    if let Some(suffix) = pattern.strip_prefix("*.") {
        if let Some(label) = hostname
            .strip_suffix(suffix)
            .and_then(|rest| rest.strip_suffix('.'))
        {
            return !label.is_empty() && !label.contains('.');
        }
    }

    false
}

/// In-memory credentials keyed by virtual host.
///
/// Populated once at startup and read-only afterwards; lookups need no lock.
#[derive(Debug, Default)]
pub struct CredentialStore {
    /// Loaded credentials in load order.
    credentials: Vec<Arc<Credential>>,

    /// Exact hostname to credential index.
    exact: HashMap<String, usize>,

    /// Wildcard patterns and their credential index.
    wildcards: Vec<(String, usize)>,

    /// Index of the default credential.
    default: Option<usize>,
}

impl CredentialStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and validate a credential, then register it for its hostname.
    ///
    /// The first credential loaded becomes the default.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails; nothing is stored in that case.
    pub fn load(
        &mut self,
        hostname: &str,
        cert_chain: &[u8],
        private_key: &[u8],
    ) -> TlsResult<Arc<Credential>> {
        let credential = Credential::from_bytes(hostname, cert_chain, private_key)?;
        Ok(self.insert(credential))
    }

    /// Load a credential from files or in-memory bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be read or validation fails.
    pub fn load_credential(
        &mut self,
        hostname: &str,
        cert: CredentialSource,
        key: CredentialSource,
    ) -> TlsResult<Arc<Credential>> {
        let cert_bytes = cert.read().map_err(|e| TlsError::MalformedCertificate {
            hostname: hostname.to_string(),
            message: format!("{}: {e}", cert.describe()),
        })?;
        let key_bytes = key.read().map_err(|e| TlsError::MalformedKey {
            hostname: hostname.to_string(),
            message: format!("{}: {e}", key.describe()),
        })?;

        self.load(hostname, &cert_bytes, &key_bytes)
    }

    /// Load every configured credential.
    ///
    /// # Errors
    ///
    /// Returns the first load failure.
    pub fn load_all(configs: &[CredentialConfig]) -> TlsResult<Self> {
        let mut store = Self::new();

        for config in configs {
            info!(
                hostname = %config.hostname,
                cert_path = %config.cert_path.display(),
                "Loading credential"
            );

            let mut cert_bytes =
                CredentialSource::Path(config.cert_path.clone())
                    .read()
                    .map_err(|e| TlsError::MalformedCertificate {
                        hostname: config.hostname.clone(),
                        message: format!("{}: {e}", config.cert_path.display()),
                    })?;

            if let Some(ref chain_path) = config.chain_path {
                let chain_bytes = std::fs::read(chain_path).map_err(|e| {
                    TlsError::MalformedCertificate {
                        hostname: config.hostname.clone(),
                        message: format!("{}: {e}", chain_path.display()),
                    }
                })?;
                cert_bytes.push(b'\n');
                cert_bytes.extend_from_slice(&chain_bytes);
            }

            let key_bytes = std::fs::read(&config.key_path).map_err(|e| TlsError::MalformedKey {
                hostname: config.hostname.clone(),
                message: format!("{}: {e}", config.key_path.display()),
            })?;

            let credential = Credential::from_bytes(&config.hostname, &cert_bytes, &key_bytes)?
                .with_aliases(&config.aliases);
            store.insert(credential);
        }

        Ok(store)
    }

    /// Register an already validated credential.
    pub fn insert(&mut self, credential: Credential) -> Arc<Credential> {
        let index = self.credentials.len();
        let names = std::iter::once(credential.hostname.clone()).chain(credential.aliases.clone());

        for name in names {
            if name.starts_with("*.") {
                self.wildcards.push((name, index));
            } else if self.exact.insert(name.clone(), index).is_some() {
                warn!(hostname = %name, "Credential replaces an earlier one for the same name");
            }
        }

        debug!(
            hostname = %credential.hostname,
            subject = %credential.subject,
            chain_len = credential.chain.len(),
            "Credential registered"
        );

        let credential = Arc::new(credential);
        self.credentials.push(Arc::clone(&credential));
        if self.default.is_none() {
            self.default = Some(index);
        }
        credential
    }

    /// Make the credential for `hostname` the default.
    ///
    /// # Errors
    ///
    /// Returns `UnknownCredential` if no credential was loaded for that hostname.
    pub fn set_default(&mut self, hostname: &str) -> TlsResult<()> {
        let index = *self
            .exact
            .get(&normalize(hostname))
            .ok_or_else(|| TlsError::UnknownCredential {
                name: hostname.to_string(),
            })?;
        self.default = Some(index);
        Ok(())
    }

    /// Get the credential loaded for exactly this hostname.
    #[must_use]
    pub fn get(&self, hostname: &str) -> Option<Arc<Credential>> {
        self.exact
            .get(&normalize(hostname))
            .map(|&i| Arc::clone(&self.credentials[i]))
    }

    /// Find the credential serving a hostname, by exact name or wildcard.
    #[must_use]
    pub fn matching(&self, hostname: &str) -> Option<Arc<Credential>> {
        let hostname = normalize(hostname);

        if let Some(&index) = self.exact.get(&hostname) {
            return Some(Arc::clone(&self.credentials[index]));
        }

        self.wildcards
            .iter()
            .find(|(pattern, _)| pattern_matches(pattern, &hostname))
            .map(|(_, index)| Arc::clone(&self.credentials[*index]))
    }

    /// Find the credential for a hostname, falling back to the default.
    ///
    /// Only returns `None` when the store is empty.
    #[must_use]
    pub fn lookup(&self, hostname: &str) -> Option<Arc<Credential>> {
        self.matching(hostname).or_else(|| self.default_credential())
    }

    /// Get the default credential.
    #[must_use]
    pub fn default_credential(&self) -> Option<Arc<Credential>> {
        self.default.map(|i| Arc::clone(&self.credentials[i]))
    }

    /// Get all loaded hostnames.
    #[must_use]
    pub fn hostnames(&self) -> Vec<&str> {
        self.credentials.iter().map(|c| c.hostname()).collect()
    }

    /// Get the number of credentials.
    #[must_use]
    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    /// Check if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }
}
