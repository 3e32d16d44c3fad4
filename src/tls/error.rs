//! TLS bootstrap error types.

use thiserror::Error;

/// Errors raised while loading credentials, building contexts, or driving handshakes.
#[derive(Debug, Error)]
pub enum TlsError {
    /// The certificate chain could not be read or parsed.
    #[error("malformed certificate for '{hostname}': {message}")]
    MalformedCertificate {
        /// The virtual host the credential was loaded for.
        hostname: String,
        /// Error message.
        message: String,
    },

    /// The private key could not be read or parsed.
    #[error("malformed private key for '{hostname}': {message}")]
    MalformedKey {
        /// The virtual host the credential was loaded for.
        hostname: String,
        /// Error message.
        message: String,
    },

    /// The private key does not belong to the leaf certificate.
    #[error("private key does not match certificate for '{hostname}'")]
    KeyMismatch {
        /// The virtual host the credential was loaded for.
        hostname: String,
    },

    /// A server context was requested without any credential.
    #[error("server context requires a default credential")]
    NoCredential,

    /// A credential name was referenced but never loaded.
    #[error("no credential named '{name}'")]
    UnknownCredential {
        /// The requested credential name.
        name: String,
    },

    /// The TLS engine rejected the context configuration.
    #[error("failed to build TLS context: {message}")]
    ContextError {
        /// Error message.
        message: String,
    },

    /// TLS negotiation failed; no session exists for the connection.
    #[error("TLS handshake failed: {reason}")]
    HandshakeFailed {
        /// Why the handshake failed.
        reason: String,
    },
}

impl TlsError {
    /// Shorthand for a handshake failure.
    pub(crate) fn handshake(reason: impl Into<String>) -> Self {
        Self::HandshakeFailed {
            reason: reason.into(),
        }
    }
}

/// Result type alias for TLS bootstrap operations.
pub type TlsResult<T> = Result<T, TlsError>;
