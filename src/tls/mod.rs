//! TLS bootstrap for inbound and outbound SMTP.
//!
//! This module provides:
//! - Credential loading with key/certificate consistency checks
//! - Client and server context construction
//! - SNI-based credential selection with a total fallback to the default
//! - Handshake driving that captures, but never judges, the peer chain

mod context;
mod credential;
mod error;
mod handshake;
mod sni;
mod stats;
mod verifier;

pub use context::{build_client_context, build_server_context, Role, TlsContext};
pub(crate) use credential::normalize;
pub use credential::{Credential, CredentialSource, CredentialStore};
pub use error::{TlsError, TlsResult};
pub use handshake::{
    Handshake, HandshakeDriver, SecureIo, SecureStream, DEFAULT_HANDSHAKE_TIMEOUT,
};
pub use sni::SniResolver;
pub use stats::{HandshakeStats, TlsStats};
pub use verifier::{DeferredClientVerifier, DeferredServerVerifier};

#[cfg(test)]
pub(crate) use credential::tests as test_support;
