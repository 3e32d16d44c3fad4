//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use smtpd_tls::tls::{
    build_client_context, build_server_context, Credential, CredentialStore, Handshake,
    HandshakeDriver, TlsResult,
};

/// Generate a self-signed certificate and key as PEM.
pub fn self_signed(hostname: &str) -> (String, String) {
    let generated = rcgen::generate_simple_self_signed(vec![hostname.to_string()]).unwrap();
    (generated.cert.pem(), generated.key_pair.serialize_pem())
}

/// Build a credential for a hostname.
pub fn credential(hostname: &str) -> Credential {
    let (cert, key) = self_signed(hostname);
    Credential::from_bytes(hostname, cert.as_bytes(), key.as_bytes()).unwrap()
}

/// Load a store serving each hostname; the first is the default.
pub fn store(hostnames: &[&str]) -> Arc<CredentialStore> {
    let mut store = CredentialStore::new();
    for hostname in hostnames {
        store.insert(credential(hostname));
    }
    Arc::new(store)
}

/// Driver for inbound sessions backed by `store`.
pub fn server_driver(store: &Arc<CredentialStore>) -> HandshakeDriver {
    let context = build_server_context(store.default_credential(), Arc::clone(store)).unwrap();
    HandshakeDriver::new(Arc::new(context))
}

/// Driver for outbound sessions, optionally presenting a client certificate.
pub fn client_driver(credential: Option<Credential>) -> HandshakeDriver {
    let context = build_client_context(credential.map(Arc::new)).unwrap();
    HandshakeDriver::new(Arc::new(context))
}

/// Run both sides of a handshake over an in-memory pipe.
pub async fn handshake_pair(
    server: &HandshakeDriver,
    client: &HandshakeDriver,
    server_name: &str,
) -> (TlsResult<Handshake>, TlsResult<Handshake>) {
    let (server_io, client_io) = tokio::io::duplex(64 * 1024);

    tokio::join!(
        server.begin_handshake(server_io, None),
        client.begin_handshake(client_io, Some(server_name)),
    )
}
