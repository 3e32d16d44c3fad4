//! Integration tests for credential selection and handshake driving.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{client_driver, credential, handshake_pair, server_driver, store};
use smtpd_tls::tls::{HandshakeStats, Role, TlsError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[tokio::test]
async fn test_sni_selects_registered_credential() {
    let store = store(&["mx.example.org", "mail.example.net"]);
    let server = server_driver(&store);
    let client = client_driver(None);

    let (server_side, client_side) = handshake_pair(&server, &client, "mail.example.net").await;
    let server_side = server_side.unwrap();
    let client_side = client_side.unwrap();

    assert_eq!(server_side.server_name(), Some("mail.example.net"));
    let served = store.get("mail.example.net").unwrap();
    assert_eq!(client_side.peer_chain().unwrap()[0], served.chain()[0]);
}

#[tokio::test]
async fn test_sni_unknown_name_gets_default() {
    let store = store(&["mx.example.org", "mail.example.net"]);
    let server = server_driver(&store);
    let client = client_driver(None);

    let (server_side, client_side) = handshake_pair(&server, &client, "other.example.com").await;
    assert!(server_side.is_ok());

    let default = store.default_credential().unwrap();
    assert_eq!(default.hostname(), "mx.example.org");
    assert_eq!(client_side.unwrap().peer_chain().unwrap()[0], default.chain()[0]);
}

#[tokio::test]
async fn test_missing_sni_gets_default() {
    let store = store(&["mx.example.org", "mail.example.net"]);
    let server = server_driver(&store);
    let client = client_driver(None);

    // IP literals are never sent as SNI.
    let (server_side, client_side) = handshake_pair(&server, &client, "192.0.2.25").await;
    assert_eq!(server_side.unwrap().server_name(), None);

    let default = store.default_credential().unwrap();
    assert_eq!(client_side.unwrap().peer_chain().unwrap()[0], default.chain()[0]);
}

#[tokio::test]
async fn test_client_certificate_captured_not_judged() {
    let store = store(&["mx.example.org"]);
    let server = server_driver(&store);
    let relay = credential("relay.example.com");
    let relay_leaf = relay.chain()[0].clone();
    let client = client_driver(Some(relay));

    let (server_side, client_side) = handshake_pair(&server, &client, "mx.example.org").await;
    let server_side = server_side.unwrap();

    assert_eq!(server_side.role(), Role::Server);
    assert_eq!(server_side.peer_chain().unwrap()[0], relay_leaf);
    assert!(server_side.protocol().is_some());
    assert!(server_side.cipher_suite().is_some());
    assert_eq!(client_side.unwrap().role(), Role::Client);
}

#[tokio::test]
async fn test_anonymous_client_offers_no_chain() {
    let store = store(&["mx.example.org"]);
    let server = server_driver(&store);
    let client = client_driver(None);

    let (server_side, _client_side) = handshake_pair(&server, &client, "mx.example.org").await;
    assert!(server_side.unwrap().peer_chain().is_none());
}

#[tokio::test]
async fn test_streams_carry_data_after_handshake() {
    let store = store(&["mx.example.org"]);
    let server = server_driver(&store);
    let client = client_driver(None);

    let (server_side, client_side) = handshake_pair(&server, &client, "mx.example.org").await;
    let (mut server_stream, _) = server_side.unwrap().into_parts();
    let (mut client_stream, _) = client_side.unwrap().into_parts();

    server_stream.write_all(b"220 mx.example.org ESMTP\r\n").await.unwrap();
    server_stream.flush().await.unwrap();

    let mut buf = [0u8; 64];
    let n = client_stream.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"220 mx.example.org ESMTP\r\n");
}

#[tokio::test]
async fn test_garbage_fails_handshake() {
    let store = store(&["mx.example.org"]);
    let stats = Arc::new(HandshakeStats::new());
    let server = server_driver(&store).with_stats(Arc::clone(&stats));

    let (server_io, mut peer) = tokio::io::duplex(1024);
    peer.write_all(b"EHLO client.example.com\r\n").await.unwrap();

    let result = server.begin_handshake(server_io, None).await;
    assert!(matches!(result, Err(TlsError::HandshakeFailed { .. })));

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.handshakes_failed, 1);
    assert_eq!(snapshot.handshakes_succeeded, 0);
}

#[tokio::test]
async fn test_peer_disconnect_fails_handshake() {
    let store = store(&["mx.example.org"]);
    let server = server_driver(&store);

    let (server_io, peer) = tokio::io::duplex(1024);
    drop(peer);

    let result = server.begin_handshake(server_io, None).await;
    assert!(matches!(result, Err(TlsError::HandshakeFailed { .. })));
}

#[tokio::test]
async fn test_handshake_timeout() {
    let store = store(&["mx.example.org"]);
    let server = server_driver(&store).with_timeout(Duration::from_millis(50));

    let (server_io, _silent_peer) = tokio::io::duplex(1024);

    match server.begin_handshake(server_io, None).await {
        Err(TlsError::HandshakeFailed { reason }) => assert_eq!(reason, "handshake timed out"),
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn test_outbound_requires_server_name() {
    let client = client_driver(None);
    let (client_io, _peer) = tokio::io::duplex(1024);

    let result = client.begin_handshake(client_io, None).await;
    assert!(matches!(result, Err(TlsError::HandshakeFailed { .. })));
}

#[tokio::test]
async fn test_stats_count_successes() {
    let store = store(&["mx.example.org"]);
    let stats = Arc::new(HandshakeStats::new());
    let server = server_driver(&store).with_stats(Arc::clone(&stats));
    let client = client_driver(None).with_stats(Arc::clone(&stats));

    let (server_side, client_side) = handshake_pair(&server, &client, "mx.example.org").await;
    assert!(server_side.is_ok() && client_side.is_ok());

    assert_eq!(stats.snapshot().handshakes_succeeded, 2);
}
