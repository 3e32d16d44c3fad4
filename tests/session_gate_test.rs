//! Integration tests for gating sessions on trust authority verdicts.

mod common;

use std::time::{Duration, Instant};

use common::{client_driver, credential, handshake_pair, server_driver, store};
use smtpd_tls::session::{
    GateEvent, RejectReason, SessionError, SessionGate, SessionPolicy, SessionState,
};
use smtpd_tls::tls::Role;
use smtpd_tls::verification::{VerificationBroker, VerificationVerdict};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[tokio::test]
async fn test_rejected_peer_never_sees_application_data() {
    let store = store(&["mx.example.org"]);
    let server = server_driver(&store);
    let client = client_driver(Some(credential("relay.example.com")));

    let (server_side, client_side) = handshake_pair(&server, &client, "mx.example.org").await;
    let (mut client_stream, _) = client_side.unwrap().into_parts();

    let (broker, mut requests) = VerificationBroker::new();
    let mut gate = SessionGate::new(broker);

    let (id, state) = gate
        .admit(server_side.unwrap(), SessionPolicy::verified())
        .unwrap();
    assert_eq!(state, SessionState::PendingVerification);

    let request = requests.recv().await.unwrap();
    assert_eq!(request.session_id, id);
    assert_eq!(request.certificate_chain.len(), 1);

    let applied = gate.on_verdict(VerificationVerdict::reject(
        request.correlation_id,
        "certificate not trusted",
    ));
    assert_eq!(applied, Some((id, SessionState::Rejected)));

    match gate.take_stream(id) {
        Err(SessionError::SessionRejected { reason, .. }) => {
            assert_eq!(
                reason,
                RejectReason::Authority("certificate not trusted".to_string())
            );
        },
        Err(other) => panic!("expected SessionRejected, got {other:?}"),
        Ok(_) => panic!("rejected session handed out its stream"),
    }

    gate.shutdown(id).unwrap().await;
    assert_eq!(gate.state(id), None);

    // The peer only sees close_notify, never a byte of SMTP.
    let mut buf = [0u8; 64];
    let n = client_stream.read(&mut buf).await.unwrap_or(0);
    assert_eq!(n, 0);
}

#[tokio::test]
async fn test_accepted_peer_exchanges_data() {
    let store = store(&["mx.example.org"]);
    let server = server_driver(&store);
    let client = client_driver(Some(credential("relay.example.com")));

    let (server_side, client_side) = handshake_pair(&server, &client, "mx.example.org").await;
    let (mut client_stream, _) = client_side.unwrap().into_parts();

    let (broker, mut requests) = VerificationBroker::new();
    let mut gate = SessionGate::new(broker);

    let (id, _) = gate
        .admit(server_side.unwrap(), SessionPolicy::verified())
        .unwrap();

    assert!(matches!(
        gate.take_stream(id),
        Err(SessionError::SessionNotReady {
            state: SessionState::PendingVerification,
            ..
        })
    ));

    let request = requests.recv().await.unwrap();
    gate.on_verdict(VerificationVerdict::accept(request.correlation_id));
    assert_eq!(gate.state(id), Some(SessionState::Trusted));

    let mut server_stream = gate.take_stream(id).unwrap();
    server_stream.write_all(b"220 ready\r\n").await.unwrap();
    server_stream.flush().await.unwrap();

    let mut buf = [0u8; 64];
    let n = client_stream.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"220 ready\r\n");

    client_stream.write_all(b"EHLO relay\r\n").await.unwrap();
    client_stream.flush().await.unwrap();
    let n = server_stream.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"EHLO relay\r\n");
}

#[tokio::test]
async fn test_anonymous_peer_rejected_when_verification_required() {
    let store = store(&["mx.example.org"]);
    let server = server_driver(&store);
    let client = client_driver(None);

    let (server_side, _client_side) = handshake_pair(&server, &client, "mx.example.org").await;

    let (broker, mut requests) = VerificationBroker::new();
    let mut gate = SessionGate::new(broker);

    let (id, state) = gate
        .admit(server_side.unwrap(), SessionPolicy::verified())
        .unwrap();

    assert_eq!(state, SessionState::Rejected);
    assert_eq!(
        gate.session(id).unwrap().rejection(),
        Some(&RejectReason::MissingPeerCertificate)
    );
    assert!(requests.try_recv().is_err());
}

#[tokio::test]
async fn test_unverified_policy_trusts_on_handshake() {
    let store = store(&["mx.example.org"]);
    let server = server_driver(&store);
    let client = client_driver(None);

    let (server_side, _client_side) = handshake_pair(&server, &client, "mx.example.org").await;

    let (broker, _requests) = VerificationBroker::new();
    let mut gate = SessionGate::new(broker);

    let (_, state) = gate
        .admit(server_side.unwrap(), SessionPolicy::unverified())
        .unwrap();
    assert_eq!(state, SessionState::Trusted);
}

#[tokio::test]
async fn test_out_of_order_verdicts_reach_their_sessions() {
    let store = store(&["mx.example.org"]);
    let server = server_driver(&store);

    let (broker, mut requests) = VerificationBroker::new();
    let mut gate = SessionGate::new(broker);

    let mut sessions = Vec::new();
    for i in 0..4 {
        let client = client_driver(Some(credential(&format!("relay{i}.example.com"))));
        let (server_side, client_side) = handshake_pair(&server, &client, "mx.example.org").await;
        let (id, _) = gate
            .admit(server_side.unwrap(), SessionPolicy::verified())
            .unwrap();
        sessions.push((id, client_side.unwrap()));
    }

    let mut pending = Vec::new();
    for _ in 0..4 {
        pending.push(requests.recv().await.unwrap());
    }

    // Answer in reverse; reject odd sessions.
    for request in pending.iter().rev() {
        let index = sessions
            .iter()
            .position(|(id, _)| *id == request.session_id)
            .unwrap();
        let verdict = if index % 2 == 0 {
            VerificationVerdict::accept(request.correlation_id)
        } else {
            VerificationVerdict::reject(request.correlation_id, "unknown issuer")
        };
        gate.handle(GateEvent::Verdict(verdict));
    }

    for (index, (id, _)) in sessions.iter().enumerate() {
        let expected = if index % 2 == 0 {
            SessionState::Trusted
        } else {
            SessionState::Rejected
        };
        assert_eq!(gate.state(*id), Some(expected));
    }
}

#[tokio::test]
async fn test_late_verdict_after_close_is_dropped() {
    let store = store(&["mx.example.org"]);
    let server = server_driver(&store);
    let client = client_driver(Some(credential("relay.example.com")));

    let (server_side, _client_side) = handshake_pair(&server, &client, "mx.example.org").await;

    let (broker, mut requests) = VerificationBroker::new();
    let mut gate = SessionGate::new(broker);
    let (id, _) = gate
        .admit(server_side.unwrap(), SessionPolicy::verified())
        .unwrap();
    let request = requests.recv().await.unwrap();

    assert_eq!(gate.handle(GateEvent::Closed(id)), Some((id, SessionState::Closed)));
    assert_eq!(
        gate.handle(GateEvent::Verdict(VerificationVerdict::accept(
            request.correlation_id
        ))),
        None
    );

    assert!(matches!(
        gate.take_stream(id),
        Err(SessionError::SessionClosed { .. })
    ));
    assert_eq!(gate.stats().snapshot().sessions_trusted, 0);
}

#[tokio::test]
async fn test_handshake_events_from_tasks() {
    let store = store(&["mx.example.org"]);
    let server = server_driver(&store);
    let client = client_driver(Some(credential("relay.example.com")));

    let (broker, mut requests) = VerificationBroker::new();
    let mut gate = SessionGate::new(broker);
    let id = gate.open(Role::Server, SessionPolicy::verified());
    assert_eq!(gate.state(id), Some(SessionState::Handshaking));

    let (events_tx, mut events) = tokio::sync::mpsc::unbounded_channel();
    let (server_io, client_io) = tokio::io::duplex(64 * 1024);

    tokio::spawn(async move {
        let result = server.begin_handshake(server_io, None).await;
        let _ = events_tx.send(GateEvent::HandshakeFinished {
            session: id,
            result,
        });
    });
    let client_task =
        tokio::spawn(async move { client.begin_handshake(client_io, Some("mx.example.org")).await });

    let event = events.recv().await.unwrap();
    assert_eq!(
        gate.handle(event),
        Some((id, SessionState::PendingVerification))
    );
    assert!(client_task.await.unwrap().is_ok());
    assert_eq!(requests.recv().await.unwrap().session_id, id);
}

#[tokio::test]
async fn test_verification_timeout_rejects_session() {
    let store = store(&["mx.example.org"]);
    let server = server_driver(&store);
    let client = client_driver(Some(credential("relay.example.com")));

    let (server_side, _client_side) = handshake_pair(&server, &client, "mx.example.org").await;

    let (broker, mut requests) = VerificationBroker::new();
    let mut gate = SessionGate::new(broker);
    let policy = SessionPolicy::verified().with_timeout(Duration::from_secs(30));
    let (id, _) = gate.admit(server_side.unwrap(), policy).unwrap();
    let request = requests.recv().await.unwrap();

    assert!(gate.expire_stale(Instant::now()).is_empty());
    let expired = gate.expire_stale(Instant::now() + Duration::from_secs(31));
    assert_eq!(expired, vec![id]);
    assert_eq!(gate.session(id).unwrap().rejection(), Some(&RejectReason::Timeout));

    // The verdict arrives after the session gave up.
    assert_eq!(
        gate.on_verdict(VerificationVerdict::accept(request.correlation_id)),
        None
    );
    assert_eq!(gate.state(id), Some(SessionState::Rejected));
}
