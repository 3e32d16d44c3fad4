//! The session gate: holds sessions half-open until their peer is trusted.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tokio::io::AsyncWriteExt;
use tokio_rustls::rustls::pki_types::CertificateDer;
use tracing::{debug, info, warn};

use super::error::{SessionError, SessionResult};
use super::state::{Phase, RejectReason, Session, SessionId, SessionPolicy, SessionState};
use crate::tls::{Handshake, HandshakeStats, Role, SecureStream, TlsResult};
use crate::verification::{
    BrokerError, CorrelationId, VerdictOutcome, VerificationBroker, VerificationVerdict,
};

/// Something that moves a session through its lifecycle.
#[derive(Debug)]
pub enum GateEvent {
    /// A handshake task finished.
    HandshakeFinished {
        /// Session opened for the connection.
        session: SessionId,
        /// Outcome of the handshake.
        result: TlsResult<Handshake>,
    },
    /// The trust authority answered.
    Verdict(VerificationVerdict),
    /// The connection was closed by the peer or by local policy.
    Closed(SessionId),
}

/// Owns every session and decides when application data may flow.
///
/// Mutated by a single owner; producers on other tasks send [`GateEvent`]s
/// through a channel instead of touching the table. The gate never awaits
/// socket I/O: a TRUSTED session's stream is handed out with
/// [`SessionGate::take_stream`] and driven by its own task.
#[derive(Debug)]
pub struct SessionGate {
    /// Next session id to issue.
    next_id: u64,

    /// Live sessions.
    sessions: HashMap<SessionId, Session>,

    /// Verification requests in flight.
    broker: VerificationBroker,

    /// Counters.
    stats: Arc<HandshakeStats>,
}

impl SessionGate {
    /// Create a gate around a broker.
    #[must_use]
    pub fn new(broker: VerificationBroker) -> Self {
        Self {
            next_id: 1,
            sessions: HashMap::new(),
            broker,
            stats: Arc::new(HandshakeStats::new()),
        }
    }

    /// Share counters with the handshake drivers.
    #[must_use]
    pub fn with_stats(mut self, stats: Arc<HandshakeStats>) -> Self {
        self.stats = stats;
        self
    }

    /// Open a session for a connection about to negotiate TLS.
    pub fn open(&mut self, role: Role, policy: SessionPolicy) -> SessionId {
        let id = SessionId(self.next_id);
        self.next_id += 1;

        self.sessions.insert(id, Session::new(id, role, policy));
        debug!(session = %id, role = %role, "Session opened");
        id
    }

    /// Open a session for a handshake that already completed.
    ///
    /// # Errors
    ///
    /// See [`SessionGate::complete_handshake`].
    pub fn admit(
        &mut self,
        handshake: Handshake,
        policy: SessionPolicy,
    ) -> SessionResult<(SessionId, SessionState)> {
        let id = self.open(handshake.role(), policy);
        let state = self.complete_handshake(id, Ok(handshake))?;
        Ok((id, state))
    }

    /// Apply the outcome of a session's handshake.
    ///
    /// On success the session moves to PENDING_VERIFICATION (chain captured
    /// and verification required), TRUSTED (verification not required), or
    /// REJECTED (verification required but nothing to verify, or the
    /// authority is unreachable). On failure the session is removed.
    ///
    /// # Errors
    ///
    /// Returns `Handshake` if the handshake failed, `SessionClosed` if the
    /// session no longer exists, or `InvalidTransition` if it already
    /// completed a handshake.
    pub fn complete_handshake(
        &mut self,
        id: SessionId,
        result: TlsResult<Handshake>,
    ) -> SessionResult<SessionState> {
        let state = self.state(id).ok_or(SessionError::SessionClosed { id })?;
        if state != SessionState::Handshaking {
            return Err(SessionError::InvalidTransition {
                id,
                state,
                event: "complete a handshake",
            });
        }

        match result {
            Ok(handshake) => {
                let server_name = handshake.server_name().map(str::to_string);
                let (stream, chain) = handshake.into_parts();
                self.settle(id, stream, chain, server_name)
            },
            Err(source) => {
                self.sessions.remove(&id);
                debug!(session = %id, error = %source, "Session dropped after failed handshake");
                Err(SessionError::Handshake { id, source })
            },
        }
    }

    fn settle(
        &mut self,
        id: SessionId,
        stream: SecureStream,
        chain: Option<Vec<CertificateDer<'static>>>,
        server_name: Option<String>,
    ) -> SessionResult<SessionState> {
        let session = self
            .sessions
            .get_mut(&id)
            .ok_or(SessionError::SessionClosed { id })?;

        session.stream = Some(stream);
        session.server_name = server_name;
        session.peer_chain = chain.clone();

        if !session.policy.verification_required {
            return Ok(self.trust(id));
        }

        let Some(chain) = chain else {
            return Ok(self.reject(id, RejectReason::MissingPeerCertificate));
        };

        let correlation_id = match self.broker.submit(id, chain) {
            Ok(request) => request.correlation_id,
            Err(BrokerError::AuthorityUnavailable) => {
                return Ok(self.reject(id, RejectReason::AuthorityUnavailable));
            },
            Err(e @ BrokerError::AlreadyPending { correlation_id, .. }) => {
                warn!(session = %id, error = %e, "Adopting outstanding verification request");
                correlation_id
            },
        };

        if let Some(session) = self.sessions.get_mut(&id) {
            session.phase = Phase::PendingVerification(correlation_id);
        }
        debug!(
            session = %id,
            correlation_id = %correlation_id,
            "Session awaiting verification"
        );
        Ok(SessionState::PendingVerification)
    }

    /// Apply a verdict from the trust authority.
    ///
    /// A verdict whose session is gone (closed, timed out) or that was
    /// already consumed is dropped silently. Returns the session and its new
    /// state when the verdict was applied.
    pub fn on_verdict(&mut self, verdict: VerificationVerdict) -> Option<(SessionId, SessionState)> {
        let (id, outcome) = self.broker.on_verdict_received(verdict)?;

        match self.state(id) {
            Some(SessionState::PendingVerification) => {},
            other => {
                debug!(session = %id, state = ?other, "Verdict for session no longer pending");
                return None;
            },
        }

        let state = match outcome {
            VerdictOutcome::Accept => self.trust(id),
            VerdictOutcome::Reject(reason) => self.reject(id, RejectReason::Authority(reason)),
        };
        Some((id, state))
    }

    fn trust(&mut self, id: SessionId) -> SessionState {
        if let Some(session) = self.sessions.get_mut(&id) {
            session.phase = Phase::Trusted;
            self.stats.record_trusted();
            info!(session = %id, role = %session.role, sni = ?session.server_name, "Session trusted");
        }
        SessionState::Trusted
    }

    fn reject(&mut self, id: SessionId, reason: RejectReason) -> SessionState {
        if let Some(session) = self.sessions.get_mut(&id) {
            info!(session = %id, role = %session.role, reason = %reason, "Session rejected");
            session.phase = Phase::Rejected(reason);
            self.stats.record_rejected();
        }
        SessionState::Rejected
    }

    /// Close a session in any state.
    ///
    /// An outstanding verification request is forgotten; its verdict will
    /// be dropped when it arrives. Returns `true` if the session existed.
    pub fn close(&mut self, id: SessionId) -> bool {
        let Some(session) = self.sessions.remove(&id) else {
            return false;
        };

        if let Some(correlation_id) = session.correlation_id() {
            self.broker.discard(correlation_id);
        }

        debug!(
            session = %id,
            previous = %session.state(),
            age_ms = session.age().as_millis() as u64,
            "Session closed"
        );
        self.stats.record_closed();
        true
    }

    /// Close a session and hand back a future that sends close_notify on
    /// its stream, if the gate still holds it.
    ///
    /// The session is gone once this returns; the future borrows nothing
    /// from the gate and can be awaited or spawned freely.
    ///
    /// # Errors
    ///
    /// Returns `SessionClosed` if the session does not exist.
    pub fn shutdown(
        &mut self,
        id: SessionId,
    ) -> SessionResult<impl Future<Output = ()> + Send + 'static> {
        let stream = self
            .sessions
            .get_mut(&id)
            .ok_or(SessionError::SessionClosed { id })?
            .stream
            .take();

        self.close(id);

        Ok(async move {
            if let Some(mut stream) = stream {
                if let Err(e) = stream.shutdown().await {
                    debug!(session = %id, error = %e, "TLS shutdown failed");
                }
            }
        })
    }

    /// Reject every pending session whose verification window has elapsed.
    ///
    /// Returns the sessions that were rejected.
    pub fn expire_stale(&mut self, now: Instant) -> Vec<SessionId> {
        let expired: Vec<(SessionId, CorrelationId)> = self
            .sessions
            .values()
            .filter_map(|s| match s.phase {
                Phase::PendingVerification(correlation_id) => Some((s, correlation_id)),
                _ => None,
            })
            .filter(|(s, _)| self.deadline(s).is_some_and(|deadline| deadline <= now))
            .map(|(s, correlation_id)| (s.id, correlation_id))
            .collect();

        for &(id, correlation_id) in &expired {
            self.broker.discard(correlation_id);
            self.reject(id, RejectReason::Timeout);
        }

        expired.into_iter().map(|(id, _)| id).collect()
    }

    /// Get the earliest instant at which a pending session times out.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.sessions
            .values()
            .filter_map(|s| self.deadline(s))
            .min()
    }

    /// Only pending sessions have a deadline.
    fn deadline(&self, session: &Session) -> Option<Instant> {
        let timeout = session.policy.verification_timeout?;
        let requested_at = self.broker.requested_at(session.correlation_id()?)?;
        Some(requested_at + timeout)
    }

    /// Apply a lifecycle event.
    ///
    /// Returns the affected session and its new state, or `None` if the
    /// event changed nothing.
    pub fn handle(&mut self, event: GateEvent) -> Option<(SessionId, SessionState)> {
        match event {
            GateEvent::HandshakeFinished { session, result } => {
                match self.complete_handshake(session, result) {
                    Ok(state) => Some((session, state)),
                    Err(SessionError::Handshake { .. }) => Some((session, SessionState::Closed)),
                    Err(e) => {
                        warn!(session = %session, error = %e, "Ignoring handshake completion");
                        None
                    },
                }
            },
            GateEvent::Verdict(verdict) => self.on_verdict(verdict),
            GateEvent::Closed(session) => self
                .close(session)
                .then_some((session, SessionState::Closed)),
        }
    }

    /// Hand a TRUSTED session's encrypted stream to the protocol layer.
    ///
    /// This is the only way application data reaches a peer. The session
    /// stays in the table until closed, so later verdicts and close events
    /// still resolve against it.
    ///
    /// # Errors
    ///
    /// Fails with `SessionNotReady`, `SessionRejected` or `SessionClosed`
    /// outside TRUSTED, or `StreamTaken` if the stream was already handed out.
    pub fn take_stream(&mut self, id: SessionId) -> SessionResult<SecureStream> {
        let session = self
            .sessions
            .get_mut(&id)
            .ok_or(SessionError::SessionClosed { id })?;

        match session.phase {
            Phase::Trusted => {
                let stream = session.stream.take().ok_or(SessionError::StreamTaken { id })?;
                debug!(session = %id, "Stream handed to protocol layer");
                Ok(stream)
            },
            Phase::Rejected(ref reason) => Err(SessionError::SessionRejected {
                id,
                reason: reason.clone(),
            }),
            ref phase => Err(SessionError::SessionNotReady {
                id,
                state: phase.state(),
            }),
        }
    }

    /// Get a session's state. `None` once closed.
    #[must_use]
    pub fn state(&self, id: SessionId) -> Option<SessionState> {
        self.sessions.get(&id).map(Session::state)
    }

    /// Get a session.
    #[must_use]
    pub fn session(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    /// Get the broker.
    #[must_use]
    pub fn broker(&self) -> &VerificationBroker {
        &self.broker
    }

    /// Get the counters.
    #[must_use]
    pub fn stats(&self) -> &Arc<HandshakeStats> {
        &self.stats
    }

    /// Get the number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Check if there are no live sessions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
