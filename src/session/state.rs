//! Session identity, lifecycle states, and per-connection policy.

use std::time::{Duration, Instant};

use tokio_rustls::rustls::pki_types::CertificateDer;

use crate::tls::{Role, SecureStream};
use crate::verification::CorrelationId;

/// Opaque session handle. Never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// TLS negotiation in progress.
    Handshaking,
    /// Handshake done; waiting for the trust authority.
    PendingVerification,
    /// Application data may flow.
    Trusted,
    /// The peer was not trusted; the connection must be torn down.
    Rejected,
    /// The connection is gone.
    Closed,
}

impl SessionState {
    /// Returns `true` if application data may be exchanged.
    #[must_use]
    pub fn allows_data(self) -> bool {
        matches!(self, Self::Trusted)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Handshaking => "HANDSHAKING",
            Self::PendingVerification => "PENDING_VERIFICATION",
            Self::Trusted => "TRUSTED",
            Self::Rejected => "REJECTED",
            Self::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

/// Why a session was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// The trust authority refused the chain.
    Authority(String),
    /// No verdict arrived within the configured window.
    Timeout,
    /// Verification was required but the peer offered no certificate.
    MissingPeerCertificate,
    /// The trust authority could not be reached.
    AuthorityUnavailable,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Authority(reason) => write!(f, "rejected by trust authority: {reason}"),
            Self::Timeout => write!(f, "verification timed out"),
            Self::MissingPeerCertificate => write!(f, "peer offered no certificate"),
            Self::AuthorityUnavailable => write!(f, "trust authority unavailable"),
        }
    }
}

/// Per-connection verification policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPolicy {
    /// Whether the peer chain must be accepted by the trust authority.
    pub verification_required: bool,

    /// Reject if no verdict arrives within this window. `None` waits forever.
    pub verification_timeout: Option<Duration>,
}

impl SessionPolicy {
    /// Policy that requires a verdict.
    #[must_use]
    pub fn verified() -> Self {
        Self {
            verification_required: true,
            verification_timeout: None,
        }
    }

    /// Policy that trusts the session once the handshake completes.
    #[must_use]
    pub fn unverified() -> Self {
        Self {
            verification_required: false,
            verification_timeout: None,
        }
    }

    /// Set the verification timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.verification_timeout = Some(timeout);
        self
    }
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self::verified()
    }
}

/// Where a live session is, with what that step owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum Phase {
    Handshaking,
    PendingVerification(CorrelationId),
    Trusted,
    Rejected(RejectReason),
}

impl Phase {
    pub(super) fn state(&self) -> SessionState {
        match self {
            Self::Handshaking => SessionState::Handshaking,
            Self::PendingVerification(_) => SessionState::PendingVerification,
            Self::Trusted => SessionState::Trusted,
            Self::Rejected(_) => SessionState::Rejected,
        }
    }
}

/// A single TLS session as tracked by the gate.
pub struct Session {
    pub(super) id: SessionId,
    pub(super) role: Role,
    pub(super) phase: Phase,
    pub(super) policy: SessionPolicy,
    pub(super) peer_chain: Option<Vec<CertificateDer<'static>>>,
    pub(super) server_name: Option<String>,
    /// Held by the gate until handed to the protocol layer.
    pub(super) stream: Option<SecureStream>,
    pub(super) created_at: Instant,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("phase", &self.phase)
            .field("server_name", &self.server_name)
            .field("stream_held", &self.stream.is_some())
            .finish()
    }
}

impl Session {
    pub(super) fn new(id: SessionId, role: Role, policy: SessionPolicy) -> Self {
        Self {
            id,
            role,
            phase: Phase::Handshaking,
            policy,
            peer_chain: None,
            server_name: None,
            stream: None,
            created_at: Instant::now(),
        }
    }

    /// Get the session id.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Get the role.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Get the current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.phase.state()
    }

    /// Get the policy.
    #[must_use]
    pub fn policy(&self) -> SessionPolicy {
        self.policy
    }

    /// Get the captured peer chain.
    #[must_use]
    pub fn peer_chain(&self) -> Option<&[CertificateDer<'static>]> {
        self.peer_chain.as_deref()
    }

    /// Get the outstanding verification request, if any.
    #[must_use]
    pub fn correlation_id(&self) -> Option<CorrelationId> {
        match self.phase {
            Phase::PendingVerification(correlation_id) => Some(correlation_id),
            _ => None,
        }
    }

    /// Get the rejection reason, once rejected.
    #[must_use]
    pub fn rejection(&self) -> Option<&RejectReason> {
        match self.phase {
            Phase::Rejected(ref reason) => Some(reason),
            _ => None,
        }
    }

    /// Check if the gate still holds the encrypted stream.
    #[must_use]
    pub fn holds_stream(&self) -> bool {
        self.stream.is_some()
    }

    /// Get the negotiated server name.
    #[must_use]
    pub fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    /// Get the session age.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}
