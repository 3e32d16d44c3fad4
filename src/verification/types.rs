//! Verification request and verdict types.

use std::time::Instant;

use tokio_rustls::rustls::pki_types::CertificateDer;

use crate::session::SessionId;

/// Token linking a verification request to its verdict.
///
/// Issued from a monotonic counter and never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationId(pub u64);

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A peer chain waiting for a trust decision.
#[derive(Debug, Clone)]
pub struct VerificationRequest {
    /// Correlation token.
    pub correlation_id: CorrelationId,

    /// Session the chain was captured on.
    pub session_id: SessionId,

    /// Peer chain, leaf first.
    pub certificate_chain: Vec<CertificateDer<'static>>,

    /// When the request was submitted.
    pub requested_at: Instant,
}

/// The trust authority's decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerdictOutcome {
    /// The chain is trusted.
    Accept,
    /// The chain is not trusted.
    Reject(String),
}

impl VerdictOutcome {
    /// Returns `true` for `Accept`.
    #[must_use]
    pub fn is_accept(&self) -> bool {
        matches!(self, Self::Accept)
    }
}

/// A verdict as received from the trust authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationVerdict {
    /// Correlation token of the request being answered.
    pub correlation_id: CorrelationId,

    /// Decision.
    pub outcome: VerdictOutcome,
}

impl VerificationVerdict {
    /// Create an accepting verdict.
    #[must_use]
    pub fn accept(correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id,
            outcome: VerdictOutcome::Accept,
        }
    }

    /// Create a rejecting verdict.
    #[must_use]
    pub fn reject(correlation_id: CorrelationId, reason: impl Into<String>) -> Self {
        Self {
            correlation_id,
            outcome: VerdictOutcome::Reject(reason.into()),
        }
    }
}
