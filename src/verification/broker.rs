//! Correlates verification requests with asynchronous verdicts.

use std::collections::HashMap;
use std::time::Instant;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_rustls::rustls::pki_types::CertificateDer;
use tracing::{debug, trace, warn};

use super::types::{CorrelationId, VerdictOutcome, VerificationRequest, VerificationVerdict};
use crate::session::SessionId;

/// Errors raised when submitting a request.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BrokerError {
    /// The queue towards the trust authority is closed.
    #[error("trust authority is unavailable")]
    AuthorityUnavailable,

    /// The session already has a request in flight.
    #[error("session {session} already has verification request {correlation_id} outstanding")]
    AlreadyPending {
        /// The session.
        session: SessionId,
        /// Its outstanding request.
        correlation_id: CorrelationId,
    },
}

/// Result type alias for broker operations.
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Bookkeeping for an outstanding request.
#[derive(Debug, Clone, Copy)]
struct Pending {
    session_id: SessionId,
    requested_at: Instant,
}

/// Ships peer chains to the trust authority and matches verdicts by id.
///
/// Verdicts may arrive in any order. A verdict with no matching pending
/// request (session already closed, duplicate, or spurious) is dropped.
#[derive(Debug)]
pub struct VerificationBroker {
    /// Next correlation id to issue.
    next_id: u64,

    /// Outstanding requests by correlation id.
    pending: HashMap<CorrelationId, Pending>,

    /// Outstanding correlation id by session.
    by_session: HashMap<SessionId, CorrelationId>,

    /// Queue drained by the authority link.
    outbound: mpsc::UnboundedSender<VerificationRequest>,
}

impl VerificationBroker {
    /// Create a broker and the receiving end of its outbound queue.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<VerificationRequest>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        (Self::with_sender(outbound), rx)
    }

    /// Create a broker feeding an existing queue.
    #[must_use]
    pub fn with_sender(outbound: mpsc::UnboundedSender<VerificationRequest>) -> Self {
        Self {
            next_id: 1,
            pending: HashMap::new(),
            by_session: HashMap::new(),
            outbound,
        }
    }

    /// Register a chain for verification and enqueue it.
    ///
    /// Never waits: the request is only queued.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyPending` if the session has a request in flight, or
    /// `AuthorityUnavailable` if the queue is closed.
    pub fn submit(
        &mut self,
        session_id: SessionId,
        certificate_chain: Vec<CertificateDer<'static>>,
    ) -> BrokerResult<VerificationRequest> {
        if let Some(&correlation_id) = self.by_session.get(&session_id) {
            return Err(BrokerError::AlreadyPending {
                session: session_id,
                correlation_id,
            });
        }

        let correlation_id = CorrelationId(self.next_id);
        self.next_id += 1;

        let request = VerificationRequest {
            correlation_id,
            session_id,
            certificate_chain,
            requested_at: Instant::now(),
        };

        if self.outbound.send(request.clone()).is_err() {
            warn!(session = %session_id, "Verification queue closed");
            return Err(BrokerError::AuthorityUnavailable);
        }

        self.pending.insert(
            correlation_id,
            Pending {
                session_id,
                requested_at: request.requested_at,
            },
        );
        self.by_session.insert(session_id, correlation_id);

        debug!(
            session = %session_id,
            correlation_id = %correlation_id,
            chain_len = request.certificate_chain.len(),
            "Verification request submitted"
        );

        Ok(request)
    }

    /// Match a verdict to its pending request.
    ///
    /// Returns the session and outcome, or `None` if nothing was waiting for
    /// this correlation id.
    pub fn on_verdict_received(
        &mut self,
        verdict: VerificationVerdict,
    ) -> Option<(SessionId, VerdictOutcome)> {
        let Some(pending) = self.pending.remove(&verdict.correlation_id) else {
            trace!(correlation_id = %verdict.correlation_id, "Discarding verdict with no pending request");
            return None;
        };
        self.by_session.remove(&pending.session_id);

        debug!(
            session = %pending.session_id,
            correlation_id = %verdict.correlation_id,
            accepted = verdict.outcome.is_accept(),
            elapsed_ms = pending.requested_at.elapsed().as_millis() as u64,
            "Verdict matched"
        );

        Some((pending.session_id, verdict.outcome))
    }

    /// Forget a pending request; its verdict will be dropped on arrival.
    ///
    /// Returns `true` if the request was pending.
    pub fn discard(&mut self, correlation_id: CorrelationId) -> bool {
        match self.pending.remove(&correlation_id) {
            Some(pending) => {
                self.by_session.remove(&pending.session_id);
                trace!(correlation_id = %correlation_id, "Verification request discarded");
                true
            },
            None => false,
        }
    }

    /// Get when a pending request was submitted.
    #[must_use]
    pub fn requested_at(&self, correlation_id: CorrelationId) -> Option<Instant> {
        self.pending.get(&correlation_id).map(|p| p.requested_at)
    }

    /// Get the number of outstanding requests.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
