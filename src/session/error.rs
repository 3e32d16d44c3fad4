//! Session gate error types.

use thiserror::Error;

use super::state::{RejectReason, SessionId, SessionState};
use crate::tls::TlsError;

/// Errors surfaced to the protocol layer by the session gate.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The stream was requested before the session was trusted.
    #[error("session {id} is not ready for application data (state {state})")]
    SessionNotReady {
        /// The session.
        id: SessionId,
        /// Its current state.
        state: SessionState,
    },

    /// The stream was requested for a rejected session.
    #[error("session {id} was rejected: {reason}")]
    SessionRejected {
        /// The session.
        id: SessionId,
        /// Why it was rejected.
        reason: RejectReason,
    },

    /// The session is closed or was never opened.
    #[error("session {id} is closed")]
    SessionClosed {
        /// The session.
        id: SessionId,
    },

    /// A lifecycle event arrived in a state that cannot accept it.
    #[error("session {id} cannot {event} in state {state}")]
    InvalidTransition {
        /// The session.
        id: SessionId,
        /// Its current state.
        state: SessionState,
        /// The rejected event.
        event: &'static str,
    },

    /// The handshake failed; the session no longer exists.
    #[error("session {id}: {source}")]
    Handshake {
        /// The session.
        id: SessionId,
        /// The handshake failure.
        #[source]
        source: TlsError,
    },

    /// The stream was already handed to the protocol layer.
    #[error("session {id} stream was already taken")]
    StreamTaken {
        /// The session.
        id: SessionId,
    },
}

/// Result type alias for session gate operations.
pub type SessionResult<T> = Result<T, SessionError>;
