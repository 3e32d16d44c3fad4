//! Handshake and session counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsStats {
    /// Handshakes that completed.
    pub handshakes_succeeded: u64,

    /// Handshakes that failed or timed out.
    pub handshakes_failed: u64,

    /// Sessions that reached TRUSTED.
    pub sessions_trusted: u64,

    /// Sessions that reached REJECTED.
    pub sessions_rejected: u64,

    /// Sessions closed.
    pub sessions_closed: u64,
}

/// Atomic counters shared between handshake tasks and the session gate.
#[derive(Debug, Default)]
pub struct HandshakeStats {
    handshakes_succeeded: AtomicU64,
    handshakes_failed: AtomicU64,
    sessions_trusted: AtomicU64,
    sessions_rejected: AtomicU64,
    sessions_closed: AtomicU64,
}

impl HandshakeStats {
    /// Create new counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed handshake.
    pub fn record_handshake_success(&self) {
        self.handshakes_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed handshake.
    pub fn record_handshake_failure(&self) {
        self.handshakes_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a session becoming trusted.
    pub fn record_trusted(&self) {
        self.sessions_trusted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a session being rejected.
    pub fn record_rejected(&self) {
        self.sessions_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a session being closed.
    pub fn record_closed(&self) {
        self.sessions_closed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current statistics.
    #[must_use]
    pub fn snapshot(&self) -> TlsStats {
        TlsStats {
            handshakes_succeeded: self.handshakes_succeeded.load(Ordering::Relaxed),
            handshakes_failed: self.handshakes_failed.load(Ordering::Relaxed),
            sessions_trusted: self.sessions_trusted.load(Ordering::Relaxed),
            sessions_rejected: self.sessions_rejected.load(Ordering::Relaxed),
            sessions_closed: self.sessions_closed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = HandshakeStats::new();

        stats.record_handshake_success();
        stats.record_handshake_failure();
        stats.record_trusted();
        stats.record_rejected();
        stats.record_closed();
        stats.record_closed();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.handshakes_succeeded, 1);
        assert_eq!(snapshot.handshakes_failed, 1);
        assert_eq!(snapshot.sessions_trusted, 1);
        assert_eq!(snapshot.sessions_rejected, 1);
        assert_eq!(snapshot.sessions_closed, 2);
    }

    #[test]
    fn test_default_snapshot() {
        assert_eq!(HandshakeStats::new().snapshot(), TlsStats::default());
    }
}
