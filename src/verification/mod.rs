//! Deferred peer-certificate verification.
//!
//! The session process never decides whether a certificate is trusted. The
//! broker forwards captured chains to the trust authority and hands each
//! verdict back to the session it belongs to.

mod broker;
mod types;

pub use broker::{BrokerError, BrokerResult, VerificationBroker};
pub use types::{CorrelationId, VerdictOutcome, VerificationRequest, VerificationVerdict};
