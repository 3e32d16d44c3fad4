//! # smtpd-tls
//!
//! TLS bootstrap for a privilege-separated SMTP daemon.
//!
//! The session process negotiates TLS but never decides whether a peer is
//! trusted. Peer certificate chains are captured during the handshake and
//! shipped to a separate trust authority; the session stays gated until a
//! verdict arrives.
//!
//! ## Features
//!
//! - Credential loading with key/certificate consistency checks
//! - SNI-based virtual hosting with a default credential
//! - Deferred peer verification with correlation ids
//! - A per-session state machine that blocks application data until trusted
//!
//! ## Layout
//!
//! - [`tls`]: credentials, contexts, SNI and handshake driving
//! - [`verification`]: the verification broker
//! - [`session`]: the session gate
//! - [`ipc`]: the trust authority message boundary
//! - [`config`]: TOML configuration

pub mod bootstrap;
pub mod config;
pub mod ipc;
pub mod session;
pub mod tls;
pub mod verification;

pub use bootstrap::TlsBootstrap;
