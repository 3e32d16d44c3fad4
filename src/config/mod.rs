//! # Configuration
//!
//! TOML configuration for credentials, verification policy, timeouts and the
//! trust authority socket.
//!
//! ## Example Configuration
//!
//! ```toml
//! [[credentials]]
//! hostname = "mx.example.org"
//! cert_path = "/etc/mail/mx.crt"
//! key_path = "/etc/mail/mx.key"
//! aliases = ["*.mx.example.org"]
//!
//! [server]
//! default_credential = "mx.example.org"
//!
//! [verification]
//! inbound_required = true
//! timeout_secs = 30
//!
//! [authority]
//! socket_path = "/var/run/smtpd/authority.sock"
//! ```

mod error;
mod loader;
mod types;
mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use types::{
    AuthoritySection, ClientSection, CredentialConfig, HandshakeSection, ServerSection,
    TlsSettings, VerificationSection,
};
pub use validation::{
    BasicValidator, CredentialFileValidator, ValidationError, ValidationResult,
    ValidationSeverity, Validator,
};
