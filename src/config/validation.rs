//! Configuration validation system.

use std::collections::HashSet;

use super::types::TlsSettings;
use crate::tls::normalize;

/// A single validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// Error message.
    pub message: String,
    /// Severity level.
    pub severity: ValidationSeverity,
}

impl ValidationError {
    /// Create a new error.
    pub fn error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            severity: ValidationSeverity::Error,
        }
    }

    /// Create a new warning.
    pub fn warning(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            severity: ValidationSeverity::Warning,
        }
    }
}

/// Severity of validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationSeverity {
    /// Error - configuration is invalid.
    Error,
    /// Warning - configuration may have issues.
    Warning,
}

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    errors: Vec<ValidationError>,
}

impl ValidationResult {
    /// Create a new empty (valid) result.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an error to the result.
    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    /// Check if the validation passed (no errors).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self
            .errors
            .iter()
            .any(|e| e.severity == ValidationSeverity::Error)
    }

    /// Get all validation issues.
    #[must_use]
    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    /// Get only errors (not warnings).
    #[must_use]
    pub fn errors_only(&self) -> Vec<&ValidationError> {
        self.errors
            .iter()
            .filter(|e| e.severity == ValidationSeverity::Error)
            .collect()
    }

    /// Get only warnings.
    #[must_use]
    pub fn warnings(&self) -> Vec<&ValidationError> {
        self.errors
            .iter()
            .filter(|e| e.severity == ValidationSeverity::Warning)
            .collect()
    }

    /// Merge another validation result into this one.
    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
    }
}

/// Trait for configuration validators.
pub trait Validator: std::fmt::Debug + Send + Sync {
    /// Validate a configuration and return any errors.
    fn validate(&self, config: &TlsSettings) -> ValidationResult;
}

/// Built-in validator for structural checks.
#[derive(Debug, Default)]
pub struct BasicValidator;

impl BasicValidator {
    /// Create a new basic validator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Validator for BasicValidator {
    fn validate(&self, config: &TlsSettings) -> ValidationResult {
        let mut result = ValidationResult::new();

        let mut hostnames = HashSet::new();
        for credential in &config.credentials {
            let hostname = normalize(&credential.hostname);
            if hostname.is_empty() {
                result.add_error(ValidationError::error(
                    "credentials[].hostname",
                    "Credential hostname cannot be empty",
                ));
                continue;
            }

            if !hostnames.insert(hostname) {
                result.add_error(ValidationError::error(
                    format!("credentials.{}", credential.hostname),
                    format!("Duplicate credential hostname: {}", credential.hostname),
                ));
            }

            for alias in &credential.aliases {
                if alias.is_empty() || (alias.contains('*') && !alias.starts_with("*.")) {
                    result.add_error(ValidationError::error(
                        format!("credentials.{}.aliases", credential.hostname),
                        format!("Invalid SNI alias: '{alias}'"),
                    ));
                }
            }
        }

        if config.credentials.is_empty() {
            result.add_error(ValidationError::warning(
                "credentials",
                "No credentials configured; inbound TLS is unavailable",
            ));
        }

        let references = [
            ("server.default_credential", &config.server.default_credential),
            ("client.credential", &config.client.credential),
        ];
        for (field, reference) in references {
            if let Some(name) = reference {
                if !hostnames.contains(&normalize(name)) {
                    result.add_error(ValidationError::error(
                        field,
                        format!("Unknown credential: {name}"),
                    ));
                }
            }
        }

        if config.handshake.timeout_secs == 0 {
            result.add_error(ValidationError::error(
                "handshake.timeout_secs",
                "Handshake timeout cannot be 0",
            ));
        }

        if config.verification.timeout_secs == Some(0) {
            result.add_error(ValidationError::error(
                "verification.timeout_secs",
                "Verification timeout cannot be 0",
            ));
        }

        if config.authority.socket_path.as_os_str().is_empty() {
            result.add_error(ValidationError::error(
                "authority.socket_path",
                "Authority socket path cannot be empty",
            ));
        }

        result
    }
}

/// Validator that checks credential files exist on disk.
#[derive(Debug, Default)]
pub struct CredentialFileValidator;

impl CredentialFileValidator {
    /// Create a new credential file validator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Validator for CredentialFileValidator {
    fn validate(&self, config: &TlsSettings) -> ValidationResult {
        let mut result = ValidationResult::new();

        for credential in &config.credentials {
            let files = [
                ("cert_path", Some(&credential.cert_path)),
                ("key_path", Some(&credential.key_path)),
                ("chain_path", credential.chain_path.as_ref()),
            ];

            for (field, path) in files {
                if let Some(path) = path {
                    if !path.is_file() {
                        result.add_error(ValidationError::error(
                            format!("credentials.{}.{}", credential.hostname, field),
                            format!("File not found: {}", path.display()),
                        ));
                    }
                }
            }
        }

        result
    }
}
