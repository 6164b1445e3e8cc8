//! # Error Types
//!
//! Crate-wide error enum and conversions.

use tonic::Status;

/// Custom result type for edgeplane operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the edgeplane control plane
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A service entry carries invalid routing labels
    #[error("Validation error: {message}")]
    Validation { message: String, field: Option<String> },

    /// A domain is already claimed by another virtual host
    #[error("Domain '{domain}' is already used by virtual host '{owner}'")]
    DomainConflict { domain: String, owner: String },

    /// No usable certificate for a virtual host
    #[error("Certificate unavailable for '{vhost}': {reason}")]
    CertificateUnavailable { vhost: String, reason: String },

    /// A resource bundle failed cross-reference validation
    #[error("Inconsistent snapshot for consumer '{consumer}': {reason}")]
    InconsistentSnapshot { consumer: String, reason: String },

    /// Network transport errors (gRPC)
    #[error("Transport error: {0}")]
    Transport(String),

    /// An epoch rebuild exceeded its deadline
    #[error("Resource graph build timed out after {duration_ms}ms")]
    BuildTimeout { duration_ms: u64 },

    /// Certificate storage errors
    #[error("Storage error: {context}")]
    Storage {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Requested blob does not exist in storage
    #[error("File not found in storage: {name}")]
    NotFound { name: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {context}")]
    Serialization {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Certificate parsing and issuing errors
    #[error(transparent)]
    Tls(#[from] super::TlsError),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into(), source: None }
    }

    /// Create a configuration error with source
    pub fn config_with_source<S: Into<String>>(
        message: S,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Config { message: message.into(), source: Some(source) }
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation { message: message.into(), field: None }
    }

    /// Create a validation error with field information
    pub fn validation_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Validation { message: message.into(), field: Some(field.into()) }
    }

    /// Create a domain conflict error
    pub fn domain_conflict<D: Into<String>, O: Into<String>>(domain: D, owner: O) -> Self {
        Self::DomainConflict { domain: domain.into(), owner: owner.into() }
    }

    pub fn certificate_unavailable<V: Into<String>, R: Into<String>>(vhost: V, reason: R) -> Self {
        Self::CertificateUnavailable { vhost: vhost.into(), reason: reason.into() }
    }

    pub fn inconsistent_snapshot<C: Into<String>, R: Into<String>>(consumer: C, reason: R) -> Self {
        Self::InconsistentSnapshot { consumer: consumer.into(), reason: reason.into() }
    }

    /// Create a new transport error
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport(message.into())
    }

    /// Create a build timeout error
    pub fn build_timeout(duration_ms: u64) -> Self {
        Self::BuildTimeout { duration_ms }
    }

    /// Create a storage error with context
    pub fn storage<S: Into<String>>(context: S, source: std::io::Error) -> Self {
        Self::Storage { context: context.into(), source }
    }

    pub fn not_found<S: Into<String>>(name: S) -> Self {
        Self::NotFound { name: name.into() }
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal(message.into())
    }

    /// Whether this error only affects one entry, stream or epoch.
    pub fn is_recoverable(&self) -> bool {
        !self.is_fatal()
    }

    /// Storage and configuration failures that leave the process unable to
    /// build any snapshot at all.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Config { .. } | Error::Storage { .. })
    }

    /// Check if this error should be retried on the next epoch
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::BuildTimeout { .. }
                | Error::Storage { .. }
                | Error::NotFound { .. }
                | Error::CertificateUnavailable { .. }
                | Error::InconsistentSnapshot { .. }
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Self::Storage { context: "I/O operation failed".to_string(), source: error }
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization {
            context: "JSON serialization failed".to_string(),
            source: Box::new(error),
        }
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(error: serde_yaml::Error) -> Self {
        Self::Serialization {
            context: "YAML deserialization failed".to_string(),
            source: Box::new(error),
        }
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields: Vec<String> = errors
            .field_errors()
            .iter()
            .map(|(field, field_errors)| {
                let messages: Vec<String> = field_errors
                    .iter()
                    .map(|e| e.message.as_ref().map_or("invalid value".to_string(), |m| m.to_string()))
                    .collect();
                format!("{}: {}", field, messages.join(", "))
            })
            .collect();
        fields.sort();

        Self::validation(format!("Validation failed: {}", fields.join("; ")))
    }
}

impl From<Error> for Status {
    fn from(error: Error) -> Self {
        match &error {
            Error::Validation { .. } | Error::DomainConflict { .. } => {
                Status::invalid_argument(error.to_string())
            }
            Error::NotFound { .. } => Status::not_found(error.to_string()),
            Error::BuildTimeout { .. } => Status::deadline_exceeded(error.to_string()),
            Error::Transport(_) => Status::unavailable(error.to_string()),
            _ => Status::internal(error.to_string()),
        }
    }
}
