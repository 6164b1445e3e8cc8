use chrono::{DateTime, Utc};
use thiserror::Error;

/// Certificate errors surfaced while inspecting stored chains or issuing new ones.
///
/// `name` is always the storage file name the bytes were read from.
#[derive(Debug, Error)]
pub enum TlsError {
    /// No certificates were found in the stored PEM bytes.
    #[error("Certificate file {name} does not contain any certificates")]
    EmptyCertificateChain { name: String },

    /// The certificate PEM contents were invalid or unreadable.
    #[error("Certificate file {name} is not a valid PEM: {reason}")]
    InvalidCertificatePem { name: String, reason: String },

    /// The leaf certificate DER could not be parsed as X.509.
    #[error("Certificate file {name} contains a malformed certificate: {reason}")]
    InvalidCertificate { name: String, reason: String },

    /// The private key PEM contents were invalid or unsupported.
    #[error("Private key file {name} does not contain a supported private key")]
    InvalidPrivateKey { name: String },

    /// The certificate is expired.
    #[error("Certificate {name} expired at {not_after}")]
    CertificateExpired { name: String, not_after: DateTime<Utc> },

    /// Issuing or signing a certificate failed.
    #[error("Failed to issue certificate for {subject}: {reason}")]
    Issuance { subject: String, reason: String },
}

impl TlsError {
    pub fn issuance<S: Into<String>, R: std::fmt::Display>(subject: S, reason: R) -> Self {
        Self::Issuance { subject: subject.into(), reason: reason.to_string() }
    }
}
