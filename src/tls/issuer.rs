//! Certificate issuing
//!
//! [`CertificateIssuer`] produces a signed certificate for a set of names,
//! valid until a given instant. [`LocalCaIssuer`] signs with a certificate
//! authority kept in certificate storage next to the leaf certificates.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose,
};
use time::OffsetDateTime;
use tracing::info;

use crate::errors::{Error, Result, TlsError};
use crate::storage::FileStorage;

/// Storage name of the CA certificate
pub const CA_CERTIFICATE_FILE: &str = "ca.pem";
/// Storage name of the CA private key
pub const CA_PRIVATE_KEY_FILE: &str = "ca.key";

const CA_COMMON_NAME: &str = "edgeplane local CA";
const CA_VALIDITY_DAYS: i64 = 3000;

/// PEM encoded certificate chain and private key
#[derive(Clone)]
pub struct IssuedCertificate {
    pub certificate_chain: String,
    pub private_key: String,
    pub not_after: DateTime<Utc>,
}

impl std::fmt::Debug for IssuedCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedCertificate")
            .field("not_after", &self.not_after)
            .field("private_key", &"[redacted]")
            .finish()
    }
}

#[async_trait]
pub trait CertificateIssuer: Send + Sync + std::fmt::Debug {
    /// Issue a certificate covering `domains` (first entry is the subject)
    async fn issue(&self, domains: &[String], not_after: DateTime<Utc>) -> Result<IssuedCertificate>;
}

/// Signs leaf certificates with a locally held certificate authority
pub struct LocalCaIssuer {
    ca_certificate: Certificate,
    ca_key: KeyPair,
    /// PEM of the CA as stored, appended to every issued chain
    ca_pem: String,
}

impl std::fmt::Debug for LocalCaIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCaIssuer").finish_non_exhaustive()
    }
}

impl LocalCaIssuer {
    /// Generate a fresh CA
    pub fn generate() -> Result<Self> {
        let ca_key = KeyPair::generate().map_err(|e| TlsError::issuance(CA_COMMON_NAME, e))?;

        let mut params =
            CertificateParams::new(Vec::<String>::new()).map_err(|e| TlsError::issuance(CA_COMMON_NAME, e))?;
        let mut name = DistinguishedName::new();
        name.push(DnType::CommonName, CA_COMMON_NAME);
        params.distinguished_name = name;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages =
            vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign, KeyUsagePurpose::DigitalSignature];
        params.not_before = to_offset(Utc::now() - ChronoDuration::hours(1), CA_COMMON_NAME)?;
        params.not_after = to_offset(Utc::now() + ChronoDuration::days(CA_VALIDITY_DAYS), CA_COMMON_NAME)?;

        let ca_certificate =
            params.self_signed(&ca_key).map_err(|e| TlsError::issuance(CA_COMMON_NAME, e))?;
        let ca_pem = ca_certificate.pem();

        Ok(Self { ca_certificate, ca_key, ca_pem })
    }

    /// Rebuild a CA from its stored PEM certificate and key
    pub fn from_pem(ca_pem: &str, ca_key_pem: &str) -> Result<Self> {
        let ca_key = KeyPair::from_pem(ca_key_pem).map_err(|_| TlsError::InvalidPrivateKey {
            name: CA_PRIVATE_KEY_FILE.to_string(),
        })?;
        let params = CertificateParams::from_ca_cert_pem(ca_pem).map_err(|e| {
            TlsError::InvalidCertificate { name: CA_CERTIFICATE_FILE.to_string(), reason: e.to_string() }
        })?;
        let ca_certificate =
            params.self_signed(&ca_key).map_err(|e| TlsError::issuance(CA_COMMON_NAME, e))?;

        Ok(Self { ca_certificate, ca_key, ca_pem: ca_pem.to_string() })
    }

    /// Load the CA from storage, generating and storing one on first use
    pub async fn load_or_create(storage: &dyn FileStorage) -> Result<Self> {
        let stored_cert = storage.get_file(CA_CERTIFICATE_FILE).await;
        let stored_key = storage.get_file(CA_PRIVATE_KEY_FILE).await;

        match (stored_cert, stored_key) {
            (Ok(cert), Ok(key)) => {
                let cert = String::from_utf8(cert).map_err(|e| TlsError::InvalidCertificatePem {
                    name: CA_CERTIFICATE_FILE.to_string(),
                    reason: e.to_string(),
                })?;
                let key = String::from_utf8(key).map_err(|_| TlsError::InvalidPrivateKey {
                    name: CA_PRIVATE_KEY_FILE.to_string(),
                })?;
                Self::from_pem(&cert, &key)
            }
            (Err(Error::NotFound { .. }), _) | (_, Err(Error::NotFound { .. })) => {
                let issuer = Self::generate()?;
                storage.put_file(CA_CERTIFICATE_FILE, issuer.ca_pem.as_bytes()).await?;
                storage.put_file(CA_PRIVATE_KEY_FILE, issuer.ca_key.serialize_pem().as_bytes()).await?;
                info!(backend = storage.backend_name(), "Generated local certificate authority");
                Ok(issuer)
            }
            (Err(e), _) | (_, Err(e)) => Err(e),
        }
    }

    pub fn ca_certificate_pem(&self) -> &str {
        &self.ca_pem
    }
}

#[async_trait]
impl CertificateIssuer for LocalCaIssuer {
    async fn issue(&self, domains: &[String], not_after: DateTime<Utc>) -> Result<IssuedCertificate> {
        let subject = domains
            .first()
            .ok_or_else(|| Error::validation_field("cannot issue a certificate without names", "domains"))?;

        let key = KeyPair::generate().map_err(|e| TlsError::issuance(subject, e))?;
        let mut params =
            CertificateParams::new(domains.to_vec()).map_err(|e| TlsError::issuance(subject, e))?;
        params.distinguished_name = DistinguishedName::new();
        params.distinguished_name.push(DnType::CommonName, subject.as_str());
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature, KeyUsagePurpose::KeyEncipherment];
        params.not_before = to_offset(Utc::now() - ChronoDuration::minutes(5), subject)?;
        params.not_after = to_offset(not_after, subject)?;

        let leaf = params
            .signed_by(&key, &self.ca_certificate, &self.ca_key)
            .map_err(|e| TlsError::issuance(subject, e))?;

        Ok(IssuedCertificate {
            certificate_chain: format!("{}{}", leaf.pem(), self.ca_pem),
            private_key: key.serialize_pem(),
            not_after,
        })
    }
}

fn to_offset(instant: DateTime<Utc>, subject: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(instant.timestamp())
        .map_err(|e| TlsError::issuance(subject, e).into())
}
