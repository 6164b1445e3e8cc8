//! Certificate inspection and storage naming

use base64::Engine;
use chrono::{DateTime, Utc};
use rustls::pki_types::{pem::PemObject, CertificateDer, PrivateKeyDer};
use sha2::{Digest, Sha256};
use x509_parser::prelude::*;

use crate::errors::TlsError;

/// File extension of stored certificate chains
pub const CERTIFICATE_EXTENSION: &str = "pem";
/// File extension of stored private keys
pub const PRIVATE_KEY_EXTENSION: &str = "key";

/// Metadata of the leaf certificate of a stored chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    pub subject: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub dns_names: Vec<String>,
}

impl CertificateInfo {
    /// Usable only while `now` is strictly before not-after
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.not_after
    }
}

/// Deterministic storage key for a domain set.
///
/// `lower(primary) + "-" + base64(sha256(concat(sorted domains)))[..16]`, with
/// path separators removed. Independent of the order the domains are given in.
pub fn storage_key(primary: &str, domains: &[String]) -> String {
    let mut sorted: Vec<&str> = domains.iter().map(String::as_str).collect();
    sorted.sort_unstable();

    let digest = Sha256::digest(sorted.concat().as_bytes());
    let hash = base64::engine::general_purpose::STANDARD.encode(digest);

    format!("{}-{}", primary.to_lowercase(), &hash[..16]).replace(['/', '\\'], "")
}

pub fn certificate_file_name(key: &str) -> String {
    format!("{}.{}", key, CERTIFICATE_EXTENSION)
}

pub fn private_key_file_name(key: &str) -> String {
    format!("{}.{}", key, PRIVATE_KEY_EXTENSION)
}

/// Parse a PEM chain and extract the leaf certificate metadata
pub fn inspect_chain(name: &str, chain_pem: &[u8]) -> Result<CertificateInfo, TlsError> {
    let chain: Vec<CertificateDer<'static>> = CertificateDer::pem_slice_iter(chain_pem)
        .collect::<Result<_, _>>()
        .map_err(|err| TlsError::InvalidCertificatePem {
            name: name.to_string(),
            reason: err.to_string(),
        })?;

    let leaf = chain
        .first()
        .ok_or_else(|| TlsError::EmptyCertificateChain { name: name.to_string() })?;

    let (_, parsed) = X509Certificate::from_der(leaf.as_ref()).map_err(|err| {
        TlsError::InvalidCertificate { name: name.to_string(), reason: err.to_string() }
    })?;

    let validity = parsed.validity();
    let not_before = timestamp_to_utc(name, validity.not_before.timestamp())?;
    let not_after = timestamp_to_utc(name, validity.not_after.timestamp())?;

    let dns_names = parsed
        .subject_alternative_name()
        .ok()
        .flatten()
        .map(|ext| {
            ext.value
                .general_names
                .iter()
                .filter_map(|general| match general {
                    GeneralName::DNSName(dns) => Some(dns.to_string()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(CertificateInfo { subject: parsed.subject().to_string(), not_before, not_after, dns_names })
}

/// Ensure the stored key is a PEM private key in a supported encoding
pub fn check_private_key(name: &str, key_pem: &[u8]) -> Result<(), TlsError> {
    PrivateKeyDer::from_pem_slice(key_pem)
        .map(|_| ())
        .map_err(|_| TlsError::InvalidPrivateKey { name: name.to_string() })
}

/// Full check of a stored chain and key: both parse and the leaf has not expired.
pub fn validate_key_pair(
    name: &str,
    chain_pem: &[u8],
    key_pem: &[u8],
    now: DateTime<Utc>,
) -> Result<CertificateInfo, TlsError> {
    let info = inspect_chain(name, chain_pem)?;
    check_private_key(name, key_pem)?;

    if !info.is_valid_at(now) {
        return Err(TlsError::CertificateExpired {
            name: name.to_string(),
            not_after: info.not_after,
        });
    }

    Ok(info)
}

fn timestamp_to_utc(name: &str, seconds: i64) -> Result<DateTime<Utc>, TlsError> {
    DateTime::from_timestamp(seconds, 0).ok_or_else(|| TlsError::InvalidCertificate {
        name: name.to_string(),
        reason: format!("validity timestamp {} out of range", seconds),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn domains(list: &[&str]) -> Vec<String> {
        list.iter().map(|d| d.to_string()).collect()
    }

    #[test]
    fn storage_key_is_prefixed_by_lowercase_primary() {
        let key = storage_key("A.Example.com", &domains(&["A.Example.com", "www.a.example.com"]));

        assert!(key.starts_with("a.example.com-"));
        assert!(key.len() <= "a.example.com-".len() + 16);
        assert!(!key.contains('/'));
    }

    #[test]
    fn storage_key_differs_for_different_domain_sets() {
        let one = storage_key("a.example.com", &domains(&["a.example.com"]));
        let two = storage_key("a.example.com", &domains(&["a.example.com", "b.example.com"]));
        assert_ne!(one, two);
    }

    #[test]
    fn file_names_use_pem_and_key_extensions() {
        assert_eq!(certificate_file_name("k"), "k.pem");
        assert_eq!(private_key_file_name("k"), "k.key");
    }

    #[test]
    fn garbage_is_not_a_certificate() {
        let err = inspect_chain("x.pem", b"not a certificate").unwrap_err();
        assert!(matches!(err, TlsError::EmptyCertificateChain { .. }));
        assert!(check_private_key("x.key", b"nope").is_err());
    }

    proptest! {
        #[test]
        fn storage_key_ignores_domain_order(
            mut names in proptest::collection::vec("[a-z]{1,8}\\.com", 1..6)
        ) {
            let primary = names[0].clone();
            let forward = storage_key(&primary, &names);
            names.reverse();
            let backward = storage_key(&primary, &names);
            prop_assert_eq!(forward, backward);
        }
    }
}
