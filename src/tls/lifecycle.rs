//! Certificate lifecycle for TLS virtual hosts
//!
//! One [`CertificateLifecycle`] lives for one build. It answers whether a
//! virtual host has a usable certificate, collects the secrets the listeners
//! of this epoch reference, and materializes them once the listeners are known.
//! Storage and parse failures never escape: a virtual host without a usable
//! certificate is served over plaintext until one is provisioned.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::{debug, warn};

use super::certificate::{
    certificate_file_name, private_key_file_name, storage_key, validate_key_pair, CertificateInfo,
};
use crate::domain::{Secret, VirtualHost};
use crate::errors::{Error, Result, TlsError};
use crate::storage::FileStorage;

/// Outcome of looking up the certificate of a virtual host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateStatus {
    /// Usable and not expiring within the renewal window
    Valid { not_after: DateTime<Utc> },
    /// Usable, but should be replaced soon
    Expiring { not_after: DateTime<Utc> },
    /// Not usable
    Unavailable { reason: String },
}

impl CertificateStatus {
    pub fn is_usable(&self) -> bool {
        !matches!(self, CertificateStatus::Unavailable { .. })
    }

    pub fn needs_provisioning(&self) -> bool {
        !matches!(self, CertificateStatus::Valid { .. })
    }
}

/// Reference to a secret that will be materialized by [`CertificateLifecycle::provide`]
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SecretRef {
    pub name: String,
}

/// Key of the certificate covering all domains of `vhost`
pub fn vhost_storage_key(vhost: &VirtualHost) -> String {
    storage_key(vhost.primary_domain(), &vhost.domains)
}

#[derive(Debug)]
pub struct CertificateLifecycle {
    storage: Arc<dyn FileStorage>,
    now: DateTime<Utc>,
    renewal_window: ChronoDuration,
    pending: BTreeMap<String, VirtualHost>,
}

impl CertificateLifecycle {
    pub fn new(storage: Arc<dyn FileStorage>) -> Self {
        Self {
            storage,
            now: Utc::now(),
            renewal_window: ChronoDuration::zero(),
            pending: BTreeMap::new(),
        }
    }

    /// Evaluate expiry against a fixed instant instead of the construction time
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Certificates expiring within `window` are reported as [`CertificateStatus::Expiring`]
    pub fn with_renewal_window(mut self, window: std::time::Duration) -> Self {
        self.renewal_window = ChronoDuration::from_std(window).unwrap_or(ChronoDuration::zero());
        self
    }

    /// True only if the stored chain and key parse and the leaf's not-after is
    /// strictly after now. Any failure counts as "no valid certificate".
    pub async fn has_valid_certificate(&self, vhost: &VirtualHost) -> bool {
        self.certificate_status(vhost).await.is_usable()
    }

    pub async fn certificate_status(&self, vhost: &VirtualHost) -> CertificateStatus {
        match self.load(vhost).await {
            Ok((info, _, _)) if info.not_after - self.now <= self.renewal_window => {
                CertificateStatus::Expiring { not_after: info.not_after }
            }
            Ok((info, _, _)) => CertificateStatus::Valid { not_after: info.not_after },
            Err(e) => {
                debug!(vhost = %vhost.name, reason = %e, "No usable certificate");
                CertificateStatus::Unavailable { reason: e.to_string() }
            }
        }
    }

    /// Register `vhost` as needing its secret this epoch. No I/O happens here.
    pub fn request_secret_for(&mut self, vhost: &VirtualHost) -> SecretRef {
        let name = vhost_storage_key(vhost);
        self.pending.insert(name.clone(), vhost.clone());
        SecretRef { name }
    }

    /// Names of the secrets registered so far
    pub fn pending(&self) -> impl Iterator<Item = &str> {
        self.pending.keys().map(String::as_str)
    }

    /// Materialize every registered secret, in name order.
    ///
    /// Registrations whose bytes are missing or unusable are skipped with a
    /// warning; the caller drops the matching filter chains.
    pub async fn provide(&self) -> Vec<Secret> {
        let mut secrets = Vec::with_capacity(self.pending.len());

        for (name, vhost) in &self.pending {
            match self.load(vhost).await {
                Ok((_, certificate_chain, private_key)) => {
                    secrets.push(Secret { name: name.clone(), certificate_chain, private_key });
                }
                Err(e) => {
                    warn!(
                        vhost = %vhost.name,
                        secret = %name,
                        error = %e,
                        "Can't find promised certificate; skipping secret"
                    );
                }
            }
        }

        secrets
    }

    async fn load(&self, vhost: &VirtualHost) -> Result<(CertificateInfo, Vec<u8>, Vec<u8>)> {
        if vhost.domains.is_empty() {
            return Err(Error::certificate_unavailable(&vhost.name, "virtual host has no domains"));
        }

        let key = vhost_storage_key(vhost);
        let chain_name = certificate_file_name(&key);
        let chain = self.storage.get_file(&chain_name).await?;
        let private_key = self.storage.get_file(&private_key_file_name(&key)).await?;

        let info = validate_key_pair(&chain_name, &chain, &private_key, self.now)
            .map_err(|e: TlsError| Error::certificate_unavailable(&vhost.name, e.to_string()))?;

        Ok((info, chain, private_key))
    }
}

/// Store a certificate chain and key under the storage key of `domains`
pub async fn store_certificate(
    storage: &dyn FileStorage,
    primary: &str,
    domains: &[String],
    certificate_chain: &[u8],
    private_key: &[u8],
) -> Result<String> {
    let key = storage_key(primary, domains);
    storage.put_file(&certificate_file_name(&key), certificate_chain).await?;
    storage.put_file(&private_key_file_name(&key), private_key).await?;
    Ok(key)
}
