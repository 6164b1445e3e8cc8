//! Background certificate provisioning
//!
//! Builds report virtual hosts whose certificate is missing or about to expire.
//! The provisioner issues and stores a certificate for each of them, one task
//! per domain set, and signals completion so the next epoch can pick it up.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashSet;
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::issuer::CertificateIssuer;
use super::lifecycle::store_certificate;
use crate::errors::{Error, Result};
use crate::observability::MetricsRecorder;
use crate::storage::FileStorage;

/// A domain set that needs a (new) certificate
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProvisioningRequest {
    /// Storage key, which is also the secret name
    pub secret_name: String,
    pub primary_domain: String,
    pub domains: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CertificateProvisioner {
    issuer: Arc<dyn CertificateIssuer>,
    storage: Arc<dyn FileStorage>,
    validity: Duration,
    in_flight: Arc<DashSet<String>>,
}

impl CertificateProvisioner {
    pub fn new(
        issuer: Arc<dyn CertificateIssuer>,
        storage: Arc<dyn FileStorage>,
        validity: Duration,
    ) -> Self {
        Self { issuer, storage, validity, in_flight: Arc::new(DashSet::new()) }
    }

    /// Issue and store one certificate. Returns the storage key written.
    pub async fn provision(&self, request: &ProvisioningRequest) -> Result<String> {
        let validity = ChronoDuration::from_std(self.validity)
            .map_err(|e| Error::config(format!("invalid certificate validity: {}", e)))?;
        let not_after = Utc::now() + validity;

        let issued = self.issuer.issue(&request.domains, not_after).await?;
        let key = store_certificate(
            self.storage.as_ref(),
            &request.primary_domain,
            &request.domains,
            issued.certificate_chain.as_bytes(),
            issued.private_key.as_bytes(),
        )
        .await?;

        info!(
            vhost = %request.primary_domain,
            secret = %key,
            not_after = %issued.not_after,
            "Provisioned certificate"
        );
        Ok(key)
    }

    /// Provision in the background unless the same domain set is already in
    /// progress. `done` receives the secret name after a successful store.
    pub fn spawn(&self, request: ProvisioningRequest, done: mpsc::Sender<String>) -> bool {
        if !self.in_flight.insert(request.secret_name.clone()) {
            return false;
        }

        let provisioner = self.clone();
        tokio::spawn(async move {
            let result = provisioner.provision(&request).await;
            provisioner.in_flight.remove(&request.secret_name);
            match result {
                Ok(key) => {
                    MetricsRecorder::new().record_certificate_provisioned(true);
                    let _ = done.send(key).await;
                }
                Err(e) => {
                    MetricsRecorder::new().record_certificate_provisioned(false);
                    warn!(
                        vhost = %request.primary_domain,
                        secret = %request.secret_name,
                        error = %e,
                        "Certificate provisioning failed; retrying next epoch"
                    );
                }
            }
        });
        true
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::VirtualHost;
    use crate::storage::MemoryStorage;
    use crate::tls::{CertificateLifecycle, LocalCaIssuer};

    #[tokio::test]
    async fn provisioned_certificate_becomes_valid() {
        let storage = Arc::new(MemoryStorage::new());
        let issuer = Arc::new(LocalCaIssuer::generate().expect("CA"));
        let provisioner =
            CertificateProvisioner::new(issuer, storage.clone(), Duration::from_secs(86_400));

        let mut vhost = VirtualHost::new("a.example.com");
        vhost.domains.push("www.a.example.com".to_string());
        let lifecycle = CertificateLifecycle::new(storage.clone());
        assert!(!lifecycle.has_valid_certificate(&vhost).await);

        let request = ProvisioningRequest {
            secret_name: crate::tls::vhost_storage_key(&vhost),
            primary_domain: vhost.primary_domain().to_string(),
            domains: vhost.domains.clone(),
        };
        let key = provisioner.provision(&request).await.expect("provision");

        assert_eq!(key, request.secret_name);
        let lifecycle = CertificateLifecycle::new(storage);
        assert!(lifecycle.has_valid_certificate(&vhost).await);
    }

    #[tokio::test]
    async fn spawn_deduplicates_in_flight_requests() {
        let storage = Arc::new(MemoryStorage::new());
        let issuer = Arc::new(LocalCaIssuer::generate().expect("CA"));
        let provisioner =
            CertificateProvisioner::new(issuer, storage.clone(), Duration::from_secs(3600));
        let (tx, mut rx) = mpsc::channel(4);

        let request = ProvisioningRequest {
            secret_name: "a.example.com-abc".to_string(),
            primary_domain: "a.example.com".to_string(),
            domains: vec!["a.example.com".to_string()],
        };
        provisioner.in_flight.insert(request.secret_name.clone());
        assert!(!provisioner.spawn(request.clone(), tx.clone()));

        provisioner.in_flight.remove(&request.secret_name);
        assert!(provisioner.spawn(request, tx));
        let key = rx.recv().await.expect("provisioned");
        assert!(key.starts_with("a.example.com-"));
        assert_eq!(provisioner.in_flight(), 0);
    }
}
