//! Certificate lookup, expiry and provisioning against real storage backends.

mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};
use edgeplane::domain::VirtualHost;
use edgeplane::storage::{DiskStorage, FileStorage, MemoryStorage};
use edgeplane::tls::{
    vhost_storage_key, CertificateLifecycle, CertificateProvisioner, LocalCaIssuer,
    ProvisioningRequest,
};
use tokio::sync::mpsc;

use common::{builder, inventory, labels, store_certificate_for};

fn vhost(domains: &[&str]) -> VirtualHost {
    let mut vhost = VirtualHost::new(domains[0]);
    vhost.domains.extend(domains[1..].iter().map(|d| d.to_string()));
    vhost
}

#[tokio::test]
async fn expired_certificate_is_not_valid() {
    let storage = Arc::new(MemoryStorage::new());
    store_certificate_for(storage.as_ref(), &["a.example.com"], Utc::now() - Duration::seconds(5)).await;

    let lifecycle = CertificateLifecycle::new(storage);
    assert!(!lifecycle.has_valid_certificate(&vhost(&["a.example.com"])).await);
}

#[tokio::test]
async fn certificate_valid_for_a_few_more_seconds_is_valid() {
    let storage = Arc::new(MemoryStorage::new());
    let now = Utc::now();
    store_certificate_for(storage.as_ref(), &["a.example.com"], now + Duration::seconds(2)).await;

    let lifecycle = CertificateLifecycle::new(storage).at(now);
    assert!(lifecycle.has_valid_certificate(&vhost(&["a.example.com"])).await);
}

#[tokio::test]
async fn missing_certificate_is_reported_without_error() {
    let lifecycle = CertificateLifecycle::new(Arc::new(MemoryStorage::new()));
    assert!(!lifecycle.has_valid_certificate(&vhost(&["nothing.example.com"])).await);
}

#[tokio::test]
async fn garbage_in_storage_counts_as_missing() {
    let storage = Arc::new(MemoryStorage::new());
    let host = vhost(&["a.example.com"]);
    let key = vhost_storage_key(&host);
    storage.put_file(&format!("{}.pem", key), b"not a certificate").await.unwrap();
    storage.put_file(&format!("{}.key", key), b"not a key").await.unwrap();

    let lifecycle = CertificateLifecycle::new(storage);
    assert!(!lifecycle.has_valid_certificate(&host).await);
}

#[tokio::test]
async fn disk_storage_serves_certificates_to_the_builder() {
    let dir = tempfile::tempdir().expect("tempdir");
    let storage = Arc::new(DiskStorage::open(dir.path().join("certs")).await.expect("open"));
    store_certificate_for(storage.as_ref(), &["a.example.com"], Utc::now() + Duration::days(30)).await;

    let output = builder(storage)
        .build(&inventory(vec![("web", labels("a.example.com", "/"))]))
        .await
        .expect("build");

    assert!(output.tls_hosts().contains("a.example.com"));
    assert_eq!(output.resources.secrets.len(), 1);
}

#[tokio::test]
async fn provisioned_certificate_is_picked_up_by_the_next_build() {
    let dir = tempfile::tempdir().expect("tempdir");
    let storage: Arc<dyn FileStorage> = Arc::new(DiskStorage::open(dir.path()).await.expect("open"));
    let issuer = LocalCaIssuer::load_or_create(storage.as_ref()).await.expect("ca");
    let provisioner =
        CertificateProvisioner::new(Arc::new(issuer), storage.clone(), std::time::Duration::from_secs(90 * 24 * 3600));

    let services = inventory(vec![("web", labels("b.example.com", "/"))]);
    let builder = builder(storage.clone());

    let first = builder.build(&services).await.expect("first build");
    assert!(first.tls_hosts().is_empty());
    let request: ProvisioningRequest = first.provisioning[0].clone();

    let (done_tx, mut done_rx) = mpsc::channel(1);
    assert!(provisioner.spawn(request.clone(), done_tx));
    let stored = tokio::time::timeout(std::time::Duration::from_secs(10), done_rx.recv())
        .await
        .expect("provisioned in time");
    assert_eq!(stored, Some(request.secret_name.clone()));

    let second = builder.build(&services).await.expect("second build");
    assert!(second.tls_hosts().contains("b.example.com"));
    assert!(second.provisioning.is_empty());
    assert_eq!(second.resources.secrets[0].name, request.secret_name);
}
