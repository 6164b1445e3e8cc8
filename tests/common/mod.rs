//! Common test utilities for all integration tests.
//!
//! Inventory builders, certificate fixtures and discovery stream helpers.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use edgeplane::builder::{BuilderSettings, ResourceGraphBuilder};
use edgeplane::inventory::{Inventory, InventoryEvent, ServiceLabels};
use edgeplane::storage::FileStorage;
use edgeplane::tls::store_certificate;
use envoy_types::pb::envoy::config::core::v3::Node;
use envoy_types::pb::envoy::service::discovery::v3::{DiscoveryRequest, DiscoveryResponse};
use rcgen::{CertificateParams, KeyPair};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tonic::Status;

pub type Requests = mpsc::Sender<Result<DiscoveryRequest, Status>>;
pub type Responses = ReceiverStream<Result<DiscoveryResponse, Status>>;

pub fn labels(domain: &str, path: &str) -> ServiceLabels {
    ServiceLabels {
        domain: domain.to_string(),
        path_prefix: path.to_string(),
        upstream_port: 8080,
        ..ServiceLabels::default()
    }
}

pub fn inventory(entries: Vec<(&str, ServiceLabels)>) -> Inventory {
    let mut inventory = Inventory::new();
    for (id, labels) in entries {
        inventory.apply(InventoryEvent::added(id, labels));
    }
    inventory
}

pub fn builder(storage: Arc<dyn FileStorage>) -> ResourceGraphBuilder {
    ResourceGraphBuilder::new(storage, BuilderSettings::default())
}

/// Self-signed PEM chain and key for `domains`, expiring at `not_after`
pub fn self_signed(domains: &[&str], not_after: DateTime<Utc>) -> (String, String) {
    let names: Vec<String> = domains.iter().map(|d| d.to_string()).collect();
    let key = KeyPair::generate().expect("generate key");
    let mut params = CertificateParams::new(names).expect("certificate params");
    params.not_before = time::OffsetDateTime::from_unix_timestamp(
        (not_after - chrono::Duration::days(30)).timestamp(),
    )
    .expect("not_before");
    params.not_after =
        time::OffsetDateTime::from_unix_timestamp(not_after.timestamp()).expect("not_after");
    let cert = params.self_signed(&key).expect("self signed");
    (cert.pem(), key.serialize_pem())
}

/// Store a certificate covering `domains` under its storage key
pub async fn store_certificate_for(
    storage: &dyn FileStorage,
    domains: &[&str],
    not_after: DateTime<Utc>,
) -> String {
    let (chain, key) = self_signed(domains, not_after);
    let names: Vec<String> = domains.iter().map(|d| d.to_string()).collect();
    store_certificate(storage, domains[0], &names, chain.as_bytes(), key.as_bytes())
        .await
        .expect("store certificate")
}

pub fn request(type_url: &str, version: &str, nonce: &str) -> DiscoveryRequest {
    DiscoveryRequest {
        version_info: version.to_string(),
        response_nonce: nonce.to_string(),
        type_url: type_url.to_string(),
        node: Some(Node {
            id: "envoy-1".to_string(),
            cluster: "edge".to_string(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub async fn next_response(responses: &mut Responses) -> DiscoveryResponse {
    tokio::time::timeout(Duration::from_secs(2), responses.next())
        .await
        .expect("response in time")
        .expect("stream open")
        .expect("ok response")
}

pub async fn assert_silent(responses: &mut Responses) {
    let next = tokio::time::timeout(Duration::from_millis(150), responses.next()).await;
    assert!(next.is_err(), "unexpected response: {:?}", next);
}
