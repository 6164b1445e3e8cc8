//! Resource graph builder
//!
//! Turns the total service inventory into one complete resource bundle per
//! epoch: a cluster per accepted service, virtual hosts merged by the
//! [`VirtualHostRegistry`], a plaintext listener, and a TLS listener for the
//! virtual hosts that have a usable certificate.
//!
//! A bad service never fails the build. Entries with invalid labels or
//! conflicting domains are skipped and reported in [`BuildOutput::skipped`].
//! The only hard failure is having nothing to put on the HTTP listener.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use validator::Validate;

use crate::config::Config;
use crate::domain::{Cluster, Endpoint, FilterChain, Listener, Resources, RouteConfig};
use crate::errors::{Error, Result};
use crate::inventory::{Inventory, ServiceLabels};
use crate::observability::MetricsRecorder;
use crate::registry::{RoutingLabel, VirtualHostRegistry};
use crate::storage::FileStorage;
use crate::tls::{vhost_storage_key, CertificateLifecycle, CertificateStatus, ProvisioningRequest};

pub const HTTP_LISTENER_NAME: &str = "http_listener";
pub const HTTPS_LISTENER_NAME: &str = "https_listener";
pub const HTTP_FILTER_CHAIN_NAME: &str = "http";

/// Route configuration name of a plaintext filter chain
pub fn http_route_config_name(chain: &str) -> String {
    format!("{}_http_routes", chain)
}

/// Route configuration name of a TLS filter chain
pub fn https_route_config_name(chain: &str) -> String {
    format!("{}_https_routes", chain)
}

/// Fleet-wide settings the builder needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuilderSettings {
    pub http_port: u16,
    pub https_port: u16,
    /// Certificates expiring within this window are renewed
    pub renewal_window: Duration,
    /// Whether hosts without a usable certificate are queued for provisioning
    pub provision_certificates: bool,
}

impl Default for BuilderSettings {
    fn default() -> Self {
        Self {
            http_port: 80,
            https_port: 443,
            renewal_window: Duration::from_secs(7 * 24 * 3600),
            provision_certificates: true,
        }
    }
}

impl From<&Config> for BuilderSettings {
    fn from(config: &Config) -> Self {
        Self {
            http_port: config.proxy.http_port,
            https_port: config.proxy.https_port,
            renewal_window: config.tls.renewal_window(),
            provision_certificates: config.tls.provision_certificates,
        }
    }
}

/// A service left out of this epoch, with the reason
#[derive(Debug)]
pub struct SkippedService {
    pub service_id: String,
    pub error: Error,
}

/// Result of one build
#[derive(Debug)]
pub struct BuildOutput {
    pub resources: Resources,
    /// Domain sets that need a new certificate
    pub provisioning: Vec<ProvisioningRequest>,
    pub skipped: Vec<SkippedService>,
}

impl BuildOutput {
    /// Primary domains served over TLS in this bundle
    pub fn tls_hosts(&self) -> BTreeSet<&str> {
        self.resources
            .listeners
            .iter()
            .flat_map(|listener| listener.filter_chains.iter())
            .filter(|chain| chain.tls.is_some())
            .map(|chain| chain.name.as_str())
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct ResourceGraphBuilder {
    storage: Arc<dyn FileStorage>,
    settings: BuilderSettings,
}

impl ResourceGraphBuilder {
    pub fn new(storage: Arc<dyn FileStorage>, settings: BuilderSettings) -> Self {
        Self { storage, settings }
    }

    pub fn settings(&self) -> &BuilderSettings {
        &self.settings
    }

    /// Build the full resource bundle for `inventory`.
    ///
    /// Identical inventories yield identical bundles as long as the stored
    /// certificates do not change.
    pub async fn build(&self, inventory: &Inventory) -> Result<BuildOutput> {
        let metrics = MetricsRecorder::new();
        let mut registry = VirtualHostRegistry::new();
        let mut clusters = Vec::new();
        let mut skipped = Vec::new();

        for (service_id, labels) in inventory.iter() {
            if let Err(e) = labels.validate() {
                let error = Error::from(e);
                warn!(service = %service_id, domain = %labels.domain, error = %error, "Skipping service with invalid labels");
                metrics.record_skipped_service("invalid_labels");
                skipped.push(SkippedService { service_id: service_id.to_string(), error });
                continue;
            }

            let cluster = match cluster_for(service_id, labels) {
                Ok(cluster) => cluster,
                Err(error) => {
                    warn!(service = %service_id, error = %error, "Skipping service with unusable endpoint");
                    metrics.record_skipped_service("invalid_labels");
                    skipped.push(SkippedService { service_id: service_id.to_string(), error });
                    continue;
                }
            };

            if let Err(error) = registry.add_service(service_id, &routing_label(labels)) {
                warn!(service = %service_id, domain = %labels.domain, error = %error, "Skipping service route");
                metrics.record_skipped_service("domain_conflict");
                skipped.push(SkippedService { service_id: service_id.to_string(), error });
                continue;
            }

            clusters.push(cluster);
        }

        let vhosts = registry.into_virtual_hosts();
        if vhosts.is_empty() {
            return Err(Error::validation_field(
                "no routable services; the HTTP listener would have no filter chains",
                HTTP_LISTENER_NAME,
            ));
        }

        let mut lifecycle = CertificateLifecycle::new(self.storage.clone())
            .with_renewal_window(self.settings.renewal_window);
        let mut plaintext = Vec::new();
        let mut tls = Vec::new();
        let mut provisioning = Vec::new();

        for vhost in vhosts {
            let status = lifecycle.certificate_status(&vhost).await;

            if status.needs_provisioning() && self.settings.provision_certificates {
                provisioning.push(ProvisioningRequest {
                    secret_name: vhost_storage_key(&vhost),
                    primary_domain: vhost.primary_domain().to_string(),
                    domains: vhost.domains.clone(),
                });
            }

            match status {
                CertificateStatus::Valid { .. } | CertificateStatus::Expiring { .. } => {
                    let secret = lifecycle.request_secret_for(&vhost);
                    tls.push((vhost, secret.name));
                }
                CertificateStatus::Unavailable { reason } => {
                    debug!(vhost = %vhost.name, reason = %reason, "Serving virtual host over plaintext");
                    plaintext.push(vhost);
                }
            }
        }

        let secrets = lifecycle.provide().await;
        let provided: BTreeSet<&str> = secrets.iter().map(|s| s.name.as_str()).collect();

        let mut https_chains = Vec::new();
        let mut routes = Vec::new();
        let mut redirects = Vec::new();

        for (vhost, secret_name) in tls {
            if !provided.contains(secret_name.as_str()) {
                warn!(vhost = %vhost.name, secret = %secret_name, "Certificate vanished; demoting virtual host to plaintext");
                plaintext.push(vhost);
                continue;
            }

            let route_config = https_route_config_name(&vhost.name);
            redirects.push(vhost.https_redirect_stub());
            https_chains.push(FilterChain::tls(
                vhost.name.clone(),
                route_config.clone(),
                secret_name,
                vhost.domains.clone(),
            ));
            routes.push(RouteConfig { name: route_config, virtual_hosts: vec![vhost] });
        }

        let http_route_config = http_route_config_name(HTTP_FILTER_CHAIN_NAME);
        let mut http_vhosts = plaintext;
        http_vhosts.extend(redirects);
        routes.insert(0, RouteConfig { name: http_route_config.clone(), virtual_hosts: http_vhosts });

        let mut listeners = vec![Listener {
            name: HTTP_LISTENER_NAME.to_string(),
            port: self.settings.http_port,
            filter_chains: vec![FilterChain::plaintext(HTTP_FILTER_CHAIN_NAME, http_route_config)],
        }];

        if https_chains.is_empty() {
            debug!("No virtual host has a certificate; omitting the HTTPS listener");
        } else {
            listeners.push(Listener {
                name: HTTPS_LISTENER_NAME.to_string(),
                port: self.settings.https_port,
                filter_chains: https_chains,
            });
        }

        let resources = Resources { clusters, routes, listeners, secrets };

        info!(
            services = inventory.len(),
            skipped = skipped.len(),
            clusters = resources.clusters.len(),
            secrets = resources.secrets.len(),
            provisioning = provisioning.len(),
            "Built resource graph"
        );

        Ok(BuildOutput { resources, provisioning, skipped })
    }
}

fn routing_label(labels: &ServiceLabels) -> RoutingLabel {
    RoutingLabel {
        domain: labels.domain.clone(),
        extra_domains: labels.extra_domains.clone(),
        path_prefix: labels.path_prefix.clone(),
        upstream_host: labels.upstream_host.clone(),
        timeout: labels.timeout(),
    }
}

/// Cluster for one service; the endpoint address defaults to the service id
fn cluster_for(service_id: &str, labels: &ServiceLabels) -> Result<Cluster> {
    let port = u16::try_from(labels.upstream_port).map_err(|_| {
        Error::validation_field(format!("port {} is out of range", labels.upstream_port), "upstream_port")
    })?;
    let address = labels.upstream_host.as_deref().unwrap_or(service_id);

    Ok(Cluster::for_endpoint(service_id, Endpoint::new(address, port, labels.protocol)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DiscoveryMode, RouteAction};
    use crate::inventory::InventoryEvent;
    use crate::storage::MemoryStorage;
    use crate::tls::store_certificate;
    use chrono::{Duration as ChronoDuration, Utc};
    use rcgen::{CertificateParams, KeyPair};

    fn labels(domain: &str, path: &str) -> ServiceLabels {
        ServiceLabels {
            domain: domain.to_string(),
            path_prefix: path.to_string(),
            upstream_port: 8080,
            ..ServiceLabels::default()
        }
    }

    fn inventory(entries: Vec<(&str, ServiceLabels)>) -> Inventory {
        let mut inventory = Inventory::new();
        for (id, labels) in entries {
            inventory.apply(InventoryEvent::added(id, labels));
        }
        inventory
    }

    fn builder(storage: Arc<MemoryStorage>) -> ResourceGraphBuilder {
        ResourceGraphBuilder::new(storage, BuilderSettings::default())
    }

    async fn store_valid_certificate(storage: &MemoryStorage, domains: &[&str]) {
        let domains: Vec<String> = domains.iter().map(|d| d.to_string()).collect();
        let key = KeyPair::generate().expect("key");
        let mut params = CertificateParams::new(domains.clone()).expect("params");
        let not_after = Utc::now() + ChronoDuration::days(30);
        params.not_after =
            time::OffsetDateTime::from_unix_timestamp(not_after.timestamp()).expect("not_after");
        let cert = params.self_signed(&key).expect("self signed");
        store_certificate(
            storage,
            &domains[0],
            &domains,
            cert.pem().as_bytes(),
            key.serialize_pem().as_bytes(),
        )
        .await
        .expect("store");
    }

    #[tokio::test]
    async fn plaintext_only_without_certificates() {
        let builder = builder(Arc::new(MemoryStorage::new()));
        let output = builder
            .build(&inventory(vec![("web", labels("b.example.com", "/"))]))
            .await
            .expect("build");

        let listeners = &output.resources.listeners;
        assert_eq!(listeners.len(), 1);
        assert_eq!(listeners[0].name, HTTP_LISTENER_NAME);
        assert!(output.resources.secrets.is_empty());
        assert_eq!(output.resources.routes[0].virtual_hosts[0].name, "b.example.com");
        assert_eq!(output.provisioning.len(), 1);
        assert_eq!(output.provisioning[0].primary_domain, "b.example.com");
    }

    #[tokio::test]
    async fn provisioning_can_be_disabled() {
        let settings = BuilderSettings { provision_certificates: false, ..BuilderSettings::default() };
        let builder = ResourceGraphBuilder::new(Arc::new(MemoryStorage::new()), settings);
        let output = builder
            .build(&inventory(vec![("web", labels("b.example.com", "/"))]))
            .await
            .expect("build");
        assert!(output.provisioning.is_empty());
    }

    #[tokio::test]
    async fn certificate_moves_host_to_https_listener() {
        let storage = Arc::new(MemoryStorage::new());
        store_valid_certificate(&storage, &["a.example.com"]).await;

        let output = builder(storage)
            .build(&inventory(vec![
                ("api", labels("a.example.com", "/api")),
                ("web", labels("b.example.com", "/")),
            ]))
            .await
            .expect("build");

        let https = output
            .resources
            .listeners
            .iter()
            .find(|l| l.name == HTTPS_LISTENER_NAME)
            .expect("https listener");
        assert_eq!(https.port, 443);
        assert_eq!(https.filter_chains.len(), 1);
        let chain = &https.filter_chains[0];
        assert_eq!(chain.route_config_name, "a.example.com_https_routes");
        assert_eq!(chain.tls.as_ref().map(|t| t.server_names.clone()), Some(vec!["a.example.com".to_string()]));
        assert_eq!(output.resources.secrets.len(), 1);
        assert_eq!(chain.secret_name(), Some(output.resources.secrets[0].name.as_str()));

        let http_routes = &output.resources.routes[0];
        assert_eq!(http_routes.name, "http_http_routes");
        let redirect = http_routes
            .virtual_hosts
            .iter()
            .find(|v| v.name == "a.example.com")
            .expect("redirect stub");
        assert_eq!(redirect.routes.len(), 1);
        assert!(matches!(redirect.routes[0].action, RouteAction::RedirectToHttps));

        assert!(output.tls_hosts().contains("a.example.com"));
        assert!(output.provisioning.is_empty());
        assert!(output.resources.check_consistency().is_ok());
    }

    #[tokio::test]
    async fn invalid_services_are_skipped() {
        let mut no_port = labels("c.example.com", "/");
        no_port.upstream_port = 0;

        let output = builder(Arc::new(MemoryStorage::new()))
            .build(&inventory(vec![
                ("bad-domain", labels("not a domain", "/")),
                ("no-port", no_port),
                ("web", labels("b.example.com", "/")),
            ]))
            .await
            .expect("build");

        assert_eq!(output.skipped.len(), 2);
        assert!(output.skipped.iter().all(|s| matches!(s.error, Error::Validation { .. })));
        assert_eq!(output.resources.clusters.len(), 1);
        assert_eq!(output.resources.clusters[0].name, "web");
    }

    #[tokio::test]
    async fn empty_inventory_fails_the_build() {
        let result = builder(Arc::new(MemoryStorage::new())).build(&Inventory::new()).await;
        assert!(matches!(result, Err(Error::Validation { .. })));
    }

    #[tokio::test]
    async fn endpoint_defaults_to_service_id() {
        let mut pinned = labels("a.example.com", "/");
        pinned.upstream_host = Some("10.0.0.7".to_string());

        let output = builder(Arc::new(MemoryStorage::new()))
            .build(&inventory(vec![("pinned", pinned), ("web", labels("b.example.com", "/"))]))
            .await
            .expect("build");

        let clusters = &output.resources.clusters;
        assert_eq!(clusters[0].name, "pinned");
        assert_eq!(clusters[0].endpoints[0].address, "10.0.0.7");
        assert_eq!(clusters[0].discovery_mode, DiscoveryMode::Static);
        assert_eq!(clusters[1].endpoints[0].address, "web");
        assert_eq!(clusters[1].discovery_mode, DiscoveryMode::StrictDns);
    }
}
