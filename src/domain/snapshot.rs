//! Resource bundles and snapshots

use std::collections::HashSet;
use std::fmt;

use super::{Cluster, Listener, RouteConfig, Secret};

/// Resource types distributed to proxies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceType {
    Cluster,
    Route,
    Listener,
    Secret,
}

impl ResourceType {
    /// All types, in the order proxies should apply them
    pub const ALL: [ResourceType; 4] =
        [ResourceType::Cluster, ResourceType::Secret, ResourceType::Listener, ResourceType::Route];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Cluster => "cluster",
            ResourceType::Route => "route",
            ResourceType::Listener => "listener",
            ResourceType::Secret => "secret",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Complete resource set produced by one epoch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resources {
    pub clusters: Vec<Cluster>,
    pub routes: Vec<RouteConfig>,
    pub listeners: Vec<Listener>,
    pub secrets: Vec<Secret>,
}

impl Resources {
    /// Names of the resources of one type, in bundle order
    pub fn names(&self, resource_type: ResourceType) -> Vec<&str> {
        match resource_type {
            ResourceType::Cluster => self.clusters.iter().map(|c| c.name.as_str()).collect(),
            ResourceType::Route => self.routes.iter().map(|r| r.name.as_str()).collect(),
            ResourceType::Listener => self.listeners.iter().map(|l| l.name.as_str()).collect(),
            ResourceType::Secret => self.secrets.iter().map(|s| s.name.as_str()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.clusters.len() + self.routes.len() + self.listeners.len() + self.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Verify that every cross-resource reference resolves inside this bundle.
    ///
    /// Checks that names are unique per type, that every forwarding route
    /// targets a present cluster, and that every filter chain references a
    /// present route configuration and (when terminating TLS) a present secret.
    pub fn check_consistency(&self) -> std::result::Result<(), String> {
        for resource_type in ResourceType::ALL {
            let mut seen = HashSet::new();
            for name in self.names(resource_type) {
                if !seen.insert(name) {
                    return Err(format!("duplicate {} name '{}'", resource_type, name));
                }
            }
        }

        let clusters: HashSet<&str> = self.names(ResourceType::Cluster).into_iter().collect();
        let routes: HashSet<&str> = self.names(ResourceType::Route).into_iter().collect();
        let secrets: HashSet<&str> = self.names(ResourceType::Secret).into_iter().collect();

        for route_config in &self.routes {
            for cluster in route_config.referenced_clusters() {
                if !clusters.contains(cluster) {
                    return Err(format!(
                        "route configuration '{}' references unknown cluster '{}'",
                        route_config.name, cluster
                    ));
                }
            }
        }

        for listener in &self.listeners {
            for chain in &listener.filter_chains {
                if !routes.contains(chain.route_config_name.as_str()) {
                    return Err(format!(
                        "filter chain '{}' of listener '{}' references unknown route configuration '{}'",
                        chain.name, listener.name, chain.route_config_name
                    ));
                }
                if let Some(secret) = chain.secret_name() {
                    if !secrets.contains(secret) {
                        return Err(format!(
                            "filter chain '{}' of listener '{}' references unknown secret '{}'",
                            chain.name, listener.name, secret
                        ));
                    }
                }
            }
        }

        Ok(())
    }
}

/// Immutable, versioned resource bundle for one consumer identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub version: String,
    pub resources: Resources,
}

impl Snapshot {
    pub fn new(version: impl Into<String>, resources: Resources) -> Self {
        Self { version: version.into(), resources }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Endpoint, FilterChain, Protocol, Route, VirtualHost};
    use std::time::Duration;

    fn bundle_with_route_to(cluster: &str) -> Resources {
        let mut vhost = VirtualHost::new("a.example.com");
        vhost.routes.push(Route::forward("web_route", "/", cluster, None, Duration::from_secs(15)));

        Resources {
            clusters: vec![Cluster::for_endpoint("web", Endpoint::new("web", 80, Protocol::Tcp))],
            routes: vec![RouteConfig {
                name: "default_http_routes".to_string(),
                virtual_hosts: vec![vhost],
            }],
            listeners: vec![Listener {
                name: "http_listener".to_string(),
                port: 80,
                filter_chains: vec![FilterChain::plaintext("default", "default_http_routes")],
            }],
            secrets: vec![],
        }
    }

    #[test]
    fn consistent_bundle_passes() {
        assert!(bundle_with_route_to("web").check_consistency().is_ok());
    }

    #[test]
    fn dangling_cluster_reference_is_rejected() {
        let err = bundle_with_route_to("missing").check_consistency().unwrap_err();
        assert!(err.contains("unknown cluster 'missing'"));
    }

    #[test]
    fn dangling_secret_reference_is_rejected() {
        let mut bundle = bundle_with_route_to("web");
        bundle.listeners[0].filter_chains.push(FilterChain::tls(
            "a.example.com",
            "default_http_routes",
            "a.example.com-xyz",
            vec!["a.example.com".to_string()],
        ));

        let err = bundle.check_consistency().unwrap_err();
        assert!(err.contains("unknown secret"));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut bundle = bundle_with_route_to("web");
        let duplicate = bundle.clusters[0].clone();
        bundle.clusters.push(duplicate);

        let err = bundle.check_consistency().unwrap_err();
        assert!(err.contains("duplicate cluster name 'web'"));
    }
}
