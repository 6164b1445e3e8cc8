//! Route and virtual host domain types

use std::time::Duration;

/// Name of the single route carried by an HTTPS redirect stub
pub const HTTPS_REDIRECT_ROUTE: &str = "https_redirect";

/// What a matched request is handed to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteAction {
    /// Forward to an upstream cluster
    Forward {
        cluster: String,
        /// Literal `Host` header sent upstream, if any
        host_rewrite: Option<String>,
        timeout: Duration,
    },
    /// Answer with a redirect to the same URL over https
    RedirectToHttps,
}

/// A prefix-matched route. Belongs to exactly one [`VirtualHost`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub name: String,
    pub prefix: String,
    pub action: RouteAction,
}

impl Route {
    pub fn forward(
        name: impl Into<String>,
        prefix: impl Into<String>,
        cluster: impl Into<String>,
        host_rewrite: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            prefix: prefix.into(),
            action: RouteAction::Forward { cluster: cluster.into(), host_rewrite, timeout },
        }
    }

    pub fn https_redirect() -> Self {
        Self {
            name: HTTPS_REDIRECT_ROUTE.to_string(),
            prefix: "/".to_string(),
            action: RouteAction::RedirectToHttps,
        }
    }

    /// Cluster this route forwards to, if it forwards at all
    pub fn target_cluster(&self) -> Option<&str> {
        match &self.action {
            RouteAction::Forward { cluster, .. } => Some(cluster),
            RouteAction::RedirectToHttps => None,
        }
    }

    pub fn is_root(&self) -> bool {
        self.prefix == "/"
    }
}

/// A named group of domains and the ordered routes valid for them.
///
/// `domains[0]` is always the primary domain; the name equals the primary
/// domain. Routes are evaluated in order, so more specific prefixes come
/// before the `/` catch-all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualHost {
    pub name: String,
    pub domains: Vec<String>,
    pub routes: Vec<Route>,
}

impl VirtualHost {
    pub fn new(primary_domain: impl Into<String>) -> Self {
        let primary = primary_domain.into();
        Self { name: primary.clone(), domains: vec![primary], routes: Vec::new() }
    }

    pub fn primary_domain(&self) -> &str {
        &self.domains[0]
    }

    /// Alias domains, i.e. every domain except the primary one
    pub fn aliases(&self) -> &[String] {
        &self.domains[1..]
    }

    /// Same domains, single route redirecting every request to https.
    pub fn https_redirect_stub(&self) -> Self {
        Self {
            name: self.name.clone(),
            domains: self.domains.clone(),
            routes: vec![Route::https_redirect()],
        }
    }
}

/// Named set of virtual hosts referenced by a filter chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteConfig {
    pub name: String,
    pub virtual_hosts: Vec<VirtualHost>,
}

impl RouteConfig {
    /// Every cluster referenced by a forwarding route, in route order
    pub fn referenced_clusters(&self) -> impl Iterator<Item = &str> {
        self.virtual_hosts
            .iter()
            .flat_map(|vhost| vhost.routes.iter())
            .filter_map(Route::target_cluster)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_stub_keeps_domains() {
        let mut vhost = VirtualHost::new("a.example.com");
        vhost.domains.push("www.a.example.com".to_string());
        vhost.routes.push(Route::forward("web_route", "/", "web", None, Duration::from_secs(15)));

        let stub = vhost.https_redirect_stub();
        assert_eq!(stub.domains, vhost.domains);
        assert_eq!(stub.routes.len(), 1);
        assert_eq!(stub.routes[0].name, HTTPS_REDIRECT_ROUTE);
        assert_eq!(stub.routes[0].action, RouteAction::RedirectToHttps);
        assert!(stub.routes[0].is_root());
    }

    #[test]
    fn referenced_clusters_skip_redirects() {
        let mut vhost = VirtualHost::new("a.example.com");
        vhost.routes.push(Route::forward("api_route", "/api", "api", None, Duration::ZERO));
        let config = RouteConfig {
            name: "default_http_routes".to_string(),
            virtual_hosts: vec![vhost.clone(), vhost.https_redirect_stub()],
        };

        let clusters: Vec<&str> = config.referenced_clusters().collect();
        assert_eq!(clusters, vec!["api"]);
        assert_eq!(vhost.aliases().len(), 0);
    }
}
