//! Route configuration rendering using envoy-types

use envoy_types::pb::envoy::config::route::v3::{
    redirect_action::SchemeRewriteSpecifier, route::Action, route_action::ClusterSpecifier,
    route_action::HostRewriteSpecifier, route_match::PathSpecifier, RedirectAction, Route,
    RouteAction, RouteConfiguration, RouteMatch, VirtualHost,
};

use crate::domain::{self, RouteConfig};
use crate::xds::resources::to_duration;

/// Render a named route configuration
pub fn render_route_config(route_config: &RouteConfig) -> RouteConfiguration {
    RouteConfiguration {
        name: route_config.name.clone(),
        virtual_hosts: route_config.virtual_hosts.iter().map(render_virtual_host).collect(),
        ..Default::default()
    }
}

fn render_virtual_host(vhost: &domain::VirtualHost) -> VirtualHost {
    VirtualHost {
        name: vhost.name.clone(),
        domains: vhost.domains.clone(),
        routes: vhost.routes.iter().map(render_route).collect(),
        ..Default::default()
    }
}

fn render_route(route: &domain::Route) -> Route {
    let action = match &route.action {
        domain::RouteAction::Forward { cluster, host_rewrite, timeout } => {
            #[allow(deprecated)]
            let route_action = RouteAction {
                cluster_specifier: Some(ClusterSpecifier::Cluster(cluster.clone())),
                host_rewrite_specifier: host_rewrite
                    .clone()
                    .map(HostRewriteSpecifier::HostRewriteLiteral),
                // Idle timeout tracks the route timeout.
                timeout: Some(to_duration(*timeout)),
                idle_timeout: Some(to_duration(*timeout)),
                ..Default::default()
            };
            Action::Route(route_action)
        }
        domain::RouteAction::RedirectToHttps => Action::Redirect(RedirectAction {
            scheme_rewrite_specifier: Some(SchemeRewriteSpecifier::HttpsRedirect(true)),
            ..Default::default()
        }),
    };

    Route {
        name: route.name.clone(),
        r#match: Some(RouteMatch {
            path_specifier: Some(PathSpecifier::Prefix(route.prefix.clone())),
            ..Default::default()
        }),
        action: Some(action),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn route_config() -> RouteConfig {
        let mut vhost = domain::VirtualHost::new("a.example.com");
        vhost.domains.push("www.a.example.com".to_string());
        vhost.routes.push(domain::Route::forward(
            "api_route",
            "/api",
            "api",
            Some("api.internal".to_string()),
            Duration::from_secs(30),
        ));
        vhost.routes.push(domain::Route::forward("web_route", "/", "web", None, Duration::from_secs(15)));

        let secure = domain::VirtualHost::new("b.example.com").https_redirect_stub();

        RouteConfig { name: "http_http_routes".to_string(), virtual_hosts: vec![vhost, secure] }
    }

    #[test]
    fn routes_keep_order_and_prefix_match() {
        let rendered = render_route_config(&route_config());
        assert_eq!(rendered.name, "http_http_routes");

        let vhost = &rendered.virtual_hosts[0];
        assert_eq!(vhost.domains, vec!["a.example.com", "www.a.example.com"]);
        let prefixes: Vec<_> = vhost
            .routes
            .iter()
            .map(|route| match route.r#match.as_ref().and_then(|m| m.path_specifier.as_ref()) {
                Some(PathSpecifier::Prefix(prefix)) => prefix.clone(),
                other => panic!("unexpected path specifier {:?}", other),
            })
            .collect();
        assert_eq!(prefixes, vec!["/api", "/"]);
    }

    #[test]
    fn forward_route_sets_host_rewrite_and_timeouts() {
        let rendered = render_route_config(&route_config());
        let route = &rendered.virtual_hosts[0].routes[0];

        match route.action.as_ref() {
            Some(Action::Route(action)) => {
                assert_eq!(action.cluster_specifier, Some(ClusterSpecifier::Cluster("api".into())));
                assert_eq!(
                    action.host_rewrite_specifier,
                    Some(HostRewriteSpecifier::HostRewriteLiteral("api.internal".into()))
                );
                assert_eq!(action.timeout.as_ref().map(|d| d.seconds), Some(30));
                assert_eq!(action.idle_timeout.as_ref().map(|d| d.seconds), Some(30));
            }
            other => panic!("unexpected action {:?}", other),
        }

        match rendered.virtual_hosts[0].routes[1].action.as_ref() {
            Some(Action::Route(action)) => assert!(action.host_rewrite_specifier.is_none()),
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn redirect_stub_renders_https_redirect() {
        let rendered = render_route_config(&route_config());
        let stub = &rendered.virtual_hosts[1];

        assert_eq!(stub.routes.len(), 1);
        assert_eq!(stub.routes[0].name, "https_redirect");
        match stub.routes[0].action.as_ref() {
            Some(Action::Redirect(redirect)) => assert_eq!(
                redirect.scheme_rewrite_specifier,
                Some(SchemeRewriteSpecifier::HttpsRedirect(true))
            ),
            other => panic!("unexpected action {:?}", other),
        }
    }
}
