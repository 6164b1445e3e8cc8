//! Wire encoding of resource bundles
//!
//! Renders the domain model into envoy messages wrapped in `Any`, keyed by
//! resource type, so the discovery server only ever copies bytes.

use std::collections::HashMap;

use envoy_types::pb::google::protobuf::{Any, Duration};
use prost::Message;
use tracing::debug;

use crate::domain::{ResourceType, Resources};
use crate::xds::{
    cluster::render_cluster, listener::render_listener, route::render_route_config,
    secret::render_secret,
};

pub const CLUSTER_TYPE_URL: &str = "type.googleapis.com/envoy.config.cluster.v3.Cluster";
pub const ROUTE_TYPE_URL: &str = "type.googleapis.com/envoy.config.route.v3.RouteConfiguration";
pub const LISTENER_TYPE_URL: &str = "type.googleapis.com/envoy.config.listener.v3.Listener";
pub const SECRET_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.Secret";

/// Type URL of a resource type
pub fn type_url(resource_type: ResourceType) -> &'static str {
    match resource_type {
        ResourceType::Cluster => CLUSTER_TYPE_URL,
        ResourceType::Route => ROUTE_TYPE_URL,
        ResourceType::Listener => LISTENER_TYPE_URL,
        ResourceType::Secret => SECRET_TYPE_URL,
    }
}

/// Resource type served under a type URL, if any
pub fn resource_type(type_url: &str) -> Option<ResourceType> {
    match type_url {
        CLUSTER_TYPE_URL => Some(ResourceType::Cluster),
        ROUTE_TYPE_URL => Some(ResourceType::Route),
        LISTENER_TYPE_URL => Some(ResourceType::Listener),
        SECRET_TYPE_URL => Some(ResourceType::Secret),
        _ => None,
    }
}

/// Wrapper for a built Envoy resource along with its name.
#[derive(Clone, Debug, PartialEq)]
pub struct BuiltResource {
    pub name: String,
    pub resource: Any,
}

impl BuiltResource {
    fn encode<M: Message>(name: &str, type_url: &str, message: &M) -> Self {
        Self { name: name.to_string(), resource: any_from_message(type_url, message) }
    }

    pub fn into_any(self) -> Any {
        self.resource
    }

    pub fn type_url(&self) -> &str {
        &self.resource.type_url
    }
}

/// Encoded resources of one bundle, grouped by type in bundle order
#[derive(Clone, Debug, Default)]
pub struct RenderedResources {
    by_type: HashMap<ResourceType, Vec<BuiltResource>>,
}

impl RenderedResources {
    /// Render a bundle. `server_name` ends up in every connection manager.
    pub fn render(resources: &Resources, server_name: &str) -> Self {
        let mut by_type = HashMap::new();

        by_type.insert(
            ResourceType::Cluster,
            resources
                .clusters
                .iter()
                .map(|c| BuiltResource::encode(&c.name, CLUSTER_TYPE_URL, &render_cluster(c)))
                .collect(),
        );
        by_type.insert(
            ResourceType::Route,
            resources
                .routes
                .iter()
                .map(|r| BuiltResource::encode(&r.name, ROUTE_TYPE_URL, &render_route_config(r)))
                .collect(),
        );
        by_type.insert(
            ResourceType::Listener,
            resources
                .listeners
                .iter()
                .map(|l| {
                    BuiltResource::encode(&l.name, LISTENER_TYPE_URL, &render_listener(l, server_name))
                })
                .collect(),
        );
        by_type.insert(
            ResourceType::Secret,
            resources
                .secrets
                .iter()
                .map(|s| BuiltResource::encode(&s.name, SECRET_TYPE_URL, &render_secret(s)))
                .collect(),
        );

        debug!(
            clusters = resources.clusters.len(),
            routes = resources.routes.len(),
            listeners = resources.listeners.len(),
            secrets = resources.secrets.len(),
            "Rendered resource bundle"
        );

        Self { by_type }
    }

    pub fn get(&self, resource_type: ResourceType) -> &[BuiltResource] {
        self.by_type.get(&resource_type).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Resources of one type, restricted to `names` unless it is empty
    pub fn select(&self, resource_type: ResourceType, names: &[String]) -> Vec<BuiltResource> {
        let resources = self.get(resource_type);
        if names.is_empty() {
            return resources.to_vec();
        }
        resources.iter().filter(|r| names.contains(&r.name)).cloned().collect()
    }
}

pub fn any_from_message<M: Message>(type_url: &str, message: &M) -> Any {
    Any { type_url: type_url.to_string(), value: message.encode_to_vec() }
}

pub fn to_duration(duration: std::time::Duration) -> Duration {
    Duration {
        seconds: i64::try_from(duration.as_secs()).unwrap_or(i64::MAX),
        nanos: i32::try_from(duration.subsec_nanos()).unwrap_or(0),
    }
}
