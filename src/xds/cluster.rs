//! Cluster rendering using envoy-types

use envoy_types::pb::envoy::config::cluster::v3::{
    cluster::{ClusterDiscoveryType, DiscoveryType},
    Cluster, UpstreamConnectionOptions,
};
use envoy_types::pb::envoy::config::core::v3::{
    address::Address as AddressType, socket_address, Address, SocketAddress, TcpKeepalive,
};
use envoy_types::pb::envoy::config::endpoint::v3::{
    lb_endpoint, ClusterLoadAssignment, Endpoint, LbEndpoint, LocalityLbEndpoints,
};
use envoy_types::pb::google::protobuf::UInt32Value;

use crate::domain::{self, DiscoveryMode, Protocol};
use crate::xds::resources::to_duration;

/// Render a domain cluster into an envoy `Cluster`
pub fn render_cluster(cluster: &domain::Cluster) -> Cluster {
    let discovery_type = match cluster.discovery_mode {
        DiscoveryMode::Static => DiscoveryType::Static,
        DiscoveryMode::StrictDns => DiscoveryType::StrictDns,
        DiscoveryMode::LogicalDns => DiscoveryType::LogicalDns,
    };
    let resolves_dns = cluster.discovery_mode != DiscoveryMode::Static;

    let lb_endpoints = cluster.endpoints.iter().map(render_lb_endpoint).collect();

    Cluster {
        name: cluster.name.clone(),
        connect_timeout: Some(to_duration(cluster.connect_timeout)),
        cluster_discovery_type: Some(ClusterDiscoveryType::Type(discovery_type as i32)),
        dns_refresh_rate: resolves_dns.then(|| to_duration(cluster.dns_refresh_rate)),
        respect_dns_ttl: false,
        per_connection_buffer_limit_bytes: Some(UInt32Value {
            value: cluster.per_connection_buffer_limit_bytes,
        }),
        upstream_connection_options: Some(UpstreamConnectionOptions {
            tcp_keepalive: Some(TcpKeepalive {
                keepalive_probes: Some(UInt32Value { value: cluster.keepalive.probes }),
                keepalive_time: Some(UInt32Value { value: cluster.keepalive.time_seconds }),
                keepalive_interval: Some(UInt32Value { value: cluster.keepalive.interval_seconds }),
            }),
            ..Default::default()
        }),
        load_assignment: Some(ClusterLoadAssignment {
            cluster_name: cluster.name.clone(),
            endpoints: vec![LocalityLbEndpoints { lb_endpoints, ..Default::default() }],
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn render_lb_endpoint(endpoint: &domain::Endpoint) -> LbEndpoint {
    let protocol = match endpoint.protocol {
        Protocol::Tcp => socket_address::Protocol::Tcp,
        Protocol::Udp => socket_address::Protocol::Udp,
    };

    LbEndpoint {
        host_identifier: Some(lb_endpoint::HostIdentifier::Endpoint(Endpoint {
            address: Some(socket_address(&endpoint.address, endpoint.port, protocol)),
            ..Default::default()
        })),
        ..Default::default()
    }
}

/// Build an envoy socket address
pub(crate) fn socket_address(host: &str, port: u16, protocol: socket_address::Protocol) -> Address {
    Address {
        address: Some(AddressType::SocketAddress(SocketAddress {
            address: host.to_string(),
            port_specifier: Some(socket_address::PortSpecifier::PortValue(port.into())),
            protocol: protocol as i32,
            ..Default::default()
        })),
    }
}
