//! Cluster domain types
//!
//! Upstream clusters synthesized from service inventory entries.

use std::net::IpAddr;
use std::time::Duration;

/// Upstream connect timeout applied to every synthesized cluster.
pub const UPSTREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// DNS re-resolution interval. Slightly below the orchestrator's default
/// update delay so at most one second of drain time is lost.
pub const DNS_REFRESH_RATE: Duration = Duration::from_secs(4);

/// Per-connection buffer limit (32 KiB).
pub const PER_CONNECTION_BUFFER_LIMIT_BYTES: u32 = 32_768;

/// Transport protocol of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl Protocol {
    /// Parse a protocol label. Anything that is not `udp` (case-insensitive) is TCP.
    pub fn from_label(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("udp") {
            Protocol::Udp
        } else {
            Protocol::Tcp
        }
    }
}

/// Health status of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    #[default]
    Unknown,
}

/// A single upstream address. Owned by exactly one [`Cluster`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// Hostname or literal IP address
    pub address: String,
    pub port: u16,
    pub protocol: Protocol,
    pub health: HealthStatus,
}

impl Endpoint {
    pub fn new(address: impl Into<String>, port: u16, protocol: Protocol) -> Self {
        Self { address: address.into(), port, protocol, health: HealthStatus::Unknown }
    }

    /// Whether the address is a literal IPv4/IPv6 address rather than a hostname
    pub fn is_ip_literal(&self) -> bool {
        self.address.parse::<IpAddr>().is_ok()
    }
}

/// How the proxy resolves the endpoints of a cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiscoveryMode {
    Static,
    StrictDns,
    LogicalDns,
}

/// Upstream TCP keepalive parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TcpKeepalive {
    pub probes: u32,
    pub time_seconds: u32,
    pub interval_seconds: u32,
}

impl Default for TcpKeepalive {
    fn default() -> Self {
        Self { probes: 3, time_seconds: 3600, interval_seconds: 60 }
    }
}

/// Upstream cluster. Replaced wholesale each epoch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cluster {
    /// Cluster name (unique within a snapshot)
    pub name: String,
    pub discovery_mode: DiscoveryMode,
    pub endpoints: Vec<Endpoint>,
    pub connect_timeout: Duration,
    pub dns_refresh_rate: Duration,
    pub per_connection_buffer_limit_bytes: u32,
    pub keepalive: TcpKeepalive,
}

impl Cluster {
    /// Build a cluster around one endpoint.
    ///
    /// Literal IP endpoints are served as `STATIC`; hostnames are resolved
    /// with `STRICT_DNS` so scaled replicas behind one name are all used.
    pub fn for_endpoint(name: impl Into<String>, endpoint: Endpoint) -> Self {
        let discovery_mode =
            if endpoint.is_ip_literal() { DiscoveryMode::Static } else { DiscoveryMode::StrictDns };

        Self {
            name: name.into(),
            discovery_mode,
            endpoints: vec![endpoint],
            connect_timeout: UPSTREAM_CONNECT_TIMEOUT,
            dns_refresh_rate: DNS_REFRESH_RATE,
            per_connection_buffer_limit_bytes: PER_CONNECTION_BUFFER_LIMIT_BYTES,
            keepalive: TcpKeepalive::default(),
        }
    }
}
