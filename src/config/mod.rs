//! # Configuration Management
//!
//! Defines the configuration structure for the edgeplane control plane. The
//! binary assembles a [`Config`] from command line flags and environment
//! variables; the core only ever sees the finished value.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::errors::{Error, Result};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
pub struct Config {
    /// Discovery server configuration
    #[validate(nested)]
    pub xds: XdsConfig,

    /// Fleet listener configuration
    #[validate(nested)]
    pub proxy: ProxyConfig,

    /// Certificate storage configuration
    #[validate(nested)]
    pub storage: StorageConfig,

    /// Rebuild scheduling
    #[validate(nested)]
    pub epoch: EpochConfig,

    /// Certificate provisioning
    #[validate(nested)]
    pub tls: TlsConfig,

    /// Service inventory source
    #[validate(nested)]
    pub inventory: InventoryConfig,

    /// Logging and metrics
    #[validate(nested)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(|e| Error::config(e.to_string()))?;
        self.validate_custom()
    }

    fn validate_custom(&self) -> Result<()> {
        if self.proxy.http_port == self.proxy.https_port {
            return Err(Error::config("HTTP and HTTPS listener ports cannot be the same"));
        }

        if self.observability.metrics_port == Some(self.xds.port) {
            return Err(Error::config("Metrics and xDS ports cannot be the same"));
        }

        self.xds.socket_addr()?;

        if self.tls.renewal_window() >= self.tls.validity() {
            return Err(Error::config(
                "Certificate renewal window must be shorter than the certificate validity",
            ));
        }

        Ok(())
    }
}

/// xDS server configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct XdsConfig {
    #[validate(length(min = 1, message = "xDS bind address cannot be empty"))]
    pub bind_address: String,

    #[validate(range(min = 1, max = 65535, message = "xDS port must be between 1 and 65535"))]
    pub port: u16,

    /// Reported in every response as `control_plane.identifier`
    #[validate(length(min = 1, message = "Control plane identifier cannot be empty"))]
    pub control_plane_id: String,

    #[validate(range(min = 1, message = "Keepalive interval must be at least 1 second"))]
    pub keepalive_interval_seconds: u64,

    #[validate(range(min = 1, message = "Keepalive timeout must be at least 1 second"))]
    pub keepalive_timeout_seconds: u64,

    #[validate(range(min = 1, message = "Max concurrent streams must be at least 1"))]
    pub max_concurrent_streams: u32,
}

impl Default for XdsConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 18000,
            control_plane_id: crate::control_plane_id(),
            keepalive_interval_seconds: 30,
            keepalive_timeout_seconds: 5,
            max_concurrent_streams: 1024,
        }
    }
}

impl XdsConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.bind_address()
            .parse()
            .map_err(|e| Error::config(format!("Invalid xDS bind address '{}': {}", self.bind_address(), e)))
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_seconds)
    }

    pub fn keepalive_timeout(&self) -> Duration {
        Duration::from_secs(self.keepalive_timeout_seconds)
    }
}

/// How a connecting proxy is mapped to a consumer identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum NodeHash {
    /// Every proxy shares one identity
    Static(String),
    NodeId,
    NodeCluster,
}

impl Default for NodeHash {
    fn default() -> Self {
        NodeHash::Static("ingress".to_string())
    }
}

impl NodeHash {
    /// Resolve the consumer identity for a node
    pub fn consumer_id(&self, node_id: &str, node_cluster: &str) -> String {
        match self {
            NodeHash::Static(id) => id.clone(),
            NodeHash::NodeId => node_id.to_string(),
            NodeHash::NodeCluster => node_cluster.to_string(),
        }
    }

    /// The identities to install snapshots for before any proxy connects
    pub fn static_consumer(&self) -> Option<&str> {
        match self {
            NodeHash::Static(id) => Some(id),
            _ => None,
        }
    }
}

impl FromStr for NodeHash {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "node-id" => Ok(NodeHash::NodeId),
            "node-cluster" => Ok(NodeHash::NodeCluster),
            other => match other.strip_prefix("static:") {
                Some(id) if !id.is_empty() => Ok(NodeHash::Static(id.to_string())),
                _ => Err(Error::config(format!(
                    "Invalid node hash '{}': expected 'static:<id>', 'node-id' or 'node-cluster'",
                    value
                ))),
            },
        }
    }
}

impl TryFrom<String> for NodeHash {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<NodeHash> for String {
    fn from(value: NodeHash) -> Self {
        value.to_string()
    }
}

impl fmt::Display for NodeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeHash::Static(id) => write!(f, "static:{}", id),
            NodeHash::NodeId => f.write_str("node-id"),
            NodeHash::NodeCluster => f.write_str("node-cluster"),
        }
    }
}

/// Ports and identity of the proxy fleet
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ProxyConfig {
    #[validate(range(min = 1, max = 65535, message = "HTTP port must be between 1 and 65535"))]
    pub http_port: u16,

    #[validate(range(min = 1, max = 65535, message = "HTTPS port must be between 1 and 65535"))]
    pub https_port: u16,

    pub node_hash: NodeHash,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self { http_port: 80, https_port: 443, node_hash: NodeHash::default() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct StorageConfig {
    /// Directory holding `<key>.pem` / `<key>.key` pairs and the local CA
    pub directory: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { directory: PathBuf::from("./data/certs") }
    }
}

/// Rebuild scheduling
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct EpochConfig {
    #[validate(range(min = 1, max = 300, message = "Build timeout must be between 1 and 300 seconds"))]
    pub build_timeout_seconds: u64,

    #[validate(range(min = 1, message = "Rebuild interval must be at least 1 second"))]
    pub rebuild_interval_seconds: u64,
}

impl Default for EpochConfig {
    fn default() -> Self {
        Self { build_timeout_seconds: 30, rebuild_interval_seconds: 30 }
    }
}

impl EpochConfig {
    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_seconds)
    }

    pub fn rebuild_interval(&self) -> Duration {
        Duration::from_secs(self.rebuild_interval_seconds)
    }
}

/// Certificate provisioning settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TlsConfig {
    /// Issue missing certificates with the local CA
    pub provision_certificates: bool,

    #[validate(range(min = 1, max = 825, message = "Certificate validity must be between 1 and 825 days"))]
    pub validity_days: u32,

    pub renewal_window_days: u32,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self { provision_certificates: true, validity_days: 90, renewal_window_days: 7 }
    }
}

impl TlsConfig {
    pub fn validity(&self) -> Duration {
        days(self.validity_days)
    }

    pub fn renewal_window(&self) -> Duration {
        days(self.renewal_window_days)
    }
}

fn days(count: u32) -> Duration {
    Duration::from_secs(u64::from(count) * 24 * 60 * 60)
}

/// Service inventory file
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct InventoryConfig {
    pub path: PathBuf,

    #[validate(range(min = 1, message = "Inventory poll interval must be at least 1 second"))]
    pub poll_interval_seconds: u64,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self { path: PathBuf::from("./services.yaml"), poll_interval_seconds: 5 }
    }
}

impl InventoryConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ObservabilityConfig {
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub log_level: String,

    pub json_logging: bool,

    #[validate(length(min = 1, message = "Service name cannot be empty"))]
    pub service_name: String,

    /// Prometheus exporter port; metrics are not exported when unset
    pub metrics_port: Option<u16>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logging: false,
            service_name: crate::APP_NAME.to_string(),
            metrics_port: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.xds.port, 18000);
        assert_eq!(config.proxy.http_port, 80);
        assert_eq!(config.proxy.https_port, 443);
        assert_eq!(config.epoch.build_timeout(), Duration::from_secs(30));
        assert!(config.xds.control_plane_id.starts_with("edgeplane/"));
    }

    #[test]
    fn conflicting_listener_ports_are_rejected() {
        let mut config = Config::default();
        config.proxy.https_port = config.proxy.http_port;
        assert!(matches!(config.validate(), Err(Error::Config { .. })));
    }

    #[test]
    fn zero_build_timeout_is_rejected() {
        let mut config = Config::default();
        config.epoch.build_timeout_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn renewal_window_must_fit_inside_validity() {
        let mut config = Config::default();
        config.tls.renewal_window_days = 90;
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_bind_address_is_rejected() {
        let mut config = Config::default();
        config.xds.bind_address = "not an address".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn node_hash_parsing() {
        assert_eq!("static:edge".parse::<NodeHash>().unwrap(), NodeHash::Static("edge".into()));
        assert_eq!("node-id".parse::<NodeHash>().unwrap(), NodeHash::NodeId);
        assert_eq!("node-cluster".parse::<NodeHash>().unwrap(), NodeHash::NodeCluster);
        assert!("static:".parse::<NodeHash>().is_err());
        assert!("hostname".parse::<NodeHash>().is_err());
        assert_eq!(NodeHash::default().to_string(), "static:ingress");
    }

    #[test]
    fn node_hash_resolves_consumer() {
        assert_eq!(NodeHash::default().consumer_id("envoy-1", "edge"), "ingress");
        assert_eq!(NodeHash::NodeId.consumer_id("envoy-1", "edge"), "envoy-1");
        assert_eq!(NodeHash::NodeCluster.consumer_id("envoy-1", "edge"), "edge");
        assert_eq!(NodeHash::NodeId.static_consumer(), None);
    }

    #[test]
    fn config_round_trips_through_serde() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"node_hash\":\"static:ingress\""));
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.proxy.node_hash, config.proxy.node_hash);
    }
}
