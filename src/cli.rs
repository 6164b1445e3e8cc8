//! # Command Line Interface
//!
//! Host-process flags of the `edgeplane` binary. Every flag can also be set
//! through an `EDGEPLANE_*` environment variable (or a `.env` file).

use std::path::PathBuf;

use clap::Parser;

use crate::config::{Config, NodeHash};

#[derive(Debug, Parser)]
#[command(name = "edgeplane")]
#[command(about = "Dynamic configuration control plane for an Envoy ingress fleet")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Address the discovery server binds to
    #[arg(long, env = "EDGEPLANE_XDS_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub xds_bind_address: String,

    /// Port of the discovery server
    #[arg(long, env = "EDGEPLANE_XDS_PORT", default_value_t = 18000)]
    pub xds_port: u16,

    /// Identifier sent to proxies in every response
    #[arg(long, env = "EDGEPLANE_CONTROL_PLANE_ID")]
    pub control_plane_id: Option<String>,

    /// HTTP listener port of the proxies
    #[arg(long, env = "EDGEPLANE_HTTP_PORT", default_value_t = 80)]
    pub http_port: u16,

    /// HTTPS listener port of the proxies
    #[arg(long, env = "EDGEPLANE_HTTPS_PORT", default_value_t = 443)]
    pub https_port: u16,

    /// How proxies are grouped: `static:<id>`, `node-id` or `node-cluster`
    #[arg(long, env = "EDGEPLANE_NODE_HASH", default_value = "static:ingress")]
    pub node_hash: NodeHash,

    /// Certificate storage directory
    #[arg(long, env = "EDGEPLANE_STORAGE_DIR", default_value = "./data/certs")]
    pub storage_dir: PathBuf,

    /// Service inventory file
    #[arg(long, env = "EDGEPLANE_INVENTORY", default_value = "./services.yaml")]
    pub inventory: PathBuf,

    /// Inventory poll interval in seconds
    #[arg(long, env = "EDGEPLANE_INVENTORY_POLL_SECONDS", default_value_t = 5)]
    pub inventory_poll_seconds: u64,

    /// Deadline of one rebuild in seconds
    #[arg(long, env = "EDGEPLANE_BUILD_TIMEOUT_SECONDS", default_value_t = 30)]
    pub build_timeout_seconds: u64,

    /// Periodic rebuild interval in seconds
    #[arg(long, env = "EDGEPLANE_REBUILD_INTERVAL_SECONDS", default_value_t = 30)]
    pub rebuild_interval_seconds: u64,

    /// Do not issue certificates for hosts that lack one
    #[arg(long, env = "EDGEPLANE_NO_PROVISIONING")]
    pub no_provisioning: bool,

    /// Prometheus exporter port
    #[arg(long, env = "EDGEPLANE_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Log as JSON
    #[arg(long, env = "EDGEPLANE_JSON_LOGS")]
    pub json_logs: bool,

    /// Enable debug logging
    #[arg(short, long, env = "EDGEPLANE_DEBUG")]
    pub debug: bool,
}

impl Cli {
    /// Fold the flags over the default configuration
    pub fn into_config(self) -> Config {
        let mut config = Config::default();

        config.xds.bind_address = self.xds_bind_address;
        config.xds.port = self.xds_port;
        if let Some(id) = self.control_plane_id {
            config.xds.control_plane_id = id;
        }

        config.proxy.http_port = self.http_port;
        config.proxy.https_port = self.https_port;
        config.proxy.node_hash = self.node_hash;

        config.storage.directory = self.storage_dir;
        config.inventory.path = self.inventory;
        config.inventory.poll_interval_seconds = self.inventory_poll_seconds;

        config.epoch.build_timeout_seconds = self.build_timeout_seconds;
        config.epoch.rebuild_interval_seconds = self.rebuild_interval_seconds;
        config.tls.provision_certificates = !self.no_provisioning;

        config.observability.metrics_port = self.metrics_port;
        config.observability.json_logging = self.json_logs;
        if self.debug {
            config.observability.log_level = "debug".to_string();
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_config_defaults() {
        let config = Cli::parse_from(["edgeplane"]).into_config();
        let defaults = Config::default();

        assert_eq!(config.xds.port, defaults.xds.port);
        assert_eq!(config.proxy.node_hash, defaults.proxy.node_hash);
        assert_eq!(config.storage.directory, defaults.storage.directory);
        assert_eq!(config.observability.log_level, "info");
        assert!(config.tls.provision_certificates);
    }

    #[test]
    fn flags_override_defaults() {
        let config = Cli::parse_from([
            "edgeplane",
            "--xds-port",
            "19000",
            "--node-hash",
            "node-cluster",
            "--no-provisioning",
            "--debug",
        ])
        .into_config();

        assert_eq!(config.xds.port, 19000);
        assert_eq!(config.proxy.node_hash, NodeHash::NodeCluster);
        assert!(!config.tls.provision_certificates);
        assert_eq!(config.observability.log_level, "debug");
    }

    #[test]
    fn invalid_node_hash_is_rejected() {
        assert!(Cli::try_parse_from(["edgeplane", "--node-hash", "hostname"]).is_err());
    }
}
