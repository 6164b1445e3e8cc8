//! # Edgeplane
//!
//! Dynamic configuration control plane for a fleet of Envoy ingress proxies.
//!
//! ## Architecture
//!
//! ```text
//! Inventory events → ResourceGraphBuilder → SnapshotCache → DiscoveryServer → Envoy proxies
//!                          ↓         ↓
//!          VirtualHostRegistry   CertificateLifecycle ← FileStorage
//! ```
//!
//! ## Core Components
//!
//! - **Registry**: merges per-service routing labels into conflict-free virtual hosts
//! - **Certificates**: finds, validates and provisions TLS secrets per virtual host
//! - **Builder**: produces one consistent resource bundle per epoch
//! - **Snapshot cache**: last good bundle per consumer identity
//! - **Discovery server**: ADS stream engine with per-type ACK/NACK tracking
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use edgeplane::xds::{DiscoveryServer, SnapshotCache};
//! use edgeplane::{Config, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::default();
//!     let cache = Arc::new(SnapshotCache::new(config.xds.control_plane_id.clone()));
//!     let server = DiscoveryServer::new(
//!         cache,
//!         config.proxy.node_hash.clone(),
//!         config.xds.control_plane_id.clone(),
//!     );
//!     edgeplane::xds::serve(&config.xds, server, async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await
//! }
//! ```

pub mod builder;
pub mod cli;
pub mod config;
pub mod domain;
pub mod epoch;
pub mod errors;
pub mod inventory;
pub mod observability;
pub mod registry;
pub mod storage;
pub mod tls;
pub mod utils;
pub mod xds;

// Re-export commonly used types and traits
pub use builder::{BuildOutput, ResourceGraphBuilder};
pub use config::Config;
pub use epoch::EpochDriver;
pub use errors::{Error, Result};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

/// Default control-plane identifier, `edgeplane/<version>`
pub fn control_plane_id() -> String {
    format!("{}/{}", APP_NAME, VERSION)
}
