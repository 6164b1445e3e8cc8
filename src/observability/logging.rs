//! # Structured Logging
//!
//! Subscriber setup and span helpers for the tracing ecosystem.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{Config, ObservabilityConfig};
use crate::errors::{Error, Result};

/// Create a tracing span for one discovery stream
#[macro_export]
macro_rules! xds_span {
    ($operation:expr, $stream_id:expr) => {
        tracing::info_span!(
            "xds_stream",
            operation = %$operation,
            stream = %$stream_id,
            consumer = tracing::field::Empty
        )
    };
    ($operation:expr, $stream_id:expr, $($field:tt)*) => {
        tracing::info_span!(
            "xds_stream",
            operation = %$operation,
            stream = %$stream_id,
            consumer = tracing::field::Empty,
            $($field)*
        )
    };
}

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. Fails if a global
/// subscriber is already installed.
pub fn init_logging(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| Error::config(format!("Invalid log level '{}': {}", config.log_level, e)))?;

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.json_logging {
        registry.with(fmt::layer().json().with_current_span(true).with_span_list(false)).try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };

    result.map_err(|e| Error::config(format!("Failed to initialize logging: {}", e)))
}

/// Log configuration at startup
pub fn log_config_info(config: &Config) {
    tracing::info!(
        xds_address = %config.xds.bind_address(),
        control_plane_id = %config.xds.control_plane_id,
        http_port = config.proxy.http_port,
        https_port = config.proxy.https_port,
        node_hash = %config.proxy.node_hash,
        storage_directory = %config.storage.directory.display(),
        inventory_file = %config.inventory.path.display(),
        provisioning = config.tls.provision_certificates,
        "edgeplane control plane configuration"
    );
}

#[cfg(test)]
mod tests {
    #[test]
    fn xds_span_macro_builds_span() {
        let span = crate::xds_span!("stream", "stream-1", type_url = "cluster");
        drop(span);
    }
}
