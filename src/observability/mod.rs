//! # Observability Infrastructure
//!
//! Structured logging through `tracing` and protocol/epoch metrics through the
//! `metrics` facade, optionally exported for Prometheus.

pub mod logging;
pub mod metrics;

pub use self::logging::{init_logging, log_config_info};
pub use self::metrics::{init_metrics, MetricsRecorder};

use crate::config::ObservabilityConfig;
use crate::errors::Result;
use ::tracing::info;

/// Initialize logging and, when a metrics port is configured, the Prometheus exporter
pub fn init_observability(config: &ObservabilityConfig) -> Result<()> {
    init_logging(config)?;
    init_metrics(config)?;

    info!(
        service_name = %config.service_name,
        log_level = %config.log_level,
        json_logging = config.json_logging,
        metrics_port = ?config.metrics_port,
        "Observability initialized successfully"
    );

    Ok(())
}
