//! # Metrics Collection
//!
//! Protocol and epoch metrics recorded through the `metrics` facade. Without
//! an installed exporter every call is a no-op.

use std::net::SocketAddr;

use ::tracing::info;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config::ObservabilityConfig;
use crate::errors::{Error, Result};

/// Metrics recorder that tracks control plane activity
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsRecorder;

impl MetricsRecorder {
    pub fn new() -> Self {
        Self
    }

    /// Record a discovery stream opening or closing
    pub fn record_xds_stream(&self, opened: bool) {
        if opened {
            counter!("xds_streams_total").increment(1);
            gauge!("xds_streams_active").increment(1.0);
        } else {
            gauge!("xds_streams_active").decrement(1.0);
        }
    }

    /// Record a classified discovery request (`initial`, `ack`, `nack`, `stale`)
    pub fn record_xds_request(&self, type_url: &str, kind: &'static str) {
        let labels = [("type_url", type_url.to_string()), ("kind", kind.to_string())];
        counter!("xds_requests_total", &labels).increment(1);
    }

    /// Record a pushed discovery response
    pub fn record_xds_push(&self, type_url: &str, resources: usize) {
        let labels = [("type_url", type_url.to_string())];
        counter!("xds_responses_total", &labels).increment(1);
        histogram!("xds_response_resources", &labels).record(resources as f64);
    }

    /// Record the outcome of one epoch rebuild
    pub fn record_epoch(&self, outcome: &'static str, duration_seconds: f64) {
        counter!("epoch_builds_total", "outcome" => outcome).increment(1);
        histogram!("epoch_build_duration_seconds").record(duration_seconds);
    }

    /// Record a service entry left out of a build
    pub fn record_skipped_service(&self, reason: &'static str) {
        counter!("epoch_skipped_services_total", "reason" => reason).increment(1);
    }

    /// Update the resource count gauge of the last installed snapshot
    pub fn set_snapshot_resources(&self, resource_type: &str, count: usize) {
        let labels = [("resource_type", resource_type.to_string())];
        gauge!("snapshot_resources", &labels).set(count as f64);
    }

    pub fn record_certificate_provisioned(&self, success: bool) {
        let status = if success { "success" } else { "error" };
        counter!("certificates_provisioned_total", "status" => status).increment(1);
    }

    /// Register descriptions so exports appear before the first event
    pub fn describe(&self) {
        describe_counter!("xds_streams_total", Unit::Count, "Discovery streams accepted");
        describe_gauge!("xds_streams_active", Unit::Count, "Discovery streams currently open");
        describe_counter!("xds_requests_total", Unit::Count, "Discovery requests by type and kind");
        describe_counter!("xds_responses_total", Unit::Count, "Discovery responses pushed");
        describe_histogram!("xds_response_resources", Unit::Count, "Resources per pushed response");
        describe_counter!("epoch_builds_total", Unit::Count, "Resource graph builds by outcome");
        describe_histogram!("epoch_build_duration_seconds", Unit::Seconds, "Resource graph build time");
        describe_counter!(
            "epoch_skipped_services_total",
            Unit::Count,
            "Service entries skipped during a build"
        );
        describe_gauge!("snapshot_resources", Unit::Count, "Resources in the installed snapshot");
        describe_counter!(
            "certificates_provisioned_total",
            Unit::Count,
            "Certificates issued by the local CA"
        );
    }
}

/// Install the Prometheus exporter when a metrics port is configured
pub fn init_metrics(config: &ObservabilityConfig) -> Result<()> {
    let Some(port) = config.metrics_port else {
        return Ok(());
    };

    let socket_addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(socket_addr)
        .add_global_label("service", &config.service_name)
        .install()
        .map_err(|e| Error::config(format!("Failed to initialize metrics exporter: {}", e)))?;

    MetricsRecorder::new().describe();

    info!(metrics_addr = %socket_addr, "Metrics collection initialized");
    Ok(())
}
