//! Discovery stream events
//!
//! The stream state machine reports everything it does as a [`StreamEvent`];
//! [`dispatch`] routes each kind to its handler, which logs and records metrics.

use tracing::{debug, info, warn};

use crate::observability::MetricsRecorder;

/// How an inbound request was classified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// First request for a type, or an explicit resubscription
    Initial,
    /// Subscription change on an already synced type
    Resubscribe,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Initial => "initial",
            RequestKind::Resubscribe => "resubscribe",
        }
    }
}

/// Something that happened on one discovery stream
#[derive(Debug, Clone, Copy)]
pub enum StreamEvent<'a> {
    StreamOpened {
        stream_id: u64,
    },
    StreamClosed {
        stream_id: u64,
        consumer: Option<&'a str>,
        reason: &'a str,
    },
    Request {
        stream_id: u64,
        consumer: &'a str,
        type_url: &'a str,
        kind: RequestKind,
        resource_names: &'a [String],
    },
    Response {
        stream_id: u64,
        consumer: &'a str,
        type_url: &'a str,
        version: &'a str,
        nonce: &'a str,
        resources: usize,
    },
    Ack {
        stream_id: u64,
        consumer: &'a str,
        type_url: &'a str,
        version: &'a str,
        nonce: &'a str,
    },
    Nack {
        stream_id: u64,
        consumer: &'a str,
        type_url: &'a str,
        /// Version the proxy still runs
        version: &'a str,
        nonce: &'a str,
        error: Option<&'a str>,
    },
    Stale {
        stream_id: u64,
        consumer: &'a str,
        type_url: &'a str,
        nonce: &'a str,
    },
}

/// Route an event to its handler
pub fn dispatch(event: StreamEvent<'_>) {
    match event {
        StreamEvent::StreamOpened { stream_id } => on_stream_opened(stream_id),
        StreamEvent::StreamClosed { stream_id, consumer, reason } => {
            on_stream_closed(stream_id, consumer, reason)
        }
        StreamEvent::Request { stream_id, consumer, type_url, kind, resource_names } => {
            on_request(stream_id, consumer, type_url, kind, resource_names)
        }
        StreamEvent::Response { stream_id, consumer, type_url, version, nonce, resources } => {
            on_response(stream_id, consumer, type_url, version, nonce, resources)
        }
        StreamEvent::Ack { stream_id, consumer, type_url, version, nonce } => {
            on_ack(stream_id, consumer, type_url, version, nonce)
        }
        StreamEvent::Nack { stream_id, consumer, type_url, version, nonce, error } => {
            on_nack(stream_id, consumer, type_url, version, nonce, error)
        }
        StreamEvent::Stale { stream_id, consumer, type_url, nonce } => {
            on_stale(stream_id, consumer, type_url, nonce)
        }
    }
}

fn on_stream_opened(stream_id: u64) {
    MetricsRecorder::new().record_xds_stream(true);
    info!(stream = stream_id, "Discovery stream opened");
}

fn on_stream_closed(stream_id: u64, consumer: Option<&str>, reason: &str) {
    MetricsRecorder::new().record_xds_stream(false);
    info!(stream = stream_id, consumer = ?consumer, reason = %reason, "Discovery stream closed");
}

fn on_request(
    stream_id: u64,
    consumer: &str,
    type_url: &str,
    kind: RequestKind,
    resource_names: &[String],
) {
    MetricsRecorder::new().record_xds_request(type_url, kind.as_str());
    info!(
        stream = stream_id,
        consumer = %consumer,
        type_url = %type_url,
        kind = kind.as_str(),
        resource_names = ?resource_names,
        "Received discovery request"
    );
}

fn on_response(
    stream_id: u64,
    consumer: &str,
    type_url: &str,
    version: &str,
    nonce: &str,
    resources: usize,
) {
    MetricsRecorder::new().record_xds_push(type_url, resources);
    info!(
        stream = stream_id,
        consumer = %consumer,
        type_url = %type_url,
        version = %version,
        nonce = %nonce,
        resource_count = resources,
        "Sending discovery response"
    );
}

fn on_ack(stream_id: u64, consumer: &str, type_url: &str, version: &str, nonce: &str) {
    MetricsRecorder::new().record_xds_request(type_url, "ack");
    debug!(
        stream = stream_id,
        consumer = %consumer,
        type_url = %type_url,
        version = %version,
        nonce = %nonce,
        "[ACK] Proxy applied configuration"
    );
}

fn on_nack(
    stream_id: u64,
    consumer: &str,
    type_url: &str,
    version: &str,
    nonce: &str,
    error: Option<&str>,
) {
    MetricsRecorder::new().record_xds_request(type_url, "nack");
    warn!(
        stream = stream_id,
        consumer = %consumer,
        type_url = %type_url,
        version = %version,
        nonce = %nonce,
        error = error.unwrap_or("<none>"),
        "[NACK] Proxy rejected configuration; waiting for the next snapshot"
    );
}

fn on_stale(stream_id: u64, consumer: &str, type_url: &str, nonce: &str) {
    MetricsRecorder::new().record_xds_request(type_url, "stale");
    debug!(
        stream = stream_id,
        consumer = %consumer,
        type_url = %type_url,
        nonce = %nonce,
        "Ignoring request with stale nonce"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[traced_test]
    #[test]
    fn nack_is_logged_with_error_detail() {
        dispatch(StreamEvent::Nack {
            stream_id: 7,
            consumer: "ingress",
            type_url: "type.googleapis.com/envoy.config.cluster.v3.Cluster",
            version: "v1",
            nonce: "n-1",
            error: Some("unknown cluster"),
        });

        assert!(logs_contain("[NACK] Proxy rejected configuration"));
        assert!(logs_contain("unknown cluster"));
    }

    #[traced_test]
    #[test]
    fn lifecycle_events_are_logged() {
        dispatch(StreamEvent::StreamOpened { stream_id: 1 });
        dispatch(StreamEvent::StreamClosed {
            stream_id: 1,
            consumer: Some("ingress"),
            reason: "client disconnected",
        });

        assert!(logs_contain("Discovery stream opened"));
        assert!(logs_contain("client disconnected"));
    }
}
