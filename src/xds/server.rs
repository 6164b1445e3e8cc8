//! xDS gRPC server implementation using envoy-types

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use envoy_types::pb::envoy::service::discovery::v3::{
    aggregated_discovery_service_server::{
        AggregatedDiscoveryService, AggregatedDiscoveryServiceServer,
    },
    DeltaDiscoveryRequest, DeltaDiscoveryResponse, DiscoveryRequest, DiscoveryResponse,
};
use futures::Stream;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::Server;
use tonic::{Request, Response, Status, Streaming};
use tracing::{error, info};

use crate::config::{NodeHash, XdsConfig};
use crate::errors::{Error, Result};
use crate::xds::cache::SnapshotCache;
use crate::xds::stream::{serve_stream, StreamSettings};

/// Aggregated discovery service serving [`SnapshotCache`] contents
#[derive(Debug, Clone)]
pub struct DiscoveryServer {
    settings: StreamSettings,
    next_stream_id: Arc<AtomicU64>,
}

impl DiscoveryServer {
    pub fn new(
        cache: Arc<SnapshotCache>,
        node_hash: NodeHash,
        control_plane_id: impl Into<String>,
    ) -> Self {
        Self {
            settings: StreamSettings { cache, node_hash, control_plane_id: control_plane_id.into() },
            next_stream_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn cache(&self) -> &Arc<SnapshotCache> {
        &self.settings.cache
    }

    /// Serve an already accepted stream of discovery requests
    pub fn open_stream<S>(
        &self,
        inbound: S,
    ) -> ReceiverStream<std::result::Result<DiscoveryResponse, Status>>
    where
        S: Stream<Item = std::result::Result<DiscoveryRequest, Status>> + Send + Unpin + 'static,
    {
        let stream_id = self.next_stream_id.fetch_add(1, Ordering::Relaxed);
        serve_stream(self.settings.clone(), stream_id, inbound)
    }
}

#[tonic::async_trait]
impl AggregatedDiscoveryService for DiscoveryServer {
    type StreamAggregatedResourcesStream =
        ReceiverStream<std::result::Result<DiscoveryResponse, Status>>;
    type DeltaAggregatedResourcesStream =
        ReceiverStream<std::result::Result<DeltaDiscoveryResponse, Status>>;

    async fn stream_aggregated_resources(
        &self,
        request: Request<Streaming<DiscoveryRequest>>,
    ) -> std::result::Result<Response<Self::StreamAggregatedResourcesStream>, Status> {
        info!(remote = ?request.remote_addr(), "Accepted aggregated discovery stream");
        Ok(Response::new(self.open_stream(request.into_inner())))
    }

    async fn delta_aggregated_resources(
        &self,
        _request: Request<Streaming<DeltaDiscoveryRequest>>,
    ) -> std::result::Result<Response<Self::DeltaAggregatedResourcesStream>, Status> {
        Err(Status::unimplemented("incremental discovery is not supported; use state-of-the-world ADS"))
    }
}

/// Run the discovery server until `shutdown` resolves
pub async fn serve<F>(config: &XdsConfig, server: DiscoveryServer, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = config.socket_addr()?;

    info!(
        address = %addr,
        control_plane_id = %server.settings.control_plane_id,
        node_hash = %server.settings.node_hash,
        "Starting aggregated discovery server"
    );

    Server::builder()
        .http2_keepalive_interval(Some(config.keepalive_interval()))
        .http2_keepalive_timeout(Some(config.keepalive_timeout()))
        .max_concurrent_streams(Some(config.max_concurrent_streams))
        .add_service(AggregatedDiscoveryServiceServer::new(server))
        .serve_with_shutdown(addr, shutdown)
        .await
        .map_err(|e| {
            error!(address = %addr, error = %e, "Discovery server failed");
            Error::transport(format!("xDS server on {} failed: {}", addr, e))
        })?;

    info!("Discovery server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn streams_get_distinct_ids() {
        let server = DiscoveryServer::new(
            Arc::new(SnapshotCache::new("edgeplane/test")),
            NodeHash::default(),
            "edgeplane/test",
        );
        let (_tx_a, rx_a) = tokio::sync::mpsc::channel(1);
        let (_tx_b, rx_b) = tokio::sync::mpsc::channel(1);

        let _a = server.open_stream(ReceiverStream::new(rx_a));
        let _b = server.open_stream(ReceiverStream::new(rx_b));

        assert_eq!(server.next_stream_id.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn cache_is_shared_with_streams() {
        let cache = Arc::new(SnapshotCache::new("edgeplane/test"));
        let server = DiscoveryServer::new(cache.clone(), NodeHash::default(), "edgeplane/test");
        assert!(Arc::ptr_eq(server.cache(), &cache));
    }
}
