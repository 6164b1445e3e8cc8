//! State-of-the-world discovery stream
//!
//! Every accepted stream runs two tasks: a reader that only forwards inbound
//! requests into a queue, and the state machine below, which waits on that
//! queue and on the consumer's snapshot watch at the same time.
//!
//! Per resource type the stream keeps one [`Subscription`]:
//!
//! - a request without a subscription for its type, or with both version and
//!   nonce empty, (re)subscribes and gets the current snapshot pushed;
//! - a request echoing the last sent nonce and version without an error is an
//!   ACK; with a different version or an error detail it is a NACK, which is
//!   logged and never answered with the same version again;
//! - a request carrying any other nonce is stale and ignored;
//! - a new snapshot revision is pushed to every subscription that has not
//!   seen it yet, superseding any response still awaiting an ACK.

use std::collections::BTreeMap;
use std::sync::Arc;

use envoy_types::pb::envoy::config::core::v3::{ControlPlane, Node};
use envoy_types::pb::envoy::service::discovery::v3::{DiscoveryRequest, DiscoveryResponse};
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::Status;
use tracing::{debug, warn, Instrument};

use crate::config::NodeHash;
use crate::domain::ResourceType;
use crate::errors::{Error, Result};
use crate::utils::generate_nonce;
use crate::xds::cache::{CachedSnapshot, SnapshotCache, SnapshotWatch};
use crate::xds::events::{self, RequestKind, StreamEvent};
use crate::xds::resources::{resource_type, type_url};

/// Capacity of the inbound and outbound queues of one stream
const STREAM_BUFFER: usize = 100;

/// Protocol state of one resource type on one stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Subscribed, nothing pushed yet
    New,
    AwaitingAck,
    Synced,
    /// Last push was NACKed
    Rejected,
}

#[derive(Debug, Clone)]
struct Subscription {
    resource_names: Vec<String>,
    state: SubscriptionState,
    last_sent_nonce: Option<String>,
    last_pushed_version: Option<String>,
    last_pushed_revision: u64,
    last_acked_version: Option<String>,
}

impl Subscription {
    fn new(resource_names: Vec<String>) -> Self {
        Self {
            resource_names,
            state: SubscriptionState::New,
            last_sent_nonce: None,
            last_pushed_version: None,
            last_pushed_revision: 0,
            last_acked_version: None,
        }
    }
}

/// Shared settings of every stream served by one server
#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub cache: Arc<SnapshotCache>,
    pub node_hash: NodeHash,
    pub control_plane_id: String,
}

/// Serve one stream of discovery requests.
///
/// Returns the response stream; the stream tasks end when the inbound stream
/// ends, fails, or the response receiver is dropped.
pub fn serve_stream<S>(
    settings: StreamSettings,
    stream_id: u64,
    inbound: S,
) -> ReceiverStream<std::result::Result<DiscoveryResponse, Status>>
where
    S: Stream<Item = std::result::Result<DiscoveryRequest, Status>> + Send + Unpin + 'static,
{
    let (request_tx, request_rx) = mpsc::channel(STREAM_BUFFER);
    let (response_tx, response_rx) = mpsc::channel(STREAM_BUFFER);

    tokio::spawn(forward_requests(inbound, request_tx));

    let span = crate::xds_span!("sotw", stream_id);
    let state_machine = DiscoveryStream {
        stream_id,
        settings,
        consumer: None,
        watch: None,
        subscriptions: BTreeMap::new(),
        responses: response_tx,
    };
    tokio::spawn(state_machine.run(request_rx).instrument(span));

    ReceiverStream::new(response_rx)
}

async fn forward_requests<S>(
    mut inbound: S,
    requests: mpsc::Sender<std::result::Result<DiscoveryRequest, Status>>,
) where
    S: Stream<Item = std::result::Result<DiscoveryRequest, Status>> + Unpin,
{
    while let Some(item) = inbound.next().await {
        let failed = item.is_err();
        if requests.send(item).await.is_err() || failed {
            break;
        }
    }
}

struct DiscoveryStream {
    stream_id: u64,
    settings: StreamSettings,
    /// Fixed by the first request; later requests may omit their node
    consumer: Option<String>,
    watch: Option<SnapshotWatch>,
    subscriptions: BTreeMap<ResourceType, Subscription>,
    responses: mpsc::Sender<std::result::Result<DiscoveryResponse, Status>>,
}

impl DiscoveryStream {
    async fn run(
        mut self,
        mut requests: mpsc::Receiver<std::result::Result<DiscoveryRequest, Status>>,
    ) {
        events::dispatch(StreamEvent::StreamOpened { stream_id: self.stream_id });

        let reason = loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(Ok(request)) => {
                        if let Err(e) = self.handle_request(request).await {
                            break e.to_string();
                        }
                    }
                    Some(Err(status)) => {
                        warn!(stream = self.stream_id, error = %status, "Discovery stream transport error");
                        break format!("transport error: {}", status.message());
                    }
                    None => break "client disconnected".to_string(),
                },
                changed = next_change(&mut self.watch) => {
                    if !changed {
                        self.watch = None;
                        continue;
                    }
                    if let Err(e) = self.push_all().await {
                        break e.to_string();
                    }
                }
            }
        };

        if let Some(consumer) = &self.consumer {
            self.settings.cache.untrack(consumer);
        }
        self.subscriptions.clear();
        events::dispatch(StreamEvent::StreamClosed {
            stream_id: self.stream_id,
            consumer: self.consumer.as_deref(),
            reason: &reason,
        });
    }

    async fn handle_request(&mut self, request: DiscoveryRequest) -> Result<()> {
        let consumer = self.resolve_consumer(request.node.as_ref()).await?;

        let Some(resource_type) = resource_type(&request.type_url) else {
            warn!(
                stream = self.stream_id,
                consumer = %consumer,
                type_url = %request.type_url,
                "Ignoring request for unsupported resource type"
            );
            return Ok(());
        };

        let initial = request.version_info.is_empty() && request.response_nonce.is_empty();
        let Some(subscription) =
            self.subscriptions.get_mut(&resource_type).filter(|_| !initial)
        else {
            self.subscriptions.insert(resource_type, Subscription::new(request.resource_names.clone()));
            events::dispatch(StreamEvent::Request {
                stream_id: self.stream_id,
                consumer: &consumer,
                type_url: &request.type_url,
                kind: RequestKind::Initial,
                resource_names: &request.resource_names,
            });
            return self.push(resource_type, true).await;
        };

        if subscription.last_sent_nonce.as_deref() != Some(request.response_nonce.as_str()) {
            events::dispatch(StreamEvent::Stale {
                stream_id: self.stream_id,
                consumer: &consumer,
                type_url: &request.type_url,
                nonce: &request.response_nonce,
            });
            return Ok(());
        }

        let acked = request.error_detail.is_none()
            && subscription.last_pushed_version.as_deref() == Some(request.version_info.as_str());

        if !acked {
            subscription.state = SubscriptionState::Rejected;
            subscription.resource_names = request.resource_names.clone();
            events::dispatch(StreamEvent::Nack {
                stream_id: self.stream_id,
                consumer: &consumer,
                type_url: &request.type_url,
                version: &request.version_info,
                nonce: &request.response_nonce,
                error: request.error_detail.as_ref().map(|status| status.message.as_str()),
            });
            return Ok(());
        }

        subscription.state = SubscriptionState::Synced;
        subscription.last_acked_version = Some(request.version_info.clone());
        events::dispatch(StreamEvent::Ack {
            stream_id: self.stream_id,
            consumer: &consumer,
            type_url: &request.type_url,
            version: &request.version_info,
            nonce: &request.response_nonce,
        });

        if subscription.resource_names != request.resource_names {
            subscription.resource_names = request.resource_names.clone();
            events::dispatch(StreamEvent::Request {
                stream_id: self.stream_id,
                consumer: &consumer,
                type_url: &request.type_url,
                kind: RequestKind::Resubscribe,
                resource_names: &request.resource_names,
            });
            return self.push(resource_type, true).await;
        }

        // A snapshot may have landed while this subscription was awaiting its ACK.
        self.push(resource_type, false).await
    }

    /// Consumer identity of this stream, fixed by the first request
    async fn resolve_consumer(&mut self, node: Option<&Node>) -> Result<String> {
        if let Some(consumer) = &self.consumer {
            return Ok(consumer.clone());
        }

        let node = node.cloned().unwrap_or_default();
        let consumer = self.settings.node_hash.consumer_id(&node.id, &node.cluster);
        if consumer.is_empty() {
            let status = Status::invalid_argument(format!(
                "node identity required for node hash '{}'",
                self.settings.node_hash
            ));
            let _ = self.responses.send(Err(status)).await;
            return Err(Error::validation_field("request carries no usable node identity", "node"));
        }

        tracing::Span::current().record("consumer", consumer.as_str());
        self.watch = Some(self.settings.cache.track(&consumer));
        self.consumer = Some(consumer.clone());
        Ok(consumer)
    }

    /// Latest snapshot of the consumer. Reading it never marks the watch as
    /// seen; only `next_change` does, so every revision reaches `push_all`.
    fn current_snapshot(&self) -> Option<Arc<CachedSnapshot>> {
        self.watch.as_ref().and_then(|watch| watch.borrow().clone())
    }

    async fn push_all(&mut self) -> Result<()> {
        for resource_type in ResourceType::ALL {
            self.push(resource_type, false).await?;
        }
        Ok(())
    }

    /// Push the current snapshot to one subscription. Without `force`, only a
    /// revision the subscription has not been sent yet is pushed.
    async fn push(&mut self, resource_type: ResourceType, force: bool) -> Result<()> {
        let Some(snapshot) = self.current_snapshot() else {
            return Ok(());
        };
        let Some(consumer) = self.consumer.as_deref() else {
            return Ok(());
        };
        let Some(subscription) = self.subscriptions.get_mut(&resource_type) else {
            return Ok(());
        };
        if !force && snapshot.revision <= subscription.last_pushed_revision {
            return Ok(());
        }

        if subscription.state == SubscriptionState::AwaitingAck && !force {
            debug!(
                stream = self.stream_id,
                consumer = %consumer,
                resource_type = %resource_type,
                last_acked_version = ?subscription.last_acked_version,
                "Superseding unacknowledged response"
            );
        }

        let resources = snapshot.resources(resource_type, &subscription.resource_names);
        let nonce = generate_nonce();
        let response = DiscoveryResponse {
            version_info: snapshot.version().to_string(),
            resources: resources.into_iter().map(|r| r.into_any()).collect(),
            type_url: type_url(resource_type).to_string(),
            nonce: nonce.clone(),
            control_plane: Some(ControlPlane {
                identifier: self.settings.control_plane_id.clone(),
            }),
            ..Default::default()
        };

        subscription.state = SubscriptionState::AwaitingAck;
        subscription.last_sent_nonce = Some(nonce);
        subscription.last_pushed_version = Some(response.version_info.clone());
        subscription.last_pushed_revision = snapshot.revision;

        events::dispatch(StreamEvent::Response {
            stream_id: self.stream_id,
            consumer,
            type_url: &response.type_url,
            version: &response.version_info,
            nonce: &response.nonce,
            resources: response.resources.len(),
        });

        self.responses
            .send(Ok(response))
            .await
            .map_err(|_| Error::transport("discovery response receiver dropped"))
    }
}

/// Wait for the next snapshot revision. Never resolves without a watch;
/// resolves `false` once the cache side is gone.
async fn next_change(watch: &mut Option<SnapshotWatch>) -> bool {
    match watch {
        Some(watch) => watch.changed().await.is_ok(),
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Cluster, Endpoint, Protocol, Resources, Snapshot};
    use crate::xds::resources::CLUSTER_TYPE_URL;
    use std::time::Duration;
    use tokio::time::timeout;
    use tokio_stream::wrappers::ReceiverStream as RequestStream;

    fn settings(cache: Arc<SnapshotCache>) -> StreamSettings {
        StreamSettings {
            cache,
            node_hash: NodeHash::default(),
            control_plane_id: "edgeplane/test".to_string(),
        }
    }

    fn clusters(names: &[&str]) -> Resources {
        Resources {
            clusters: names
                .iter()
                .map(|name| Cluster::for_endpoint(*name, Endpoint::new(*name, 80, Protocol::Tcp)))
                .collect(),
            ..Default::default()
        }
    }

    fn request(version: &str, nonce: &str) -> DiscoveryRequest {
        DiscoveryRequest {
            version_info: version.to_string(),
            response_nonce: nonce.to_string(),
            type_url: CLUSTER_TYPE_URL.to_string(),
            node: Some(Node { id: "envoy-1".to_string(), ..Default::default() }),
            ..Default::default()
        }
    }

    async fn open(
        cache: Arc<SnapshotCache>,
    ) -> (
        mpsc::Sender<std::result::Result<DiscoveryRequest, Status>>,
        ReceiverStream<std::result::Result<DiscoveryResponse, Status>>,
    ) {
        let (tx, rx) = mpsc::channel(16);
        let responses = serve_stream(settings(cache), 1, RequestStream::new(rx));
        (tx, responses)
    }

    async fn next(
        responses: &mut ReceiverStream<std::result::Result<DiscoveryResponse, Status>>,
    ) -> DiscoveryResponse {
        timeout(Duration::from_secs(1), responses.next())
            .await
            .expect("response in time")
            .expect("stream open")
            .expect("ok response")
    }

    async fn silent(responses: &mut ReceiverStream<std::result::Result<DiscoveryResponse, Status>>) {
        assert!(timeout(Duration::from_millis(100), responses.next()).await.is_err());
    }

    #[tokio::test]
    async fn initial_request_gets_current_snapshot() {
        let cache = Arc::new(SnapshotCache::new("edgeplane/test"));
        cache.set_snapshot("ingress", Snapshot::new("v1", clusters(&["web"]))).await.unwrap();
        let (tx, mut responses) = open(cache).await;

        tx.send(Ok(request("", ""))).await.unwrap();
        let response = next(&mut responses).await;

        assert_eq!(response.version_info, "v1");
        assert_eq!(response.type_url, CLUSTER_TYPE_URL);
        assert_eq!(response.resources.len(), 1);
        assert!(!response.nonce.is_empty());
        assert_eq!(
            response.control_plane.map(|cp| cp.identifier),
            Some("edgeplane/test".to_string())
        );
    }

    #[tokio::test]
    async fn initial_request_before_snapshot_waits_for_first_install() {
        let cache = Arc::new(SnapshotCache::new("edgeplane/test"));
        let (tx, mut responses) = open(cache.clone()).await;

        tx.send(Ok(request("", ""))).await.unwrap();
        silent(&mut responses).await;

        cache.set_snapshot("ingress", Snapshot::new("v1", clusters(&["web"]))).await.unwrap();
        assert_eq!(next(&mut responses).await.version_info, "v1");
    }

    #[tokio::test]
    async fn resource_names_filter_the_push() {
        let cache = Arc::new(SnapshotCache::new("edgeplane/test"));
        cache.set_snapshot("ingress", Snapshot::new("v1", clusters(&["web", "api"]))).await.unwrap();
        let (tx, mut responses) = open(cache).await;

        let mut subscribe = request("", "");
        subscribe.resource_names = vec!["api".to_string()];
        tx.send(Ok(subscribe)).await.unwrap();

        assert_eq!(next(&mut responses).await.resources.len(), 1);
    }

    #[tokio::test]
    async fn changed_names_after_ack_trigger_a_push() {
        let cache = Arc::new(SnapshotCache::new("edgeplane/test"));
        cache.set_snapshot("ingress", Snapshot::new("v1", clusters(&["web", "api"]))).await.unwrap();
        let (tx, mut responses) = open(cache).await;

        tx.send(Ok(request("", ""))).await.unwrap();
        let first = next(&mut responses).await;
        assert_eq!(first.resources.len(), 2);

        let mut narrowed = request("v1", &first.nonce);
        narrowed.resource_names = vec!["web".to_string()];
        tx.send(Ok(narrowed)).await.unwrap();

        let second = next(&mut responses).await;
        assert_eq!(second.version_info, "v1");
        assert_eq!(second.resources.len(), 1);
        assert_ne!(second.nonce, first.nonce);
    }

    #[tokio::test]
    async fn unsupported_type_is_ignored() {
        let cache = Arc::new(SnapshotCache::new("edgeplane/test"));
        cache.set_snapshot("ingress", Snapshot::new("v1", clusters(&["web"]))).await.unwrap();
        let (tx, mut responses) = open(cache).await;

        let mut eds = request("", "");
        eds.type_url = "type.googleapis.com/envoy.config.endpoint.v3.ClusterLoadAssignment".into();
        tx.send(Ok(eds)).await.unwrap();
        silent(&mut responses).await;
    }

    #[tokio::test]
    async fn missing_node_identity_is_rejected() {
        let cache = Arc::new(SnapshotCache::new("edgeplane/test"));
        let (tx, rx) = mpsc::channel(4);
        let mut settings = settings(cache);
        settings.node_hash = NodeHash::NodeId;
        let mut responses = serve_stream(settings, 9, RequestStream::new(rx));

        let mut anonymous = request("", "");
        anonymous.node = None;
        tx.send(Ok(anonymous)).await.unwrap();

        let status = timeout(Duration::from_secs(1), responses.next())
            .await
            .expect("response in time")
            .expect("stream open")
            .expect_err("status");
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn teardown_untracks_consumer() {
        let cache = Arc::new(SnapshotCache::new("edgeplane/test"));
        cache.set_snapshot("ingress", Snapshot::new("v1", clusters(&["web"]))).await.unwrap();
        let (tx, mut responses) = open(cache.clone()).await;

        tx.send(Ok(request("", ""))).await.unwrap();
        next(&mut responses).await;
        assert!(cache.subscribers().contains("ingress"));

        drop(tx);
        assert!(timeout(Duration::from_secs(1), responses.next()).await.expect("closed").is_none());
        assert!(cache.subscribers().is_empty());
    }
}
