//! Per-consumer snapshot cache
//!
//! Holds the last installed bundle of every consumer identity, pre-rendered
//! into wire resources. Each consumer owns a `watch` channel carrying its
//! current snapshot; installing publishes a new value in one swap, so a
//! reader sees either the old bundle or the new one and nothing in between.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use dashmap::DashMap;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

use crate::domain::{ResourceType, Snapshot};
use crate::errors::{Error, Result};
use crate::observability::MetricsRecorder;
use crate::xds::resources::{BuiltResource, RenderedResources};

/// An installed snapshot together with its wire encoding
#[derive(Debug)]
pub struct CachedSnapshot {
    /// Bumped on every install for the consumer; strictly increasing
    pub revision: u64,
    pub snapshot: Snapshot,
    rendered: RenderedResources,
}

impl CachedSnapshot {
    pub fn version(&self) -> &str {
        &self.snapshot.version
    }

    /// Wire resources of one type, filtered by `names` unless empty
    pub fn resources(&self, resource_type: ResourceType, names: &[String]) -> Vec<BuiltResource> {
        self.rendered.select(resource_type, names)
    }
}

pub type SnapshotWatch = watch::Receiver<Option<Arc<CachedSnapshot>>>;

#[derive(Debug)]
struct ConsumerEntry {
    /// Serialises installs for this consumer
    install: Mutex<()>,
    current: watch::Sender<Option<Arc<CachedSnapshot>>>,
    streams: AtomicUsize,
}

impl ConsumerEntry {
    fn new() -> Self {
        let (current, _) = watch::channel(None);
        Self { install: Mutex::new(()), current, streams: AtomicUsize::new(0) }
    }

    fn snapshot(&self) -> Option<Arc<CachedSnapshot>> {
        self.current.borrow().clone()
    }
}

/// Latest resource bundle per consumer identity
#[derive(Debug)]
pub struct SnapshotCache {
    consumers: DashMap<String, Arc<ConsumerEntry>>,
    server_name: String,
    announce_tx: mpsc::UnboundedSender<String>,
    announce_rx: StdMutex<Option<mpsc::UnboundedReceiver<String>>>,
}

impl SnapshotCache {
    /// `server_name` is stamped into every rendered connection manager
    pub fn new(server_name: impl Into<String>) -> Self {
        let (announce_tx, announce_rx) = mpsc::unbounded_channel();
        Self {
            consumers: DashMap::new(),
            server_name: server_name.into(),
            announce_tx,
            announce_rx: StdMutex::new(Some(announce_rx)),
        }
    }

    /// Take the receiver announcing consumers that connected before any
    /// snapshot was installed for them. Only the first call gets it.
    pub fn take_announcements(&self) -> Option<mpsc::UnboundedReceiver<String>> {
        self.announce_rx.lock().ok().and_then(|mut guard| guard.take())
    }

    fn entry(&self, consumer: &str) -> Arc<ConsumerEntry> {
        // Clone the Arc so no map guard is held across an await point.
        self.consumers
            .entry(consumer.to_string())
            .or_insert_with(|| Arc::new(ConsumerEntry::new()))
            .clone()
    }

    /// Install a snapshot for a consumer.
    ///
    /// The bundle is checked for referential consistency first; an
    /// inconsistent bundle is rejected and the previous snapshot stays in
    /// place. Installing a bundle identical to the current one is a no-op.
    /// Returns whether a new revision was published.
    pub async fn set_snapshot(&self, consumer: &str, snapshot: Snapshot) -> Result<bool> {
        if let Err(reason) = snapshot.resources.check_consistency() {
            warn!(consumer = %consumer, version = %snapshot.version, reason = %reason, "Rejected inconsistent snapshot");
            return Err(Error::inconsistent_snapshot(consumer, reason));
        }

        let entry = self.entry(consumer);
        let _guard = entry.install.lock().await;

        let previous = entry.snapshot();
        if let Some(previous) = &previous {
            if previous.snapshot.resources == snapshot.resources {
                debug!(consumer = %consumer, version = %previous.version(), "Snapshot unchanged; keeping current revision");
                return Ok(false);
            }
        }

        let revision = previous.as_ref().map_or(1, |p| p.revision + 1);
        let rendered = RenderedResources::render(&snapshot.resources, &self.server_name);

        let metrics = MetricsRecorder::new();
        for resource_type in ResourceType::ALL {
            metrics.set_snapshot_resources(resource_type.as_str(), rendered.get(resource_type).len());
        }

        info!(
            consumer = %consumer,
            version = %snapshot.version,
            revision,
            resources = snapshot.resources.len(),
            "Installed snapshot"
        );

        let cached = Arc::new(CachedSnapshot { revision, snapshot, rendered });
        entry.current.send_replace(Some(cached));
        Ok(true)
    }

    /// Current version and resources of one type for a consumer, or `None`
    /// when no snapshot is known for it yet
    pub fn get_snapshot(
        &self,
        consumer: &str,
        resource_type: ResourceType,
    ) -> Option<(String, Vec<BuiltResource>)> {
        let cached = self.snapshot(consumer)?;
        Some((cached.version().to_string(), cached.resources(resource_type, &[])))
    }

    pub fn snapshot(&self, consumer: &str) -> Option<Arc<CachedSnapshot>> {
        let entry = self.consumers.get(consumer)?.clone();
        entry.snapshot()
    }

    /// Watch the snapshot of a consumer. The receiver starts at the current value.
    pub fn watch(&self, consumer: &str) -> SnapshotWatch {
        self.entry(consumer).current.subscribe()
    }

    /// Record a stream serving `consumer` and watch its snapshot.
    ///
    /// The stream count is raised under the map guard, so [`prune`](Self::prune)
    /// never drops an entry a stream is about to watch.
    pub fn track(&self, consumer: &str) -> SnapshotWatch {
        let entry = self
            .consumers
            .entry(consumer.to_string())
            .or_insert_with(|| Arc::new(ConsumerEntry::new()));
        let previous = entry.streams.fetch_add(1, Ordering::SeqCst);
        let watch = entry.current.subscribe();
        let announce = previous == 0 && entry.snapshot().is_none();
        drop(entry);

        if announce {
            debug!(consumer = %consumer, "New consumer without snapshot");
            let _ = self.announce_tx.send(consumer.to_string());
        }
        watch
    }

    /// Forget a stream serving `consumer`
    pub fn untrack(&self, consumer: &str) {
        if let Some(entry) = self.consumers.get(consumer) {
            let _ = entry.streams.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                count.checked_sub(1)
            });
        }
    }

    /// Drop every consumer without an open stream that is not in `keep`.
    /// Returns the dropped identities.
    pub fn prune(&self, keep: &BTreeSet<String>) -> BTreeSet<String> {
        let mut dropped = BTreeSet::new();
        self.consumers.retain(|consumer, entry| {
            let retained = keep.contains(consumer) || entry.streams.load(Ordering::SeqCst) > 0;
            if !retained {
                dropped.insert(consumer.clone());
            }
            retained
        });
        if !dropped.is_empty() {
            debug!(consumers = ?dropped, "Dropped idle consumers");
        }
        dropped
    }

    /// Consumer identities with at least one open stream
    pub fn subscribers(&self) -> BTreeSet<String> {
        self.consumers
            .iter()
            .filter(|entry| entry.value().streams.load(Ordering::SeqCst) > 0)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Consumer identities with an installed snapshot
    pub fn consumers(&self) -> BTreeSet<String> {
        self.consumers
            .iter()
            .filter(|entry| entry.value().snapshot().is_some())
            .map(|entry| entry.key().clone())
            .collect()
    }
}
