//! Epoch driver
//!
//! Owns the total inventory and serialises rebuilds. Each epoch builds the
//! resource graph under a deadline and installs the result for every connected
//! consumer. A failed or timed out epoch leaves the cache untouched, so
//! proxies keep the last good configuration.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::builder::{BuildOutput, ResourceGraphBuilder};
use crate::config::{Config, NodeHash};
use crate::domain::{Resources, Snapshot};
use crate::errors::{Error, Result};
use crate::inventory::{Inventory, InventoryEvent};
use crate::observability::MetricsRecorder;
use crate::tls::{CertificateProvisioner, ProvisioningRequest};
use crate::xds::SnapshotCache;

const PROVISIONED_QUEUE: usize = 64;

#[derive(Debug)]
pub struct EpochDriver {
    builder: ResourceGraphBuilder,
    cache: Arc<SnapshotCache>,
    provisioner: Option<CertificateProvisioner>,
    node_hash: NodeHash,
    build_timeout: Duration,
    rebuild_interval: Duration,
    inventory: Inventory,
    last_good: Option<Resources>,
    provisioned_tx: mpsc::Sender<String>,
    provisioned_rx: Option<mpsc::Receiver<String>>,
}

impl EpochDriver {
    pub fn new(
        config: &Config,
        builder: ResourceGraphBuilder,
        cache: Arc<SnapshotCache>,
        provisioner: Option<CertificateProvisioner>,
    ) -> Self {
        let (provisioned_tx, provisioned_rx) = mpsc::channel(PROVISIONED_QUEUE);
        Self {
            builder,
            cache,
            provisioner,
            node_hash: config.proxy.node_hash.clone(),
            build_timeout: config.epoch.build_timeout(),
            rebuild_interval: config.epoch.rebuild_interval(),
            inventory: Inventory::new(),
            last_good: None,
            provisioned_tx,
            provisioned_rx: Some(provisioned_rx),
        }
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    /// Apply an inventory event. Returns whether the inventory changed.
    pub fn apply(&mut self, event: InventoryEvent) -> bool {
        debug!(service = %event.service_id, action = ?event.action, "Applying inventory event");
        self.inventory.apply(event)
    }

    /// Run one epoch: build under the deadline, start provisioning, install.
    ///
    /// Returns the consumers that received a new revision.
    pub async fn rebuild(&mut self) -> Result<BTreeSet<String>> {
        let metrics = MetricsRecorder::new();
        let started = Instant::now();

        let built = tokio::time::timeout(self.build_timeout, self.builder.build(&self.inventory)).await;
        let elapsed = started.elapsed().as_secs_f64();

        let output = match built {
            Err(_) => {
                metrics.record_epoch("timeout", elapsed);
                return Err(Error::build_timeout(self.build_timeout.as_millis() as u64));
            }
            Ok(Err(e)) => {
                metrics.record_epoch("failed", elapsed);
                return Err(e);
            }
            Ok(Ok(output)) => output,
        };

        let BuildOutput { resources, provisioning, .. } = output;
        self.provision(provisioning);

        if let Err(reason) = resources.check_consistency() {
            metrics.record_epoch("failed", elapsed);
            return Err(Error::inconsistent_snapshot("*", reason));
        }

        let updated = self.install(&resources).await;
        self.last_good = Some(resources);
        metrics.record_epoch("success", started.elapsed().as_secs_f64());
        Ok(updated)
    }

    fn provision(&self, requests: Vec<ProvisioningRequest>) {
        let Some(provisioner) = &self.provisioner else {
            return;
        };

        for request in requests {
            let secret = request.secret_name.clone();
            if provisioner.spawn(request, self.provisioned_tx.clone()) {
                info!(secret = %secret, "Provisioning certificate");
            } else {
                debug!(secret = %secret, "Provisioning already in progress");
            }
        }
    }

    /// Consumers a new bundle is installed for: the static consumer and every
    /// consumer with an open stream. Reconnecting consumers are welcomed.
    fn targets(&self) -> BTreeSet<String> {
        let mut targets = self.cache.subscribers();
        if let Some(consumer) = self.node_hash.static_consumer() {
            targets.insert(consumer.to_string());
        }
        targets
    }

    async fn install(&self, resources: &Resources) -> BTreeSet<String> {
        let version = Utc::now().to_rfc3339();
        let mut updated = BTreeSet::new();
        let targets = self.targets();
        self.cache.prune(&targets);

        for consumer in targets {
            if self.install_for(&consumer, &version, resources).await {
                updated.insert(consumer);
            }
        }

        updated
    }

    async fn install_for(&self, consumer: &str, version: &str, resources: &Resources) -> bool {
        match self.cache.set_snapshot(consumer, Snapshot::new(version, resources.clone())).await {
            Ok(changed) => changed,
            Err(e) => {
                warn!(consumer = %consumer, version = %version, error = %e, "Keeping previous snapshot");
                false
            }
        }
    }

    /// Give a newly connected consumer the last good bundle without a rebuild
    async fn welcome(&self, consumer: &str) {
        match &self.last_good {
            Some(resources) => {
                let version = Utc::now().to_rfc3339();
                if self.install_for(consumer, &version, resources).await {
                    info!(consumer = %consumer, "Installed last good snapshot for new consumer");
                }
            }
            None => debug!(consumer = %consumer, "No snapshot built yet for new consumer"),
        }
    }

    async fn run_epoch(&mut self, trigger: &'static str) {
        match self.rebuild().await {
            Ok(updated) if updated.is_empty() => {
                debug!(trigger, "Epoch produced no changes")
            }
            Ok(updated) => info!(trigger, consumers = ?updated, "Epoch installed new snapshots"),
            Err(e @ Error::BuildTimeout { .. }) => {
                warn!(trigger, error = %e, "Epoch aborted; retrying on the next tick")
            }
            Err(e) => error!(trigger, error = %e, "Epoch failed; serving previous snapshot"),
        }
    }

    /// Drive epochs until `shutdown` is cancelled.
    ///
    /// Bursts of inventory events are coalesced into one rebuild.
    pub async fn run(
        mut self,
        events: mpsc::Receiver<InventoryEvent>,
        shutdown: CancellationToken,
    ) {
        let mut events = Some(events);
        let mut provisioned = self.provisioned_rx.take();
        let mut announcements = self.cache.take_announcements();
        let mut ticker = tokio::time::interval(self.rebuild_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            build_timeout_ms = self.build_timeout.as_millis() as u64,
            interval_ms = self.rebuild_interval.as_millis() as u64,
            "Epoch driver started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Epoch driver stopping");
                    return;
                }
                event = next(&mut events) => {
                    let Some(event) = event else {
                        debug!("Inventory source closed; continuing with periodic rebuilds");
                        events = None;
                        continue;
                    };
                    let mut changed = self.apply(event);
                    if let Some(rx) = events.as_mut() {
                        while let Ok(event) = rx.try_recv() {
                            changed |= self.apply(event);
                        }
                    }
                    if changed {
                        self.run_epoch("inventory").await;
                    }
                }
                secret = next(&mut provisioned) => {
                    if let Some(secret) = secret {
                        info!(secret = %secret, "Certificate provisioned; rebuilding");
                        self.run_epoch("certificate").await;
                    }
                }
                consumer = next_unbounded(&mut announcements) => {
                    if let Some(consumer) = consumer {
                        self.welcome(&consumer).await;
                    }
                }
                _ = ticker.tick() => {
                    self.run_epoch("tick").await;
                }
            }
        }
    }
}

/// Next message, or pending forever once the channel is gone
async fn next<T>(rx: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_unbounded<T>(rx: &mut Option<mpsc::UnboundedReceiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
