//! File-backed inventory source
//!
//! Polls a YAML file describing the running services and turns differences
//! between successive reads into [`InventoryEvent`]s:
//!
//! ```yaml
//! services:
//!   - id: web
//!     labels:
//!       envoy.endpoint.port: 8080
//!       envoy.route.domain: a.example.com
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{InventoryEvent, ServiceLabels};
use crate::errors::{Error, Result};

type RawServices = BTreeMap<String, BTreeMap<String, String>>;

#[derive(Debug, Deserialize)]
struct InventoryFile {
    #[serde(default)]
    services: Vec<ServiceEntry>,
}

#[derive(Debug, Deserialize)]
struct ServiceEntry {
    id: String,
    #[serde(default)]
    labels: BTreeMap<String, serde_yaml::Value>,
}

/// Periodically re-reads an inventory file and emits the changes
#[derive(Debug, Clone)]
pub struct FileInventorySource {
    path: PathBuf,
    interval: Duration,
}

impl FileInventorySource {
    pub fn new(path: impl Into<PathBuf>, interval: Duration) -> Self {
        Self { path: path.into(), interval }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and parse the inventory file into raw label maps keyed by service id
    pub async fn load(&self) -> Result<RawServices> {
        let contents = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            Error::storage(format!("failed to read inventory file {}", self.path.display()), e)
        })?;
        parse_inventory(&contents)
    }

    /// Poll until cancelled, sending one event per changed service.
    ///
    /// A file that cannot be read or parsed keeps the previous view, so a
    /// half-written file never removes every service at once.
    pub async fn run(self, events: mpsc::Sender<InventoryEvent>, shutdown: CancellationToken) {
        let mut known = RawServices::new();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(path = %self.path.display(), interval_ms = self.interval.as_millis() as u64, "Watching inventory file");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Inventory watcher stopping");
                    return;
                }
                _ = ticker.tick() => {}
            }

            let current = match self.load().await {
                Ok(current) => current,
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "Failed to load inventory; keeping previous view");
                    continue;
                }
            };

            for event in diff(&known, &current) {
                debug!(service = %event.service_id, action = ?event.action, "Inventory change");
                if events.send(event).await.is_err() {
                    debug!("Inventory receiver dropped; stopping watcher");
                    return;
                }
            }
            known = current;
        }
    }
}

fn parse_inventory(contents: &str) -> Result<RawServices> {
    let file: InventoryFile = serde_yaml::from_str(contents)?;
    let mut services = RawServices::new();

    for entry in file.services {
        let labels = entry
            .labels
            .into_iter()
            .filter_map(|(key, value)| scalar_to_string(value).map(|value| (key, value)))
            .collect();
        if services.insert(entry.id.clone(), labels).is_some() {
            return Err(Error::validation_field(
                format!("service '{}' is listed more than once", entry.id),
                "services",
            ));
        }
    }

    Ok(services)
}

fn scalar_to_string(value: serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Events turning `previous` into `current`, in service id order
fn diff(previous: &RawServices, current: &RawServices) -> Vec<InventoryEvent> {
    let mut events = Vec::new();

    for (id, labels) in current {
        match previous.get(id) {
            None => events.push(InventoryEvent::added(id, ServiceLabels::from_labels(labels))),
            Some(old) if old != labels => {
                events.push(InventoryEvent::updated(id, ServiceLabels::from_labels(labels)))
            }
            Some(_) => {}
        }
    }

    for id in previous.keys() {
        if !current.contains_key(id) {
            events.push(InventoryEvent::removed(id));
        }
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::EventAction;

    const INVENTORY: &str = r#"
services:
  - id: web
    labels:
      envoy.endpoint.port: 8080
      envoy.route.domain: a.example.com
  - id: api
    labels:
      envoy.endpoint.port: "9000"
      envoy.route.domain: a.example.com
      envoy.route.path: /api
"#;

    #[test]
    fn parses_numeric_and_string_labels() {
        let services = parse_inventory(INVENTORY).expect("parse inventory");

        assert_eq!(services.len(), 2);
        assert_eq!(services["web"]["envoy.endpoint.port"], "8080");
        assert_eq!(services["api"]["envoy.route.path"], "/api");
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let doubled = "services:\n  - id: web\n  - id: web\n";
        assert!(parse_inventory(doubled).is_err());
    }

    #[test]
    fn diff_emits_added_updated_removed() {
        let first = parse_inventory(INVENTORY).expect("parse inventory");
        let added = diff(&RawServices::new(), &first);
        assert_eq!(added.len(), 2);
        assert!(added.iter().all(|e| e.action == EventAction::Added));

        let mut second = first.clone();
        second.remove("web");
        second
            .get_mut("api")
            .expect("api present")
            .insert("envoy.endpoint.timeout".to_string(), "30s".to_string());

        let events = diff(&first, &second);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].action, EventAction::Updated);
        assert_eq!(events[0].labels.timeout_seconds, 30);
        assert_eq!(events[1], InventoryEvent::removed("web"));

        assert!(diff(&second, &second).is_empty());
    }

    #[tokio::test]
    async fn run_reports_initial_services() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("inventory.yaml");
        std::fs::write(&path, INVENTORY).expect("write inventory");

        let (tx, mut rx) = mpsc::channel(16);
        let shutdown = CancellationToken::new();
        let source = FileInventorySource::new(&path, Duration::from_millis(10));
        let handle = tokio::spawn(source.run(tx, shutdown.clone()));

        let first = rx.recv().await.expect("first event");
        let second = rx.recv().await.expect("second event");
        assert_eq!(first.service_id, "api");
        assert_eq!(second.service_id, "web");

        shutdown.cancel();
        handle.await.expect("watcher task");
    }
}
