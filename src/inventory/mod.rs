//! Service inventory
//!
//! The inventory source reports backend services as add/remove/update events.
//! Every event only changes the current total [`Inventory`]; the resource graph
//! is always rebuilt from the whole inventory, never patched incrementally.

pub mod labels;
pub mod source;

use std::collections::BTreeMap;

pub use labels::ServiceLabels;
pub use source::FileInventorySource;

/// What happened to a service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventAction {
    Added,
    Removed,
    Updated,
}

/// One inventory change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryEvent {
    pub action: EventAction,
    pub service_id: String,
    /// Ignored for [`EventAction::Removed`]
    pub labels: ServiceLabels,
}

impl InventoryEvent {
    pub fn added(service_id: impl Into<String>, labels: ServiceLabels) -> Self {
        Self { action: EventAction::Added, service_id: service_id.into(), labels }
    }

    pub fn updated(service_id: impl Into<String>, labels: ServiceLabels) -> Self {
        Self { action: EventAction::Updated, service_id: service_id.into(), labels }
    }

    pub fn removed(service_id: impl Into<String>) -> Self {
        Self {
            action: EventAction::Removed,
            service_id: service_id.into(),
            labels: ServiceLabels::default(),
        }
    }
}

/// Current set of known services, ordered by service id.
///
/// Iteration order is stable so that identical inventories always build
/// identical resource sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    services: BTreeMap<String, ServiceLabels>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an event. Returns whether the inventory changed.
    pub fn apply(&mut self, event: InventoryEvent) -> bool {
        match event.action {
            EventAction::Added | EventAction::Updated => {
                match self.services.insert(event.service_id, event.labels.clone()) {
                    Some(previous) => previous != event.labels,
                    None => true,
                }
            }
            EventAction::Removed => self.services.remove(&event.service_id).is_some(),
        }
    }

    /// Services in ascending service id order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ServiceLabels)> {
        self.services.iter().map(|(id, labels)| (id.as_str(), labels))
    }

    pub fn get(&self, service_id: &str) -> Option<&ServiceLabels> {
        self.services.get(service_id)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl FromIterator<(String, ServiceLabels)> for Inventory {
    fn from_iter<I: IntoIterator<Item = (String, ServiceLabels)>>(iter: I) -> Self {
        Self { services: iter.into_iter().collect() }
    }
}
