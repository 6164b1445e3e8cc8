//! Virtual host registry
//!
//! Merges per-service routing declarations into virtual hosts. Each primary
//! domain owns one virtual host; alias domains are claimed globally and may
//! never be shared between two virtual hosts.
//!
//! The registry is a plain value owned by one build. Output order follows
//! insertion order, so callers must add services in a stable order to get
//! reproducible results.

use std::collections::HashMap;
use std::time::Duration;

use crate::domain::{Route, VirtualHost};
use crate::errors::{Error, Result};

/// Routing part of a service declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingLabel {
    pub domain: String,
    pub extra_domains: Vec<String>,
    pub path_prefix: String,
    pub upstream_host: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Default)]
pub struct VirtualHostRegistry {
    vhosts: Vec<VirtualHost>,
    /// primary domain -> index into `vhosts`
    by_primary: HashMap<String, usize>,
    /// every claimed domain -> index of the owning virtual host
    claimed: HashMap<String, usize>,
}

impl VirtualHostRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the route of one service.
    ///
    /// Fails with [`Error::DomainConflict`] when the primary domain or one of
    /// the alias domains already belongs to another virtual host. A failed
    /// call leaves the registry unchanged.
    pub fn add_service(&mut self, cluster_id: &str, label: &RoutingLabel) -> Result<()> {
        let primary = label.domain.as_str();
        let existing = self.by_primary.get(primary).copied();

        if existing.is_none() {
            if let Some(&owner) = self.claimed.get(primary) {
                return Err(Error::domain_conflict(primary, &self.vhosts[owner].name));
            }
        }

        let mut new_aliases: Vec<&str> = Vec::new();
        for alias in &label.extra_domains {
            if alias == primary || new_aliases.contains(&alias.as_str()) {
                continue;
            }
            match self.claimed.get(alias.as_str()) {
                Some(&owner) if Some(owner) == existing => continue,
                Some(&owner) => {
                    return Err(Error::domain_conflict(alias, &self.vhosts[owner].name));
                }
                None => new_aliases.push(alias),
            }
        }

        let index = match existing {
            Some(index) => index,
            None => {
                self.vhosts.push(VirtualHost::new(primary));
                let index = self.vhosts.len() - 1;
                self.by_primary.insert(primary.to_string(), index);
                self.claimed.insert(primary.to_string(), index);
                index
            }
        };

        let route = Route::forward(
            format!("{}_route", cluster_id),
            label.path_prefix.clone(),
            cluster_id,
            label.upstream_host.clone(),
            label.timeout,
        );

        let vhost = &mut self.vhosts[index];
        if route.is_root() {
            vhost.routes.push(route);
        } else {
            vhost.routes.insert(0, route);
        }

        for alias in new_aliases {
            vhost.domains.push(alias.to_string());
            self.claimed.insert(alias.to_string(), index);
        }

        Ok(())
    }

    /// Virtual hosts in the order their primary domain was first seen
    pub fn virtual_hosts(&self) -> &[VirtualHost] {
        &self.vhosts
    }

    pub fn into_virtual_hosts(self) -> Vec<VirtualHost> {
        self.vhosts
    }

    /// Virtual host owning `domain`, as primary or alias
    pub fn owner_of(&self, domain: &str) -> Option<&VirtualHost> {
        self.claimed.get(domain).map(|&index| &self.vhosts[index])
    }

    pub fn len(&self) -> usize {
        self.vhosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vhosts.is_empty()
    }
}
