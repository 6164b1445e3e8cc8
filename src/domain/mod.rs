//! Domain layer
//!
//! Pure resource model for one configuration epoch: clusters and their
//! endpoints, virtual hosts and routes, listeners with filter chains, TLS
//! secrets, and the aggregate [`Resources`] bundle handed to the snapshot
//! cache. Nothing in here performs I/O or knows about the Envoy wire format.
//!
//! All types are values. A new epoch builds new values; nothing is mutated
//! after it has been placed in a snapshot.

pub mod cluster;
pub mod listener;
pub mod route;
pub mod secret;
pub mod snapshot;

pub use cluster::{Cluster, DiscoveryMode, Endpoint, HealthStatus, Protocol, TcpKeepalive};
pub use listener::{DownstreamTls, FilterChain, Listener};
pub use route::{Route, RouteAction, RouteConfig, VirtualHost};
pub use secret::Secret;
pub use snapshot::{ResourceType, Resources, Snapshot};
