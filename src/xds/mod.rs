//! Envoy xDS (eXtended Discovery Service) implementation
//!
//! Serves snapshots over the state-of-the-world Aggregated Discovery Service:
//! clusters, route configurations, listeners and TLS secrets all travel on a
//! single stream per proxy.

pub mod cache;
pub mod cluster;
pub mod events;
pub mod listener;
pub mod resources;
pub mod route;
pub mod secret;
pub mod server;
pub mod stream;

pub use cache::{CachedSnapshot, SnapshotCache, SnapshotWatch};
pub use events::{RequestKind, StreamEvent};
pub use resources::{
    BuiltResource, RenderedResources, CLUSTER_TYPE_URL, LISTENER_TYPE_URL, ROUTE_TYPE_URL,
    SECRET_TYPE_URL,
};
pub use server::{serve, DiscoveryServer};
pub use stream::{serve_stream, StreamSettings, SubscriptionState};
