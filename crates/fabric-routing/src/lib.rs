//! ---
//! fabric_section: "04-routing-snapshots"
//! fabric_subsection: "module"
//! fabric_type: "source"
//! fabric_scope: "code"
//! fabric_description: "Routing data model and snapshot store."
//! fabric_version: "v0.0.0-prealpha"
//! fabric_owner: "tbd"
//! ---
//! Last-known-good best paths per router and the collaborator traits used to reach routing
//! daemons and the switching plane.

mod collaborators;
mod error;
pub mod metrics;
mod route;
mod snapshot;

pub use collaborators::{ForwardingPlane, ForwardingUpdate, RoutingDaemon};
pub use error::{Result, SnapshotError};
pub use metrics::RoutingMetrics;
pub use route::{replace_fallback_routes, RouteRecord, StaticRoute};
pub use snapshot::{RouteSnapshot, RouteSnapshotStore, SnapshotFreshness};
