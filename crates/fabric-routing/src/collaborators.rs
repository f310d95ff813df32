//! ---
//! fabric_section: "04-routing-snapshots"
//! fabric_subsection: "module"
//! fabric_type: "source"
//! fabric_scope: "code"
//! fabric_description: "Routing daemon and forwarding plane boundaries."
//! fabric_version: "v0.0.0-prealpha"
//! fabric_owner: "tbd"
//! ---
use async_trait::async_trait;
use fabric_common::config::RouterConfig;
use serde::Serialize;

use crate::route::{RouteRecord, StaticRoute};

/// Control surface of a router's routing daemon.
///
/// Implementations must not assume calls for different routers are serialized.
#[async_trait]
pub trait RoutingDaemon: Send + Sync + 'static {
    async fn start_daemon(&self, router: &str, config: &RouterConfig) -> anyhow::Result<()>;

    /// Stop the routing protocol. Installed static routes must survive the stop and the
    /// next start.
    async fn stop_daemon(&self, router: &str) -> anyhow::Result<()>;

    /// Every path currently in the router's RIB, including non-best ones.
    async fn query_rib(&self, router: &str) -> anyhow::Result<Vec<RouteRecord>>;

    /// Whether the daemon is up and has at least one established session.
    async fn is_ready(&self, router: &str) -> anyhow::Result<bool>;

    /// Remove dynamically learned routes from the kernel table. Returns the count removed
    /// when the implementation can tell.
    async fn flush_dynamic_routes(&self, router: &str) -> anyhow::Result<usize>;

    /// Install `routes`. Installed routes for the same prefixes with other next hops are
    /// removed; see [`crate::replace_fallback_routes`].
    async fn install_static_routes(
        &self,
        router: &str,
        routes: &[StaticRoute],
    ) -> anyhow::Result<()>;
}

/// Forwarding programme for one protection domain under fail-closed operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForwardingUpdate {
    pub domain: String,
    pub healthy: Vec<String>,
    pub failed: Vec<String>,
}

/// Control surface of the switching underlay.
#[async_trait]
pub trait ForwardingPlane: Send + Sync + 'static {
    /// Reinstall forwarding so traffic only crosses `update.healthy`.
    async fn set_forwarding(&self, update: &ForwardingUpdate) -> anyhow::Result<()>;

    async fn attach_controller(&self, switch: &str) -> anyhow::Result<()>;

    async fn detach_controller(&self, switch: &str) -> anyhow::Result<()>;
}
