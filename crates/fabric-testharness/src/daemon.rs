//! ---
//! fabric_section: "09-simulation"
//! fabric_subsection: "module"
//! fabric_type: "source"
//! fabric_scope: "code"
//! fabric_description: "In-memory routing daemons with a simulated kernel table."
//! fabric_version: "v0.0.0-prealpha"
//! fabric_owner: "tbd"
//! ---
use std::net::IpAddr;

use anyhow::bail;
use async_trait::async_trait;
use fabric_common::config::{AppConfig, RouterConfig};
use fabric_routing::{replace_fallback_routes, RouteRecord, RoutingDaemon, StaticRoute};
use indexmap::IndexMap;
use ipnetwork::IpNetwork;
use parking_lot::Mutex;
use tracing::{debug, warn};

const LOG_TARGET: &str = "fabric::testharness::daemon";

/// One call received by the simulated daemon, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonCall {
    Start(String),
    Stop(String),
    QueryRib(String),
    IsReady(String),
    Flush(String),
    InstallStatic(String, Vec<StaticRoute>),
}

#[derive(Debug, Clone)]
struct SimRouter {
    rib: Vec<RouteRecord>,
    running: bool,
    /// Learned routes still present in the kernel table.
    dynamic_in_kernel: bool,
    statics: Vec<StaticRoute>,
    ready: bool,
    query_error: Option<String>,
    start_failures: u32,
    starts: u32,
    flushes: u32,
}

impl SimRouter {
    fn new(rib: Vec<RouteRecord>) -> Self {
        Self {
            rib,
            running: true,
            dynamic_in_kernel: true,
            statics: Vec::new(),
            ready: true,
            query_error: None,
            start_failures: 0,
            starts: 0,
            flushes: 0,
        }
    }
}

/// Routing daemons for every router of a simulated fabric.
///
/// Routers start running with their RIB installed in the kernel. Killing a daemon leaves its
/// learned routes in the kernel until they are flushed, like a crashed `bgpd` does.
#[derive(Debug, Default)]
pub struct SimulatedRoutingDaemon {
    routers: Mutex<IndexMap<String, SimRouter>>,
    calls: Mutex<Vec<DaemonCall>>,
}

impl SimulatedRoutingDaemon {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive every router's RIB from its peers: each peer's configured networks are learned
    /// with the peer address as next hop.
    pub fn from_config(config: &AppConfig) -> Self {
        let daemon = Self::new();
        let distance = config.recovery.dynamic_admin_distance;
        for (router_id, router) in &config.routers {
            let mut rib = Vec::new();
            for peer in &router.peers {
                let neighbour = config.routers.iter().find(|(id, _)| {
                    config
                        .element(id)
                        .and_then(|element| element.address)
                        .is_some_and(|address| address == peer.address)
                });
                let Some((_, neighbour)) = neighbour else {
                    debug!(target: LOG_TARGET, router = %router_id, peer = %peer.address, "peer is not a simulated router");
                    continue;
                };
                for network in &neighbour.networks {
                    match network.parse::<IpNetwork>() {
                        Ok(prefix) => rib.push(RouteRecord {
                            prefix,
                            nexthop: peer.address,
                            as_path: vec![peer.asn],
                            admin_distance: distance,
                            valid: true,
                            best: true,
                        }),
                        Err(err) => {
                            warn!(target: LOG_TARGET, router = %router_id, network = %network, error = %err, "skipping unparsable network")
                        }
                    }
                }
            }
            daemon.add_router(router_id, rib);
        }
        daemon
    }

    pub fn add_router(&self, router: &str, rib: Vec<RouteRecord>) {
        self.routers
            .lock()
            .insert(router.to_owned(), SimRouter::new(rib));
    }

    pub fn set_rib(&self, router: &str, rib: Vec<RouteRecord>) {
        self.with_router(router, |state| state.rib = rib);
    }

    /// Make RIB queries fail with `message` until called again with `None`.
    pub fn fail_queries(&self, router: &str, message: Option<&str>) {
        self.with_router(router, |state| state.query_error = message.map(str::to_owned));
    }

    /// The next `count` starts fail.
    pub fn fail_next_starts(&self, router: &str, count: u32) {
        self.with_router(router, |state| state.start_failures = count);
    }

    /// Whether a running daemon reports an established session.
    pub fn set_ready(&self, router: &str, ready: bool) {
        self.with_router(router, |state| state.ready = ready);
    }

    /// Stop the daemon abruptly without touching the kernel table.
    pub fn kill(&self, router: &str) {
        self.with_router(router, |state| state.running = false);
    }

    pub fn is_running(&self, router: &str) -> bool {
        self.read(router, |state| state.running).unwrap_or(false)
    }

    pub fn static_routes(&self, router: &str) -> Vec<StaticRoute> {
        self.read(router, |state| state.statics.clone())
            .unwrap_or_default()
    }

    pub fn starts(&self, router: &str) -> u32 {
        self.read(router, |state| state.starts).unwrap_or(0)
    }

    pub fn flushes(&self, router: &str) -> u32 {
        self.read(router, |state| state.flushes).unwrap_or(0)
    }

    pub fn calls(&self) -> Vec<DaemonCall> {
        self.calls.lock().clone()
    }

    /// Calls for one router, in order.
    pub fn calls_for(&self, router: &str) -> Vec<DaemonCall> {
        self.calls
            .lock()
            .iter()
            .filter(|call| match call {
                DaemonCall::Start(r)
                | DaemonCall::Stop(r)
                | DaemonCall::QueryRib(r)
                | DaemonCall::IsReady(r)
                | DaemonCall::Flush(r)
                | DaemonCall::InstallStatic(r, _) => r == router,
            })
            .cloned()
            .collect()
    }

    /// Effective kernel table: per prefix the entry with the lowest administrative distance.
    pub fn forwarding_table(&self, router: &str) -> Vec<(IpNetwork, IpAddr, u8)> {
        let Some(state) = self.read(router, |state| state.clone()) else {
            return Vec::new();
        };
        let mut candidates: Vec<(IpNetwork, IpAddr, u8)> = state
            .statics
            .iter()
            .map(|route| (route.prefix, route.nexthop, route.admin_distance))
            .collect();
        if state.dynamic_in_kernel {
            candidates.extend(
                state
                    .rib
                    .iter()
                    .filter(|record| record.is_usable())
                    .map(|record| (record.prefix, record.nexthop, record.admin_distance)),
            );
        }
        candidates
            .sort_by_key(|(prefix, _, distance)| (prefix.network(), prefix.prefix(), *distance));
        candidates.dedup_by_key(|(prefix, _, _)| *prefix);
        candidates
    }

    fn with_router<F>(&self, router: &str, apply: F)
    where
        F: FnOnce(&mut SimRouter),
    {
        if let Some(state) = self.routers.lock().get_mut(router) {
            apply(state);
        }
    }

    fn read<T, F>(&self, router: &str, read: F) -> Option<T>
    where
        F: FnOnce(&SimRouter) -> T,
    {
        self.routers.lock().get(router).map(read)
    }

    fn record(&self, call: DaemonCall) {
        self.calls.lock().push(call);
    }

    fn update<T, F>(&self, router: &str, apply: F) -> anyhow::Result<T>
    where
        F: FnOnce(&mut SimRouter) -> anyhow::Result<T>,
    {
        match self.routers.lock().get_mut(router) {
            Some(state) => apply(state),
            None => bail!("router {router} is not simulated"),
        }
    }
}

#[async_trait]
impl RoutingDaemon for SimulatedRoutingDaemon {
    async fn start_daemon(&self, router: &str, _config: &RouterConfig) -> anyhow::Result<()> {
        self.record(DaemonCall::Start(router.to_owned()));
        self.update(router, |state| {
            if state.start_failures > 0 {
                state.start_failures -= 1;
                bail!("bgpd on {router} exited during startup");
            }
            state.running = true;
            state.dynamic_in_kernel = true;
            state.starts += 1;
            Ok(())
        })
    }

    async fn stop_daemon(&self, router: &str) -> anyhow::Result<()> {
        self.record(DaemonCall::Stop(router.to_owned()));
        self.update(router, |state| {
            state.running = false;
            Ok(())
        })
    }

    async fn query_rib(&self, router: &str) -> anyhow::Result<Vec<RouteRecord>> {
        self.record(DaemonCall::QueryRib(router.to_owned()));
        self.update(router, |state| {
            if let Some(message) = &state.query_error {
                bail!("{message}");
            }
            if !state.running {
                bail!("bgpd is not running on {router}");
            }
            Ok(state.rib.clone())
        })
    }

    async fn is_ready(&self, router: &str) -> anyhow::Result<bool> {
        self.record(DaemonCall::IsReady(router.to_owned()));
        self.update(router, |state| Ok(state.running && state.ready))
    }

    async fn flush_dynamic_routes(&self, router: &str) -> anyhow::Result<usize> {
        self.record(DaemonCall::Flush(router.to_owned()));
        self.update(router, |state| {
            state.flushes += 1;
            let removed = if state.dynamic_in_kernel {
                state.rib.iter().filter(|record| record.is_usable()).count()
            } else {
                0
            };
            state.dynamic_in_kernel = false;
            Ok(removed)
        })
    }

    async fn install_static_routes(
        &self,
        router: &str,
        routes: &[StaticRoute],
    ) -> anyhow::Result<()> {
        self.record(DaemonCall::InstallStatic(router.to_owned(), routes.to_vec()));
        self.update(router, |state| {
            replace_fallback_routes(&mut state.statics, routes);
            Ok(())
        })
    }
}
