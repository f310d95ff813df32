//! ---
//! fabric_section: "04-routing-snapshots"
//! fabric_subsection: "module"
//! fabric_type: "source"
//! fabric_scope: "code"
//! fabric_description: "Versioned per-router best-path snapshots."
//! fabric_version: "v0.0.0-prealpha"
//! fabric_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::collaborators::RoutingDaemon;
use crate::error::{Result, SnapshotError};
use crate::metrics::RoutingMetrics;
use crate::route::{RouteRecord, StaticRoute};

const LOG_TARGET: &str = "fabric::routing::snapshot";

/// Best paths of one router at one instant. Never mutated once published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteSnapshot {
    pub router_id: String,
    pub version: u64,
    pub captured_at: DateTime<Utc>,
    pub records: Vec<RouteRecord>,
}

impl RouteSnapshot {
    /// Fallback routes for every record, one per prefix and next hop.
    pub fn as_static_routes(&self, admin_distance: u8, tag: u32) -> Vec<StaticRoute> {
        self.records
            .iter()
            .map(|record| StaticRoute::from_record(record, admin_distance, tag))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Status summary of one router's snapshot slot.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotFreshness {
    pub router_id: String,
    pub version: Option<u64>,
    pub captured_at: Option<DateTime<Utc>>,
    pub route_count: usize,
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
struct RouterSlot {
    latest: ArcSwapOption<RouteSnapshot>,
    last_error: ArcSwapOption<String>,
    capturing: AtomicBool,
}

/// Clears the in-flight flag even when the capture future is dropped mid-query.
struct CaptureGuard<'a>(&'a AtomicBool);

impl Drop for CaptureGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Holds the latest snapshot per router.
///
/// Reads are lock-free. At most one capture per router is in flight and no lock is held while
/// the RIB is queried; routers never share state.
pub struct RouteSnapshotStore {
    slots: IndexMap<String, RouterSlot>,
    daemon: Arc<dyn RoutingDaemon>,
    metrics: Option<RoutingMetrics>,
}

impl std::fmt::Debug for RouteSnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteSnapshotStore")
            .field("routers", &self.slots.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl RouteSnapshotStore {
    pub fn new<I, S>(routers: I, daemon: Arc<dyn RoutingDaemon>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            slots: routers
                .into_iter()
                .map(|router| (router.into(), RouterSlot::default()))
                .collect(),
            daemon,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: RoutingMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn routers(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }

    pub fn daemon(&self) -> Arc<dyn RoutingDaemon> {
        Arc::clone(&self.daemon)
    }

    /// Query the router's RIB and publish its valid best paths as the new latest snapshot.
    ///
    /// A RIB without valid best paths publishes an empty snapshot. Only a failed query keeps
    /// the previously published snapshot in place.
    pub async fn capture(&self, router: &str) -> Result<Arc<RouteSnapshot>> {
        let slot = self
            .slots
            .get(router)
            .ok_or_else(|| SnapshotError::UnknownRouter(router.to_owned()))?;
        if slot.capturing.swap(true, Ordering::AcqRel) {
            self.record(router, "rejected");
            return Err(SnapshotError::CaptureInProgress(router.to_owned()));
        }
        let _guard = CaptureGuard(&slot.capturing);

        let rib = match self.daemon.query_rib(router).await {
            Ok(rib) => rib,
            Err(err) => {
                let message = format!("{err:#}");
                warn!(target: LOG_TARGET, router = %router, error = %message, "snapshot capture failed");
                slot.last_error.store(Some(Arc::new(message.clone())));
                self.record(router, "query_failed");
                return Err(SnapshotError::Query {
                    router: router.to_owned(),
                    message,
                });
            }
        };

        let total = rib.len();
        let mut records: Vec<RouteRecord> =
            rib.into_iter().filter(RouteRecord::is_usable).collect();
        records.sort_by(RouteRecord::snapshot_order);
        records.dedup_by(|a, b| a.prefix == b.prefix && a.nexthop == b.nexthop);
        if records.is_empty() {
            // Withdrawn routes must not come back as fallback statics.
            warn!(target: LOG_TARGET, router = %router, rib_paths = total, "rib holds no valid best paths; publishing empty snapshot");
        }

        let version = slot
            .latest
            .load_full()
            .map(|previous| previous.version + 1)
            .unwrap_or(1);
        let snapshot = Arc::new(RouteSnapshot {
            router_id: router.to_owned(),
            version,
            captured_at: Utc::now(),
            records,
        });
        slot.latest.store(Some(Arc::clone(&snapshot)));
        slot.last_error.store(None);

        if let Some(metrics) = &self.metrics {
            metrics.record_capture(router, "success");
            metrics.set_latest(router, version, snapshot.len());
        }
        debug!(target: LOG_TARGET, router = %router, version, routes = snapshot.len(), rib_paths = total, "snapshot captured");
        Ok(snapshot)
    }

    /// Most recent successfully captured snapshot, if any.
    pub fn latest(&self, router: &str) -> Option<Arc<RouteSnapshot>> {
        self.slots.get(router)?.latest.load_full()
    }

    pub fn freshness(&self) -> Vec<SnapshotFreshness> {
        self.slots
            .iter()
            .map(|(router, slot)| {
                let latest = slot.latest.load_full();
                SnapshotFreshness {
                    router_id: router.clone(),
                    version: latest.as_ref().map(|s| s.version),
                    captured_at: latest.as_ref().map(|s| s.captured_at),
                    route_count: latest.as_ref().map(|s| s.len()).unwrap_or(0),
                    last_error: slot.last_error.load_full().map(|e| String::clone(&e)),
                }
            })
            .collect()
    }

    /// Capture every router on a fixed cadence until `shutdown` fires.
    pub fn spawn_periodic_capture(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: &broadcast::Sender<()>,
    ) -> Vec<JoinHandle<()>> {
        self.slots
            .keys()
            .map(|router| {
                let store = Arc::clone(self);
                let router = router.clone();
                let mut shutdown = shutdown.subscribe();
                tokio::spawn(async move {
                    let mut ticker = time::interval(interval);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    info!(target: LOG_TARGET, router = %router, interval_s = interval.as_secs(), "periodic snapshot capture started");
                    loop {
                        tokio::select! {
                            _ = shutdown.recv() => break,
                            _ = ticker.tick() => {
                                // Failures are recorded on the slot and already logged.
                                let _ = store.capture(&router).await;
                            }
                        }
                    }
                    debug!(target: LOG_TARGET, router = %router, "periodic snapshot capture stopped");
                })
            })
            .collect()
    }

    fn record(&self, router: &str, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_capture(router, outcome);
        }
    }
}
