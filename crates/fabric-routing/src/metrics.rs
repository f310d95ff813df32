//! ---
//! fabric_section: "04-routing-snapshots"
//! fabric_subsection: "module"
//! fabric_type: "source"
//! fabric_scope: "code"
//! fabric_description: "Snapshot capture metrics."
//! fabric_version: "v0.0.0-prealpha"
//! fabric_owner: "tbd"
//! ---
use anyhow::Result;
use fabric_metrics::SharedRegistry;
use prometheus::{IntCounterVec, IntGaugeVec, Opts};

/// Metrics published by the snapshot store.
#[derive(Clone)]
pub struct RoutingMetrics {
    captures_total: IntCounterVec,
    snapshot_routes: IntGaugeVec,
    snapshot_version: IntGaugeVec,
}

impl RoutingMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let captures_total = IntCounterVec::new(
            Opts::new(
                "fabric_snapshot_captures_total",
                "Snapshot capture attempts by router and outcome",
            ),
            &["router", "outcome"],
        )?;
        registry.register(Box::new(captures_total.clone()))?;

        let snapshot_routes = IntGaugeVec::new(
            Opts::new(
                "fabric_snapshot_routes",
                "Best paths held in the latest snapshot",
            ),
            &["router"],
        )?;
        registry.register(Box::new(snapshot_routes.clone()))?;

        let snapshot_version = IntGaugeVec::new(
            Opts::new("fabric_snapshot_version", "Version of the latest snapshot"),
            &["router"],
        )?;
        registry.register(Box::new(snapshot_version.clone()))?;

        Ok(Self {
            captures_total,
            snapshot_routes,
            snapshot_version,
        })
    }

    pub fn record_capture(&self, router: &str, outcome: &str) {
        self.captures_total
            .with_label_values(&[router, outcome])
            .inc();
    }

    pub fn set_latest(&self, router: &str, version: u64, routes: usize) {
        self.snapshot_version
            .with_label_values(&[router])
            .set(version as i64);
        self.snapshot_routes
            .with_label_values(&[router])
            .set(routes as i64);
    }
}

impl std::fmt::Debug for RoutingMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingMetrics").finish_non_exhaustive()
    }
}
