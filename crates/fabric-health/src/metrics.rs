//! ---
//! fabric_section: "02-health-monitoring"
//! fabric_subsection: "module"
//! fabric_type: "source"
//! fabric_scope: "code"
//! fabric_description: "Probe and transition metrics."
//! fabric_version: "v0.0.0-prealpha"
//! fabric_owner: "tbd"
//! ---
use std::time::Duration;

use anyhow::Result;
use fabric_metrics::SharedRegistry;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts};

use crate::element::{HealthStatus, ProbeOutcome};

/// Metrics published by the health monitor.
#[derive(Clone)]
pub struct HealthMetrics {
    probes_total: IntCounterVec,
    probe_latency_seconds: HistogramVec,
    transitions_total: IntCounterVec,
}

impl HealthMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let probes_total = IntCounterVec::new(
            Opts::new(
                "fabric_health_probes_total",
                "Probe observations by element and outcome",
            ),
            &["element", "outcome"],
        )?;
        registry.register(Box::new(probes_total.clone()))?;

        let probe_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "fabric_health_probe_latency_seconds",
                "Wall time spent waiting on the probe transport",
            )
            .buckets(prometheus::exponential_buckets(0.0005, 2.0, 14)?),
            &["element"],
        )?;
        registry.register(Box::new(probe_latency_seconds.clone()))?;

        let transitions_total = IntCounterVec::new(
            Opts::new(
                "fabric_health_transitions_total",
                "Debounced status transitions per element",
            ),
            &["element", "from", "to"],
        )?;
        registry.register(Box::new(transitions_total.clone()))?;

        Ok(Self {
            probes_total,
            probe_latency_seconds,
            transitions_total,
        })
    }

    pub fn observe_probe(&self, element: &str, outcome: ProbeOutcome, latency: Option<Duration>) {
        self.probes_total
            .with_label_values(&[element, outcome.as_str()])
            .inc();
        if let Some(latency) = latency {
            self.probe_latency_seconds
                .with_label_values(&[element])
                .observe(latency.as_secs_f64());
        }
    }

    pub fn record_transition(&self, element: &str, from: HealthStatus, to: HealthStatus) {
        self.transitions_total
            .with_label_values(&[element, from.as_str(), to.as_str()])
            .inc();
    }
}

impl std::fmt::Debug for HealthMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMetrics").finish_non_exhaustive()
    }
}
