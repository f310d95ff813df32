//! ---
//! fabric_section: "05-resilience-fault-tolerance"
//! fabric_subsection: "module"
//! fabric_type: "source"
//! fabric_scope: "code"
//! fabric_description: "Regime, recovery, and chaos metrics."
//! fabric_version: "v0.0.0-prealpha"
//! fabric_owner: "tbd"
//! ---
use std::time::Duration;

use anyhow::Result;
use fabric_metrics::SharedRegistry;
use prometheus::{self, HistogramOpts, HistogramVec, IntCounterVec, Opts};

use crate::degradation::Regime;
use crate::self_healing::SelfHealingOutcome;

/// Metrics published by the resilience subsystem.
#[derive(Clone)]
pub struct ResilienceMetrics {
    registry: SharedRegistry,
    decisions_total: IntCounterVec,
    regime_changes_total: IntCounterVec,
    recoveries_total: IntCounterVec,
    recovery_latency_seconds: HistogramVec,
    restart_attempts_total: IntCounterVec,
    chaos_actions_total: IntCounterVec,
}

impl ResilienceMetrics {
    /// Register the resilience metric family against the provided registry.
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let decisions_total = IntCounterVec::new(
            Opts::new(
                "fabric_domain_decisions_total",
                "Protection domain evaluations by resulting regime",
            ),
            &["domain", "regime"],
        )?;
        registry.register(Box::new(decisions_total.clone()))?;

        let regime_changes_total = IntCounterVec::new(
            Opts::new(
                "fabric_domain_regime_changes_total",
                "Protection domain transitions into a regime",
            ),
            &["domain", "regime"],
        )?;
        registry.register(Box::new(regime_changes_total.clone()))?;

        let recoveries_total = IntCounterVec::new(
            Opts::new(
                "fabric_recoveries_total",
                "Router recovery sequences by outcome",
            ),
            &["router", "outcome"],
        )?;
        registry.register(Box::new(recoveries_total.clone()))?;

        let histogram_opts = HistogramOpts::new(
            "fabric_recovery_latency_seconds",
            "Duration of a router recovery sequence from flush to readiness",
        )
        .buckets(prometheus::exponential_buckets(0.01, 2.0, 14)?);
        let recovery_latency_seconds = HistogramVec::new(histogram_opts, &["router"])?;
        registry.register(Box::new(recovery_latency_seconds.clone()))?;

        let restart_attempts_total = IntCounterVec::new(
            Opts::new(
                "fabric_daemon_restart_attempts_total",
                "Routing daemon restart attempts made by the self-healing supervisor",
            ),
            &["router", "outcome"],
        )?;
        registry.register(Box::new(restart_attempts_total.clone()))?;

        let chaos_actions_total = IntCounterVec::new(
            Opts::new(
                "fabric_chaos_actions_total",
                "Scenario actions executed by the chaos engine",
            ),
            &["action", "outcome"],
        )?;
        registry.register(Box::new(chaos_actions_total.clone()))?;

        Ok(Self {
            registry,
            decisions_total,
            regime_changes_total,
            recoveries_total,
            recovery_latency_seconds,
            restart_attempts_total,
            chaos_actions_total,
        })
    }

    /// Expose the underlying shared registry for convenience.
    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    /// Count one domain evaluation.
    pub fn record_decision(&self, domain: &str, regime: Regime) {
        self.decisions_total
            .with_label_values(&[domain, regime.as_str()])
            .inc();
    }

    /// Count a transition of `domain` into `regime`.
    pub fn record_regime_change(&self, domain: &str, regime: Regime) {
        self.regime_changes_total
            .with_label_values(&[domain, regime.as_str()])
            .inc();
    }

    /// Record a finished recovery sequence.
    pub fn observe_recovery(&self, router: &str, outcome: &str, duration: Duration) {
        self.recoveries_total
            .with_label_values(&[router, outcome])
            .inc();
        self.recovery_latency_seconds
            .with_label_values(&[router])
            .observe(duration.as_secs_f64());
    }

    /// Register a self-healing attempt outcome for observability.
    pub fn record_self_heal(&self, outcome: &SelfHealingOutcome) {
        let label_outcome = if outcome.success {
            "success"
        } else {
            "failure"
        };
        self.restart_attempts_total
            .with_label_values(&[outcome.router.as_str(), label_outcome])
            .inc_by(outcome.attempts as u64);
    }

    /// Bump the chaos counter for the provided action identifier.
    pub fn inc_chaos_action(&self, action: &str, outcome: &str) {
        self.chaos_actions_total
            .with_label_values(&[action, outcome])
            .inc();
    }
}

impl std::fmt::Debug for ResilienceMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilienceMetrics").finish_non_exhaustive()
    }
}
