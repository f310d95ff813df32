//! ---
//! fabric_section: "05-resilience-fault-tolerance"
//! fabric_subsection: "module"
//! fabric_type: "source"
//! fabric_scope: "code"
//! fabric_description: "Fail-closed and fail-static decisions per protection domain."
//! fabric_version: "v0.0.0-prealpha"
//! fabric_owner: "tbd"
//! ---
use std::fmt;

use chrono::{DateTime, Utc};
use fabric_common::config::{DomainConfig, DomainThreshold};
use fabric_health::{HealthStatus, HealthView};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::metrics::ResilienceMetrics;

const LOG_TARGET: &str = "fabric::resilience::degradation";

/// Operating regime of a protection domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Regime {
    /// Failed members are isolated and traffic only crosses healthy ones.
    FailClosed,
    /// The last-known-good forwarding state is frozen in place.
    FailStatic,
}

impl Regime {
    /// Static label for metrics and status payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Regime::FailClosed => "fail-closed",
            Regime::FailStatic => "fail-static",
        }
    }
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a decision selected its regime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    /// Failed ratio is strictly below the threshold.
    BelowThreshold,
    /// Failed ratio is at or above the threshold.
    ThresholdReached,
    /// The domain has no members.
    EmptyDomain,
}

/// Named group of redundant elements sharing one failure threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectionDomain {
    /// Domain identifier.
    pub name: String,
    /// Element identifiers, in configuration order.
    pub members: Vec<String>,
    /// Failed-member ratio at which the domain switches to fail-static.
    pub threshold: DomainThreshold,
}

impl ProtectionDomain {
    /// Build a domain from its configuration entry.
    pub fn from_config(name: &str, config: &DomainConfig) -> Self {
        Self {
            name: name.to_owned(),
            members: config.members.clone(),
            threshold: config.threshold,
        }
    }
}

/// Outcome of evaluating one protection domain against current health.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailoverDecision {
    /// Domain the decision applies to.
    pub domain: String,
    /// Selected regime.
    pub regime: Regime,
    /// Members not currently healthy, in domain order.
    pub failed: Vec<String>,
    /// Healthy members, in domain order.
    pub healthy: Vec<String>,
    /// Number of members.
    pub total: usize,
    /// `failed / total`, zero for an empty domain. Informational only.
    pub ratio: f64,
    /// Threshold rendered as `numerator/denominator`.
    pub threshold: String,
    /// Most recent member transition the decision reflects.
    pub as_of: Option<DateTime<Utc>>,
    /// Rule that selected the regime.
    pub reason: DecisionReason,
}

impl FailoverDecision {
    /// Whether the decision freezes forwarding state.
    pub fn is_fail_static(&self) -> bool {
        self.regime == Regime::FailStatic
    }
}

/// Stateless mapping from member health to a regime.
///
/// A member is failed unless its status is healthy; members the monitor does not know are
/// failed too. `failed / total >= threshold` selects fail-static and an empty domain is always
/// fail-static.
#[derive(Debug, Clone, Copy, Default)]
pub struct DegradationPolicy;

impl DegradationPolicy {
    /// Construct the policy.
    pub fn new() -> Self {
        Self
    }

    /// Evaluate `domain` against `health`. Pure: equal inputs always yield equal decisions.
    pub fn evaluate<H>(&self, domain: &ProtectionDomain, health: &H) -> FailoverDecision
    where
        H: HealthView + ?Sized,
    {
        let mut failed = Vec::new();
        let mut healthy = Vec::new();
        let mut as_of: Option<DateTime<Utc>> = None;

        for member in &domain.members {
            match health.state_of(member) {
                Some(state) => {
                    if let Some(at) = state.last_transition_at {
                        as_of = Some(as_of.map_or(at, |current| current.max(at)));
                    }
                    if state.status == HealthStatus::Healthy {
                        healthy.push(member.clone());
                    } else {
                        failed.push(member.clone());
                    }
                }
                None => failed.push(member.clone()),
            }
        }

        let total = domain.members.len();
        let (regime, reason) = if total == 0 {
            (Regime::FailStatic, DecisionReason::EmptyDomain)
        } else if domain.threshold.is_reached(failed.len(), total) {
            (Regime::FailStatic, DecisionReason::ThresholdReached)
        } else {
            (Regime::FailClosed, DecisionReason::BelowThreshold)
        };
        let ratio = if total == 0 {
            0.0
        } else {
            failed.len() as f64 / total as f64
        };

        FailoverDecision {
            domain: domain.name.clone(),
            regime,
            failed,
            healthy,
            total,
            ratio,
            threshold: domain.threshold.to_string(),
            as_of,
            reason,
        }
    }
}

/// Decision produced by a [`DomainTracker`] together with what changed since the last one.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedDecision {
    /// The new decision.
    pub decision: FailoverDecision,
    /// The regime differs from the previous decision (always true for the first one).
    pub regime_changed: bool,
    /// The failed set differs from the previous decision (always true for the first one).
    pub membership_changed: bool,
}

/// Keeps the last decision of one domain and reports regime transitions.
#[derive(Debug)]
pub struct DomainTracker {
    domain: ProtectionDomain,
    policy: DegradationPolicy,
    metrics: Option<ResilienceMetrics>,
    last: Option<FailoverDecision>,
}

impl DomainTracker {
    /// Track `domain` with the given policy.
    pub fn new(domain: ProtectionDomain, policy: DegradationPolicy) -> Self {
        Self {
            domain,
            policy,
            metrics: None,
            last: None,
        }
    }

    /// Attach metrics recording every evaluation and regime change.
    pub fn with_metrics(mut self, metrics: ResilienceMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Domain being tracked.
    pub fn domain(&self) -> &ProtectionDomain {
        &self.domain
    }

    /// Most recent decision, if any evaluation ran.
    pub fn last(&self) -> Option<&FailoverDecision> {
        self.last.as_ref()
    }

    /// Re-evaluate the domain and remember the result.
    pub fn evaluate<H>(&mut self, health: &H) -> TrackedDecision
    where
        H: HealthView + ?Sized,
    {
        let decision = self.policy.evaluate(&self.domain, health);
        let (regime_changed, membership_changed) = match &self.last {
            Some(previous) => (
                previous.regime != decision.regime,
                previous.failed != decision.failed,
            ),
            None => (true, true),
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_decision(&decision.domain, decision.regime);
            if regime_changed {
                metrics.record_regime_change(&decision.domain, decision.regime);
            }
        }

        if regime_changed {
            match decision.regime {
                Regime::FailStatic => warn!(
                    target: LOG_TARGET,
                    domain = %decision.domain,
                    regime = %decision.regime,
                    failed = decision.failed.len(),
                    total = decision.total,
                    threshold = %decision.threshold,
                    reason = ?decision.reason,
                    "protection domain froze forwarding state"
                ),
                Regime::FailClosed => info!(
                    target: LOG_TARGET,
                    domain = %decision.domain,
                    regime = %decision.regime,
                    failed = decision.failed.len(),
                    total = decision.total,
                    threshold = %decision.threshold,
                    "protection domain isolating failed members"
                ),
            }
        } else if membership_changed {
            debug!(
                target: LOG_TARGET,
                domain = %decision.domain,
                regime = %decision.regime,
                failed = ?decision.failed,
                "failed members changed"
            );
        }

        self.last = Some(decision.clone());
        TrackedDecision {
            decision,
            regime_changed,
            membership_changed,
        }
    }
}
