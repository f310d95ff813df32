//! ---
//! fabric_section: "05-resilience-fault-tolerance"
//! fabric_subsection: "module"
//! fabric_type: "source"
//! fabric_scope: "code"
//! fabric_description: "Degradation policy, restart backoff, and chaos tooling."
//! fabric_version: "v0.0.0-prealpha"
//! fabric_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Decides how the fabric reacts to lost redundancy and how it is exercised under fault.

pub mod chaos;
pub mod degradation;
pub mod metrics;
pub mod self_healing;

pub use chaos::{
    ChaosAction, ChaosEngine, ChaosEventRecord, ChaosOutcome, ChaosScenario, FaultTarget,
};
pub use degradation::{
    DecisionReason, DegradationPolicy, DomainTracker, FailoverDecision, ProtectionDomain, Regime,
    TrackedDecision,
};
pub use metrics::ResilienceMetrics;
pub use self_healing::{RestartPolicy, SelfHealingManager, SelfHealingOutcome};

/// Crate prelude collecting the most commonly used types.
pub mod prelude {
    pub use super::chaos::{ChaosEngine, ChaosScenario, FaultTarget};
    pub use super::degradation::{
        DegradationPolicy, DomainTracker, FailoverDecision, ProtectionDomain, Regime,
    };
    pub use super::metrics::ResilienceMetrics;
    pub use super::self_healing::{RestartPolicy, SelfHealingManager};
}
