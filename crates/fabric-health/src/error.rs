//! ---
//! fabric_section: "02-health-monitoring"
//! fabric_subsection: "module"
//! fabric_type: "source"
//! fabric_scope: "code"
//! fabric_description: "Health monitor error types."
//! fabric_version: "v0.0.0-prealpha"
//! fabric_owner: "tbd"
//! ---
use thiserror::Error;

pub type Result<T> = std::result::Result<T, HealthError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HealthError {
    #[error("element '{0}' is not monitored")]
    UnknownElement(String),
    #[error("element '{0}' is declared more than once")]
    DuplicateElement(String),
    #[error(
        "hysteresis thresholds must be at least 2 (failures_to_down={failures_to_down}, successes_to_healthy={successes_to_healthy})"
    )]
    InvalidThresholds {
        failures_to_down: u32,
        successes_to_healthy: u32,
    },
}
