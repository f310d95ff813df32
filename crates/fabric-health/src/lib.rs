//! ---
//! fabric_section: "02-health-monitoring"
//! fabric_subsection: "module"
//! fabric_type: "source"
//! fabric_scope: "code"
//! fabric_description: "Element liveness monitoring with hysteresis."
//! fabric_version: "v0.0.0-prealpha"
//! fabric_owner: "tbd"
//! ---
//! Debounced liveness monitoring for fabric elements.
//!
//! The [`HealthMonitor`] is the only writer of element [`HealthState`]. Each element is probed
//! by its own task; transitions are published on a single ordered [`EventStream`].

mod element;
mod error;
pub mod metrics;
mod monitor;
mod probe;

pub use element::{
    ElementContext, ElementMachine, HealthState, HealthStatus, HysteresisThresholds, ProbeOutcome,
};
pub use error::{HealthError, Result};
pub use metrics::HealthMetrics;
pub use monitor::{EventStream, HealthMonitor, HealthView, StateChangeEvent};
pub use probe::ProbeTransport;
