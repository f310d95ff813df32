//! ---
//! fabric_section: "09-simulation"
//! fabric_subsection: "module"
//! fabric_type: "source"
//! fabric_scope: "code"
//! fabric_description: "In-memory collaborators shared by tests and simulation mode."
//! fabric_version: "v0.0.0-prealpha"
//! fabric_owner: "tbd"
//! ---
//! In-memory stand-ins for the probe transport, routing daemons and switching plane.
//!
//! Every collaborator records the calls it receives so tests can assert on ordering, and
//! exposes knobs for injecting the failures the recovery path must tolerate.

mod daemon;
mod forwarding;
mod probe;

use std::sync::Arc;

use fabric_common::config::AppConfig;

pub use daemon::{DaemonCall, SimulatedRoutingDaemon};
pub use forwarding::{PlaneCall, RecordingForwardingPlane};
pub use probe::SimulatedProbe;

/// The three collaborators wired for one simulated fabric.
#[derive(Debug, Clone)]
pub struct SimulatedFabric {
    pub probe: Arc<SimulatedProbe>,
    pub daemon: Arc<SimulatedRoutingDaemon>,
    pub forwarding: Arc<RecordingForwardingPlane>,
}

impl SimulatedFabric {
    /// Every element reachable, every router running with RIBs derived from its peers.
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            probe: Arc::new(SimulatedProbe::new(true)),
            daemon: Arc::new(SimulatedRoutingDaemon::from_config(config)),
            forwarding: Arc::new(RecordingForwardingPlane::default()),
        }
    }
}
