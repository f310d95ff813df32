//! ---
//! fabric_section: "06-collaborator-adapters"
//! fabric_subsection: "module"
//! fabric_type: "source"
//! fabric_scope: "code"
//! fabric_description: "Production collaborators for the emulation host."
//! fabric_version: "v0.0.0-prealpha"
//! fabric_owner: "tbd"
//! ---
//! Collaborators that shell out to `ping`, FRR's `vtysh` and Open vSwitch. Every command goes
//! through a [`CommandRunner`] so tests can replay canned output.

pub mod frr;
pub mod ovs;
pub mod ping;
pub mod runner;

use std::sync::Arc;

use fabric_common::config::AppConfig;

pub use frr::FrrRoutingDaemon;
pub use ovs::OvsForwardingPlane;
pub use ping::PingProbe;
pub use runner::{CannedRunner, CommandLine, CommandOutput, CommandRunner, ProcessRunner};

/// The three host collaborators sharing one command runner.
#[derive(Debug, Clone)]
pub struct HostAdapters {
    pub probe: Arc<PingProbe>,
    pub daemon: Arc<FrrRoutingDaemon>,
    pub forwarding: Arc<OvsForwardingPlane>,
}

impl HostAdapters {
    pub fn from_config(config: &AppConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            probe: Arc::new(PingProbe::new(&config.adapters, Arc::clone(&runner))),
            daemon: Arc::new(FrrRoutingDaemon::from_config(config, Arc::clone(&runner))),
            forwarding: Arc::new(OvsForwardingPlane::new(&config.adapters, runner)),
        }
    }
}
