//! ---
//! fabric_section: "06-collaborator-adapters"
//! fabric_subsection: "module"
//! fabric_type: "source"
//! fabric_scope: "code"
//! fabric_description: "Open vSwitch controller attachment and leaf uplink programming."
//! fabric_version: "v0.0.0-prealpha"
//! fabric_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use fabric_common::config::AdapterConfig;
use fabric_routing::{ForwardingPlane, ForwardingUpdate};
use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::runner::{CommandLine, CommandRunner};

const LOG_TARGET: &str = "fabric::adapters::ovs";
const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);
const OPENFLOW: &str = "OpenFlow13";
/// Default IPv4 route of a leaf towards the spine layer.
const UPLINK_MATCH: &str = "table=0,priority=50,dl_type=0x0800";

pub struct OvsForwardingPlane {
    runner: Arc<dyn CommandRunner>,
    ovs_vsctl: String,
    ovs_ofctl: String,
    controller_target: String,
    uplinks: IndexMap<String, IndexMap<String, u32>>,
}

impl std::fmt::Debug for OvsForwardingPlane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OvsForwardingPlane")
            .field("controller_target", &self.controller_target)
            .field("leaves", &self.uplinks.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl OvsForwardingPlane {
    pub fn new(config: &AdapterConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            ovs_vsctl: config.ovs_vsctl.clone(),
            ovs_ofctl: config.ovs_ofctl.clone(),
            controller_target: config.controller_target.clone(),
            uplinks: config.uplinks.clone(),
        }
    }

    async fn vsctl(&self, args: &[&str]) -> Result<()> {
        let line = CommandLine::new(self.ovs_vsctl.as_str(), args.iter().copied());
        self.runner
            .run(&line, COMMAND_TIMEOUT)
            .await?
            .into_stdout(&line)?;
        Ok(())
    }

    async fn ofctl(&self, args: &[&str]) -> Result<()> {
        let mut full = vec!["-O", OPENFLOW];
        full.extend_from_slice(args);
        let line = CommandLine::new(self.ovs_ofctl.as_str(), full);
        self.runner
            .run(&line, COMMAND_TIMEOUT)
            .await?
            .into_stdout(&line)?;
        Ok(())
    }
}

#[async_trait]
impl ForwardingPlane for OvsForwardingPlane {
    /// Point each leaf's default uplink at its first healthy spine of the domain. Leaves with
    /// no healthy spine lose the uplink flow and fall through to the controller.
    async fn set_forwarding(&self, update: &ForwardingUpdate) -> Result<()> {
        let mut programmed = 0usize;
        for (leaf, ports) in &self.uplinks {
            let in_domain = ports
                .keys()
                .any(|spine| update.healthy.contains(spine) || update.failed.contains(spine));
            if !in_domain {
                continue;
            }
            let port = update
                .healthy
                .iter()
                .find_map(|spine| ports.get(spine).copied());

            self.ofctl(&["--strict", "del-flows", leaf.as_str(), UPLINK_MATCH])
                .await?;
            match port {
                Some(port) => {
                    let flow = format!("{UPLINK_MATCH},actions=output:{port}");
                    self.ofctl(&["add-flow", leaf.as_str(), flow.as_str()]).await?;
                    debug!(target: LOG_TARGET, leaf = %leaf, port, "uplink reprogrammed");
                }
                None => {
                    warn!(target: LOG_TARGET, leaf = %leaf, domain = %update.domain, "no healthy uplink left")
                }
            }
            programmed += 1;
        }
        if programmed == 0 {
            debug!(target: LOG_TARGET, domain = %update.domain, "no leaf uplinks cross this domain");
        } else {
            info!(target: LOG_TARGET, domain = %update.domain, leaves = programmed, healthy = ?update.healthy, "forwarding reprogrammed");
        }
        Ok(())
    }

    async fn attach_controller(&self, switch: &str) -> Result<()> {
        self.vsctl(&["set-controller", switch, self.controller_target.as_str()])
            .await?;
        info!(target: LOG_TARGET, switch, controller = %self.controller_target, "controller attached");
        Ok(())
    }

    /// Detached switches are put in secure fail mode so they keep their installed flows
    /// instead of falling back to MAC learning.
    async fn detach_controller(&self, switch: &str) -> Result<()> {
        self.vsctl(&["set-fail-mode", switch, "secure"]).await?;
        self.vsctl(&["del-controller", switch]).await?;
        info!(target: LOG_TARGET, switch, "controller detached");
        Ok(())
    }
}
