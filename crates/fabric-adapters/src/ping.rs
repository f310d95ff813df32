//! ---
//! fabric_section: "06-collaborator-adapters"
//! fabric_subsection: "module"
//! fabric_type: "source"
//! fabric_scope: "code"
//! fabric_description: "Liveness probe over ping and Open vSwitch bridge checks."
//! fabric_version: "v0.0.0-prealpha"
//! fabric_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use fabric_common::config::AdapterConfig;
use fabric_health::{ElementContext, ProbeTransport};
use indexmap::IndexMap;

use crate::runner::{CommandLine, CommandRunner};

/// Probes addressed elements with a single ICMP echo and address-less switches by asking
/// Open vSwitch whether their bridge exists.
pub struct PingProbe {
    runner: Arc<dyn CommandRunner>,
    ping: String,
    ovs_vsctl: String,
    exec_prefix: IndexMap<String, Vec<String>>,
}

impl std::fmt::Debug for PingProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PingProbe")
            .field("ping", &self.ping)
            .field("ovs_vsctl", &self.ovs_vsctl)
            .finish_non_exhaustive()
    }
}

impl PingProbe {
    pub fn new(config: &AdapterConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            ping: config.ping.clone(),
            ovs_vsctl: config.ovs_vsctl.clone(),
            exec_prefix: config.exec_prefix.clone(),
        }
    }

    fn command_for(&self, element: &ElementContext) -> Result<CommandLine> {
        if let Some(address) = element.address {
            // ping -W takes whole seconds.
            let wait = element.probe_timeout.as_secs().max(1);
            let line = CommandLine::new(
                self.ping.as_str(),
                [
                    "-c".to_owned(),
                    "1".to_owned(),
                    "-W".to_owned(),
                    wait.to_string(),
                    address.to_string(),
                ],
            );
            let prefix = self
                .exec_prefix
                .get(&element.element_id)
                .map(Vec::as_slice)
                .unwrap_or_default();
            return Ok(line.with_prefix(prefix));
        }
        if element.role.is_switch() {
            return Ok(CommandLine::new(
                self.ovs_vsctl.as_str(),
                ["br-exists", element.element_id.as_str()],
            ));
        }
        bail!(
            "element {} ({}) has no address to probe",
            element.element_id,
            element.role
        )
    }
}

#[async_trait]
impl ProbeTransport for PingProbe {
    async fn probe(&self, element: &ElementContext) -> Result<bool> {
        let line = self.command_for(element)?;
        // The monitor bounds the probe too; the extra margin lets ping report its own timeout.
        let output = self
            .runner
            .run(&line, element.probe_timeout + Duration::from_millis(500))
            .await?;
        Ok(output.is_success())
    }
}
