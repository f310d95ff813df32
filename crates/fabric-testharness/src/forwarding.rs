//! ---
//! fabric_section: "09-simulation"
//! fabric_subsection: "module"
//! fabric_type: "source"
//! fabric_scope: "code"
//! fabric_description: "Forwarding plane that records every programming call."
//! fabric_version: "v0.0.0-prealpha"
//! fabric_owner: "tbd"
//! ---
use std::collections::HashSet;

use async_trait::async_trait;
use fabric_routing::{ForwardingPlane, ForwardingUpdate};
use parking_lot::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaneCall {
    SetForwarding(ForwardingUpdate),
    Attach(String),
    Detach(String),
}

#[derive(Debug, Default)]
pub struct RecordingForwardingPlane {
    calls: Mutex<Vec<PlaneCall>>,
    detached: Mutex<HashSet<String>>,
    failure: Mutex<Option<String>>,
}

impl RecordingForwardingPlane {
    pub fn calls(&self) -> Vec<PlaneCall> {
        self.calls.lock().clone()
    }

    pub fn updates(&self) -> Vec<ForwardingUpdate> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                PlaneCall::SetForwarding(update) => Some(update.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn last_update(&self, domain: &str) -> Option<ForwardingUpdate> {
        self.updates()
            .into_iter()
            .rev()
            .find(|update| update.domain == domain)
    }

    pub fn is_attached(&self, switch: &str) -> bool {
        !self.detached.lock().contains(switch)
    }

    /// Fail every subsequent call with `message`; `None` restores normal operation.
    pub fn fail_with(&self, message: Option<&str>) {
        *self.failure.lock() = message.map(str::to_owned);
    }

    fn check(&self) -> anyhow::Result<()> {
        match self.failure.lock().as_deref() {
            Some(message) => anyhow::bail!("{message}"),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ForwardingPlane for RecordingForwardingPlane {
    async fn set_forwarding(&self, update: &ForwardingUpdate) -> anyhow::Result<()> {
        self.calls.lock().push(PlaneCall::SetForwarding(update.clone()));
        self.check()
    }

    async fn attach_controller(&self, switch: &str) -> anyhow::Result<()> {
        self.calls.lock().push(PlaneCall::Attach(switch.to_owned()));
        self.check()?;
        self.detached.lock().remove(switch);
        Ok(())
    }

    async fn detach_controller(&self, switch: &str) -> anyhow::Result<()> {
        self.calls.lock().push(PlaneCall::Detach(switch.to_owned()));
        self.check()?;
        self.detached.lock().insert(switch.to_owned());
        Ok(())
    }
}
