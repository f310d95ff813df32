//! ---
//! fabric_section: "09-simulation"
//! fabric_subsection: "module"
//! fabric_type: "source"
//! fabric_scope: "code"
//! fabric_description: "Scriptable probe transport."
//! fabric_version: "v0.0.0-prealpha"
//! fabric_owner: "tbd"
//! ---
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use fabric_health::{ElementContext, ProbeTransport};
use parking_lot::Mutex;

/// Probe answering from a per-element reachability table.
///
/// Scripted answers are consumed first; afterwards the element's reachability flag (or the
/// default) applies. Elements listed with [`SimulatedProbe::fail_transport`] return errors.
#[derive(Debug)]
pub struct SimulatedProbe {
    default_reachable: bool,
    reachable: Mutex<HashMap<String, bool>>,
    scripts: Mutex<HashMap<String, VecDeque<bool>>>,
    broken: Mutex<HashMap<String, String>>,
    latency: Mutex<Option<Duration>>,
    calls: AtomicU64,
}

impl SimulatedProbe {
    pub fn new(default_reachable: bool) -> Self {
        Self {
            default_reachable,
            reachable: Mutex::new(HashMap::new()),
            scripts: Mutex::new(HashMap::new()),
            broken: Mutex::new(HashMap::new()),
            latency: Mutex::new(None),
            calls: AtomicU64::new(0),
        }
    }

    pub fn set_reachable(&self, element: &str, reachable: bool) {
        self.reachable.lock().insert(element.to_owned(), reachable);
    }

    /// Queue answers returned before the reachability table is consulted.
    pub fn script<I>(&self, element: &str, answers: I)
    where
        I: IntoIterator<Item = bool>,
    {
        self.scripts
            .lock()
            .entry(element.to_owned())
            .or_default()
            .extend(answers);
    }

    pub fn fail_transport(&self, element: &str, message: &str) {
        self.broken
            .lock()
            .insert(element.to_owned(), message.to_owned());
    }

    pub fn repair_transport(&self, element: &str) {
        self.broken.lock().remove(element);
    }

    /// Delay every answer, e.g. to exercise probe timeouts.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for SimulatedProbe {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl ProbeTransport for SimulatedProbe {
    async fn probe(&self, element: &ElementContext) -> anyhow::Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let id = element.element_id.as_str();
        if let Some(message) = self.broken.lock().get(id) {
            anyhow::bail!("{message}");
        }
        if let Some(answer) = self.scripts.lock().get_mut(id).and_then(VecDeque::pop_front) {
            return Ok(answer);
        }
        Ok(self
            .reachable
            .lock()
            .get(id)
            .copied()
            .unwrap_or(self.default_reachable))
    }
}

#[cfg(test)]
mod tests {
    use fabric_common::config::ElementRole;

    use super::*;

    fn ctx(id: &str) -> ElementContext {
        ElementContext {
            element_id: id.to_owned(),
            role: ElementRole::Leaf,
            address: None,
            probe_interval: Duration::from_millis(10),
            probe_timeout: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn scripts_take_precedence_over_reachability() {
        let probe = SimulatedProbe::new(true);
        probe.set_reachable("leaf1", false);
        probe.script("leaf1", [true]);
        assert!(probe.probe(&ctx("leaf1")).await.unwrap());
        assert!(!probe.probe(&ctx("leaf1")).await.unwrap());
        assert!(probe.probe(&ctx("leaf2")).await.unwrap());
        assert_eq!(probe.calls(), 3);
    }

    #[tokio::test]
    async fn broken_transport_reports_errors_until_repaired() {
        let probe = SimulatedProbe::default();
        probe.fail_transport("leaf1", "no route to namespace");
        assert!(probe.probe(&ctx("leaf1")).await.is_err());
        probe.repair_transport("leaf1");
        assert!(probe.probe(&ctx("leaf1")).await.unwrap());
    }
}
