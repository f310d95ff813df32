//! ---
//! fabric_section: "02-health-monitoring"
//! fabric_subsection: "module"
//! fabric_type: "source"
//! fabric_scope: "code"
//! fabric_description: "Health monitor owning per-element probe tasks."
//! fabric_version: "v0.0.0-prealpha"
//! fabric_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use fabric_common::config::{AppConfig, ElementRole};
use indexmap::IndexMap;
use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::element::{
    ElementContext, ElementMachine, HealthState, HealthStatus, HysteresisThresholds, ProbeOutcome,
};
use crate::error::{HealthError, Result};
use crate::metrics::HealthMetrics;
use crate::probe::ProbeTransport;

const LOG_TARGET: &str = "fabric::health";

/// Emitted exactly once per debounced status change of an element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateChangeEvent {
    pub element_id: String,
    pub role: ElementRole,
    pub from: HealthStatus,
    pub to: HealthStatus,
    pub at: DateTime<Utc>,
    /// Per-element transition counter; strictly increasing for one element.
    pub sequence: u64,
}

/// Receiving half of the monitor's ordered event stream.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<StateChangeEvent>,
}

impl EventStream {
    /// Wait for the next transition. `None` once the monitor has been dropped.
    pub async fn next(&mut self) -> Option<StateChangeEvent> {
        self.rx.recv().await
    }

    /// Non-blocking variant used by tests and drains.
    pub fn try_next(&mut self) -> Option<StateChangeEvent> {
        self.rx.try_recv().ok()
    }
}

/// Read access to element health, implemented by the monitor and by test fixtures.
pub trait HealthView {
    fn state_of(&self, element_id: &str) -> Option<HealthState>;
}

#[derive(Debug)]
struct ElementSlot {
    context: ElementContext,
    machine: Mutex<ElementMachine>,
    published: ArcSwap<HealthState>,
    injected: AtomicBool,
}

/// Owns every element's hysteresis machine and is the sole writer of [`HealthState`].
///
/// Reads through [`HealthMonitor::current_state`] are lock-free snapshots and never wait on an
/// in-flight probe. The element set is fixed at construction.
pub struct HealthMonitor {
    slots: IndexMap<String, ElementSlot>,
    transport: Arc<dyn ProbeTransport>,
    events: mpsc::UnboundedSender<StateChangeEvent>,
    metrics: Option<HealthMetrics>,
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("elements", &self.slots.len())
            .finish_non_exhaustive()
    }
}

impl HealthMonitor {
    pub fn new(
        elements: Vec<ElementContext>,
        thresholds: HysteresisThresholds,
        transport: Arc<dyn ProbeTransport>,
    ) -> Result<(Self, EventStream)> {
        let mut slots = IndexMap::with_capacity(elements.len());
        for context in elements {
            let element_id = context.element_id.clone();
            let machine = ElementMachine::new(thresholds);
            let slot = ElementSlot {
                published: ArcSwap::from_pointee(machine.state().clone()),
                machine: Mutex::new(machine),
                injected: AtomicBool::new(false),
                context,
            };
            if slots.insert(element_id.clone(), slot).is_some() {
                return Err(HealthError::DuplicateElement(element_id));
            }
        }
        let (tx, rx) = mpsc::unbounded_channel();
        Ok((
            Self {
                slots,
                transport,
                events: tx,
                metrics: None,
            },
            EventStream { rx },
        ))
    }

    /// Build a monitor for every element declared in the configuration.
    pub fn from_config(
        config: &AppConfig,
        transport: Arc<dyn ProbeTransport>,
    ) -> Result<(Self, EventStream)> {
        let thresholds = HysteresisThresholds::from_config(&config.monitor)?;
        let contexts = config
            .elements
            .iter()
            .map(|(id, element)| ElementContext::from_config(config, id, element))
            .collect();
        Self::new(contexts, thresholds, transport)
    }

    pub fn with_metrics(mut self, metrics: HealthMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn elements(&self) -> impl Iterator<Item = &ElementContext> {
        self.slots.values().map(|slot| &slot.context)
    }

    pub fn context(&self, element_id: &str) -> Option<&ElementContext> {
        self.slots.get(element_id).map(|slot| &slot.context)
    }

    fn slot(&self, element_id: &str) -> Result<&ElementSlot> {
        self.slots
            .get(element_id)
            .ok_or_else(|| HealthError::UnknownElement(element_id.to_owned()))
    }

    /// Point-in-time health of an element.
    pub fn current_state(&self, element_id: &str) -> Result<Arc<HealthState>> {
        Ok(self.slot(element_id)?.published.load_full())
    }

    /// Run one probe, bounded by the element's timeout, and fold the result into its machine.
    pub async fn observe(&self, element_id: &str) -> Result<ProbeOutcome> {
        let slot = self.slot(element_id)?;
        if slot.injected.load(Ordering::Acquire) {
            self.apply(slot, ProbeOutcome::Injected, None);
            return Ok(ProbeOutcome::Injected);
        }

        let started = Instant::now();
        let outcome = match time::timeout(
            slot.context.probe_timeout,
            self.transport.probe(&slot.context),
        )
        .await
        {
            Ok(Ok(true)) => ProbeOutcome::Success,
            Ok(Ok(false)) => ProbeOutcome::Unreachable,
            Ok(Err(err)) => {
                debug!(target: LOG_TARGET, element = %element_id, error = %err, "probe transport error");
                ProbeOutcome::TransportError
            }
            Err(_) => ProbeOutcome::TimedOut,
        };
        self.apply(slot, outcome, Some(started.elapsed()));
        Ok(outcome)
    }

    /// Feed an outcome without consulting the transport.
    pub fn record_outcome(
        &self,
        element_id: &str,
        outcome: ProbeOutcome,
    ) -> Result<Option<StateChangeEvent>> {
        let slot = self.slot(element_id)?;
        Ok(self.apply(slot, outcome, None))
    }

    /// Force a failed observation now and keep failing scheduled probes until cleared.
    pub fn inject_failure(&self, element_id: &str) -> Result<Arc<HealthState>> {
        let slot = self.slot(element_id)?;
        if !slot.injected.swap(true, Ordering::AcqRel) {
            info!(target: LOG_TARGET, element = %element_id, "fault injection latched");
        }
        self.apply(slot, ProbeOutcome::Injected, None);
        Ok(slot.published.load_full())
    }

    /// Release an injected fault. Returns whether one was latched.
    pub fn clear_injection(&self, element_id: &str) -> Result<bool> {
        let slot = self.slot(element_id)?;
        let was_injected = slot.injected.swap(false, Ordering::AcqRel);
        if was_injected {
            info!(target: LOG_TARGET, element = %element_id, "fault injection released");
        }
        Ok(was_injected)
    }

    pub fn is_injected(&self, element_id: &str) -> Result<bool> {
        Ok(self.slot(element_id)?.injected.load(Ordering::Acquire))
    }

    fn apply(
        &self,
        slot: &ElementSlot,
        outcome: ProbeOutcome,
        latency: Option<Duration>,
    ) -> Option<StateChangeEvent> {
        let element_id = slot.context.element_id.as_str();
        if let Some(metrics) = &self.metrics {
            metrics.observe_probe(element_id, outcome, latency);
        }

        // The event is enqueued while the machine is held so per-element order is preserved.
        let mut machine = slot.machine.lock();
        let transition = machine.apply(outcome, Utc::now());
        let state = machine.state().clone();
        slot.published.store(Arc::new(state.clone()));

        let (from, to) = transition?;
        let event = StateChangeEvent {
            element_id: element_id.to_owned(),
            role: slot.context.role,
            from,
            to,
            at: state.last_transition_at.unwrap_or_else(Utc::now),
            sequence: state.transitions,
        };
        if self.events.send(event.clone()).is_err() {
            debug!(target: LOG_TARGET, element = %element_id, "event stream closed; transition not delivered");
        }
        drop(machine);

        if let Some(metrics) = &self.metrics {
            metrics.record_transition(element_id, from, to);
        }
        match to {
            HealthStatus::Down => {
                warn!(target: LOG_TARGET, element = %element_id, role = %slot.context.role, from = %from, failures = state.consecutive_failures, "element marked down")
            }
            HealthStatus::Healthy => {
                info!(target: LOG_TARGET, element = %element_id, role = %slot.context.role, from = %from, successes = state.consecutive_successes, "element healthy")
            }
            HealthStatus::Suspect => {
                debug!(target: LOG_TARGET, element = %element_id, from = %from, "element suspect")
            }
        }
        Some(event)
    }

    /// Start one periodic probe task per element. Every task exits on `shutdown`.
    pub fn spawn_probes(
        self: &Arc<Self>,
        shutdown: &broadcast::Sender<()>,
        start_jitter: Duration,
    ) -> Vec<JoinHandle<()>> {
        self.slots
            .keys()
            .map(|element_id| {
                tokio::spawn(run_probe_loop(
                    Arc::clone(self),
                    element_id.clone(),
                    start_jitter,
                    shutdown.subscribe(),
                ))
            })
            .collect()
    }
}

impl HealthView for HealthMonitor {
    fn state_of(&self, element_id: &str) -> Option<HealthState> {
        self.current_state(element_id)
            .ok()
            .map(|state| state.as_ref().clone())
    }
}

async fn run_probe_loop(
    monitor: Arc<HealthMonitor>,
    element_id: String,
    start_jitter: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let Some(interval) = monitor.context(&element_id).map(|ctx| ctx.probe_interval) else {
        return;
    };

    let jitter_ms = u64::try_from(start_jitter.as_millis()).unwrap_or(u64::MAX);
    if jitter_ms > 0 {
        let delay = Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms));
        tokio::select! {
            _ = shutdown.recv() => return,
            _ = time::sleep(delay) => {}
        }
    }

    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!(target: LOG_TARGET, element = %element_id, interval_ms = interval.as_millis() as u64, "probe task started");

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                debug!(target: LOG_TARGET, element = %element_id, "probe task stopping");
                break;
            }
            _ = ticker.tick() => {
                if let Err(err) = monitor.observe(&element_id).await {
                    warn!(target: LOG_TARGET, element = %element_id, error = %err, "probe skipped");
                }
            }
        }
    }
}
