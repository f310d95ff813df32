//! ---
//! fabric_section: "01-core-functionality"
//! fabric_subsection: "module"
//! fabric_type: "source"
//! fabric_scope: "code"
//! fabric_description: "Task wiring and lifecycle of a running fabric."
//! fabric_version: "v0.0.0-prealpha"
//! fabric_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use fabric_common::config::{AppConfig, ElementRole};
use fabric_health::{
    EventStream, HealthMetrics, HealthMonitor, HealthStatus, ProbeTransport, StateChangeEvent,
};
use fabric_logging::{fabric_info, fabric_warn, LogContext};
use fabric_metrics::{FabricMetrics, SharedRegistry};
use fabric_resilience::{
    DegradationPolicy, DomainTracker, ProtectionDomain, Regime, ResilienceMetrics,
};
use fabric_routing::{
    ForwardingPlane, ForwardingUpdate, RouteSnapshotStore, RoutingDaemon, RoutingMetrics,
};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::board::DecisionBoard;
use crate::error::RecoveryError;
use crate::facade::FaultInjectionFacade;
use crate::recovery::RecoveryOrchestrator;

const LOG_TARGET: &str = "fabric::core::runtime";

/// External systems the fabric observes and drives.
#[derive(Clone)]
pub struct Collaborators {
    pub probe: Arc<dyn ProbeTransport>,
    pub daemon: Arc<dyn RoutingDaemon>,
    pub forwarding: Arc<dyn ForwardingPlane>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

/// Builds every component from configuration and spawns the fabric's tasks.
#[derive(Debug)]
pub struct FabricRuntime {
    config: Arc<AppConfig>,
    collaborators: Collaborators,
    registry: Option<SharedRegistry>,
}

impl FabricRuntime {
    pub fn new(config: AppConfig, collaborators: Collaborators) -> Self {
        Self {
            config: Arc::new(config),
            collaborators,
            registry: None,
        }
    }

    pub fn with_registry(mut self, registry: SharedRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Start probes, domain evaluators, router workers and snapshot capture.
    pub async fn start(self) -> Result<RuntimeHandle> {
        let config = self.config;
        config.validate().context("invalid fabric configuration")?;

        let (health_metrics, routing_metrics, resilience_metrics, fabric_metrics) =
            match &self.registry {
                Some(registry) => (
                    Some(HealthMetrics::new(registry.clone())?),
                    Some(RoutingMetrics::new(registry.clone())?),
                    Some(ResilienceMetrics::new(registry.clone())?),
                    Some(FabricMetrics::new(registry.clone())?),
                ),
                None => (None, None, None, None),
            };

        let (monitor, events) = HealthMonitor::from_config(&config, self.collaborators.probe)
            .context("failed to build health monitor")?;
        let monitor = Arc::new(match health_metrics {
            Some(metrics) => monitor.with_metrics(metrics),
            None => monitor,
        });

        let store =
            RouteSnapshotStore::new(config.routers.keys().cloned(), self.collaborators.daemon);
        let store = Arc::new(match routing_metrics {
            Some(metrics) => store.with_metrics(metrics),
            None => store,
        });

        let orchestrator = RecoveryOrchestrator::from_config(&config, Arc::clone(&store));
        let orchestrator = Arc::new(match &resilience_metrics {
            Some(metrics) => orchestrator.with_metrics(metrics.clone()),
            None => orchestrator,
        });

        let board = Arc::new(DecisionBoard::new(config.domains.keys().cloned()));
        let (shutdown_tx, _) = broadcast::channel(16);
        let mut tasks = Vec::new();

        if let Some(metrics) = &fabric_metrics {
            metrics.set_element_count(config.elements.len());
        }

        let mut domain_routes: HashMap<String, Vec<mpsc::UnboundedSender<StateChangeEvent>>> =
            HashMap::new();
        for (name, domain_config) in &config.domains {
            let domain = ProtectionDomain::from_config(name, domain_config);
            let (tx, rx) = mpsc::unbounded_channel();
            for member in &domain.members {
                domain_routes.entry(member.clone()).or_default().push(tx.clone());
            }
            let mut tracker = DomainTracker::new(domain, DegradationPolicy::new());
            if let Some(metrics) = &resilience_metrics {
                tracker = tracker.with_metrics(metrics.clone());
            }
            let span = info_span!("domain", domain = %name);
            tasks.push(tokio::spawn(
                run_domain_evaluator(
                    tracker,
                    Arc::clone(&monitor),
                    Arc::clone(&board),
                    Arc::clone(&self.collaborators.forwarding),
                    fabric_metrics.clone(),
                    rx,
                    shutdown_tx.subscribe(),
                )
                .instrument(span),
            ));
        }

        let mut router_routes = HashMap::new();
        for router in orchestrator.routers() {
            let (tx, rx) = mpsc::unbounded_channel();
            router_routes.insert(router.to_owned(), tx);
            let span = info_span!("router", router = %router);
            tasks.push(tokio::spawn(
                run_router_worker(
                    router.to_owned(),
                    Arc::clone(&orchestrator),
                    rx,
                    shutdown_tx.subscribe(),
                )
                .instrument(span),
            ));
        }

        tasks.push(tokio::spawn(run_dispatcher(
            events,
            domain_routes,
            router_routes,
            fabric_metrics,
            shutdown_tx.subscribe(),
        )));
        tasks.extend(monitor.spawn_probes(&shutdown_tx, config.monitor.start_jitter));
        if let Some(interval) = config.snapshot.interval {
            tasks.extend(store.spawn_periodic_capture(interval, &shutdown_tx));
        }

        let facade = FaultInjectionFacade::new(
            Arc::clone(&monitor),
            Arc::clone(&orchestrator),
            Arc::clone(&board),
            self.collaborators.forwarding,
        );

        info!(
            target: LOG_TARGET,
            mode = config.mode.as_str(),
            elements = config.elements.len(),
            domains = config.domains.len(),
            routers = config.routers.len(),
            "fabric runtime started"
        );

        Ok(RuntimeHandle {
            shutdown: shutdown_tx,
            tasks,
            facade,
            monitor,
            store,
            orchestrator,
            board,
            config,
        })
    }
}

/// A running fabric. Dropping it without [`RuntimeHandle::shutdown`] leaves tasks running.
#[derive(Debug)]
pub struct RuntimeHandle {
    shutdown: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
    facade: FaultInjectionFacade,
    monitor: Arc<HealthMonitor>,
    store: Arc<RouteSnapshotStore>,
    orchestrator: Arc<RecoveryOrchestrator>,
    board: Arc<DecisionBoard>,
    config: Arc<AppConfig>,
}

impl RuntimeHandle {
    pub fn facade(&self) -> &FaultInjectionFacade {
        &self.facade
    }

    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.monitor
    }

    pub fn store(&self) -> &Arc<RouteSnapshotStore> {
        &self.store
    }

    pub fn orchestrator(&self) -> &Arc<RecoveryOrchestrator> {
        &self.orchestrator
    }

    pub fn board(&self) -> &Arc<DecisionBoard> {
        &self.board
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Stop every task and wait for them. In-flight recoveries are cancelled after their
    /// fallback routes are in place.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown.send(());
        self.orchestrator.cancel_all();
        for task in self.tasks {
            if let Err(err) = task.await {
                warn!(target: LOG_TARGET, error = %err, "runtime task ended abnormally");
            }
        }
        info!(target: LOG_TARGET, "fabric runtime shutdown complete");
        Ok(())
    }
}

async fn run_dispatcher(
    mut events: EventStream,
    domains: HashMap<String, Vec<mpsc::UnboundedSender<StateChangeEvent>>>,
    routers: HashMap<String, mpsc::UnboundedSender<HealthStatus>>,
    metrics: Option<FabricMetrics>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = shutdown.recv() => break,
            event = events.next() => match event {
                Some(event) => event,
                None => break,
            },
        };
        if let Some(metrics) = &metrics {
            metrics.set_element_healthy(
                &event.element_id,
                event.role.as_str(),
                event.to.is_healthy(),
            );
        }
        if event.role == ElementRole::Router {
            if let Some(tx) = routers.get(&event.element_id) {
                let _ = tx.send(event.to);
            }
        }
        for tx in domains.get(&event.element_id).into_iter().flatten() {
            let _ = tx.send(event.clone());
        }
    }
    debug!(target: LOG_TARGET, "event dispatcher stopped");
}

async fn run_domain_evaluator(
    mut tracker: DomainTracker,
    monitor: Arc<HealthMonitor>,
    board: Arc<DecisionBoard>,
    forwarding: Arc<dyn ForwardingPlane>,
    metrics: Option<FabricMetrics>,
    mut events: mpsc::UnboundedReceiver<StateChangeEvent>,
    mut shutdown: broadcast::Receiver<()>,
) {
    // The baseline decision is published but forwarding is left as provisioned.
    let initial = tracker.evaluate(monitor.as_ref());
    publish(&board, metrics.as_ref(), initial.decision);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.recv() => break,
            event = events.recv() => {
                let Some(event) = event else { break };
                debug!(target: LOG_TARGET, domain = %tracker.domain().name, element = %event.element_id, to = %event.to, "re-evaluating domain");
                let tracked = tracker.evaluate(monitor.as_ref());
                let decision = tracked.decision.clone();
                publish(&board, metrics.as_ref(), tracked.decision);
                if decision.regime == Regime::FailClosed
                    && (tracked.membership_changed || tracked.regime_changed)
                {
                    let update = ForwardingUpdate {
                        domain: decision.domain.clone(),
                        healthy: decision.healthy.clone(),
                        failed: decision.failed.clone(),
                    };
                    if let Err(err) = forwarding.set_forwarding(&update).await {
                        fabric_warn!(
                            context = LogContext::new().with_domain(&update.domain),
                            "forwarding update failed: {err:#}"
                        );
                    }
                }
            }
        }
    }
    debug!(target: LOG_TARGET, domain = %tracker.domain().name, "domain evaluator stopped");
}

fn publish(
    board: &DecisionBoard,
    metrics: Option<&FabricMetrics>,
    decision: fabric_resilience::FailoverDecision,
) {
    if let Some(metrics) = metrics {
        metrics.set_domain_fail_static(&decision.domain, decision.is_fail_static());
    }
    board.publish(decision);
}

async fn run_router_worker(
    router: String,
    orchestrator: Arc<RecoveryOrchestrator>,
    mut statuses: mpsc::UnboundedReceiver<HealthStatus>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        // Shutdown wins over queued statuses so no recovery starts after `cancel_all`.
        let status = tokio::select! {
            biased;
            _ = shutdown.recv() => break,
            status = statuses.recv() => match status {
                Some(status) => status,
                None => break,
            },
        };
        match status {
            HealthStatus::Down => match orchestrator.handle_router_down(&router).await {
                Ok(report) => {
                    debug!(target: LOG_TARGET, router = %router, outcome = %report.outcome, "router down handled")
                }
                Err(RecoveryError::InProgress(_)) => fabric_info!(
                    context = LogContext::new().with_router(&router),
                    "router down while a recovery is running; leaving it to finish"
                ),
                Err(err) => fabric_warn!(
                    context = LogContext::new().with_router(&router),
                    "router down not handled: {err}"
                ),
            },
            HealthStatus::Healthy => {
                if let Err(err) = orchestrator.handle_router_up(&router) {
                    fabric_warn!(
                        context = LogContext::new().with_router(&router),
                        "router up not handled: {err}"
                    );
                }
            }
            HealthStatus::Suspect => {}
        }
    }
    debug!(target: LOG_TARGET, router = %router, "router worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabric_testharness::SimulatedRoutingDaemon;

    #[tokio::test]
    async fn queued_router_down_is_dropped_once_shutdown_is_sent() {
        let config: AppConfig = include_str!("../../../configs/fabric.sim.toml")
            .parse()
            .unwrap();
        let daemon = Arc::new(SimulatedRoutingDaemon::from_config(&config));
        let store = Arc::new(RouteSnapshotStore::new(
            config.routers.keys().cloned(),
            daemon.clone(),
        ));
        let orchestrator = Arc::new(RecoveryOrchestrator::from_config(&config, store));

        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        tx.send(HealthStatus::Down).unwrap();
        shutdown_tx.send(()).unwrap();

        run_router_worker("bgp1".to_owned(), Arc::clone(&orchestrator), rx, shutdown_rx).await;
        assert!(daemon.calls_for("bgp1").is_empty());
        assert!(orchestrator.last_report("bgp1").is_none());
    }
}
