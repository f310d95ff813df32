//! ---
//! fabric_section: "01-core-functionality"
//! fabric_subsection: "module"
//! fabric_type: "source"
//! fabric_scope: "code"
//! fabric_description: "Operator boundary for fault injection, recovery, and status."
//! fabric_version: "v0.0.0-prealpha"
//! fabric_owner: "tbd"
//! ---
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fabric_common::config::ElementRole;
use fabric_health::{HealthMonitor, HealthState};
use fabric_logging::{log_system_event, LogContext, SystemEventOutcome};
use fabric_resilience::{FailoverDecision, FaultTarget};
use fabric_routing::{ForwardingPlane, RoutingDaemon};
use futures::future::join_all;
use serde::Serialize;
use serde_json::{json, Value};

use crate::board::DecisionBoard;
use crate::command::AdminCommand;
use crate::error::FacadeError;
use crate::recovery::{RecoveryOrchestrator, RecoveryOutcome, RecoveryReport, RouterStatus};

#[derive(Debug, Clone, Serialize)]
pub struct ElementStatus {
    pub element_id: String,
    pub role: ElementRole,
    pub injected: bool,
    #[serde(flatten)]
    pub state: HealthState,
}

/// Everything an operator sees from `status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub generated_at: DateTime<Utc>,
    pub elements: Vec<ElementStatus>,
    pub domains: Vec<FailoverDecision>,
    pub routers: Vec<RouterStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecoveryAttempt {
    pub router: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<RecoveryReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecoverySummary {
    /// Elements whose injected fault was released.
    pub cleared: Vec<String>,
    pub recoveries: Vec<RecoveryAttempt>,
}

/// The single operator entry point into a running fabric.
///
/// Holds no decision logic of its own: failures go to the monitor, recoveries to the
/// orchestrator, and status is read from the published state of both.
#[derive(Clone)]
pub struct FaultInjectionFacade {
    monitor: Arc<HealthMonitor>,
    orchestrator: Arc<RecoveryOrchestrator>,
    board: Arc<DecisionBoard>,
    forwarding: Arc<dyn ForwardingPlane>,
    daemon: Arc<dyn RoutingDaemon>,
}

impl std::fmt::Debug for FaultInjectionFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaultInjectionFacade")
            .field("monitor", &self.monitor)
            .field("orchestrator", &self.orchestrator)
            .finish_non_exhaustive()
    }
}

impl FaultInjectionFacade {
    pub fn new(
        monitor: Arc<HealthMonitor>,
        orchestrator: Arc<RecoveryOrchestrator>,
        board: Arc<DecisionBoard>,
        forwarding: Arc<dyn ForwardingPlane>,
    ) -> Self {
        let daemon = orchestrator.store().daemon();
        Self {
            monitor,
            orchestrator,
            board,
            forwarding,
            daemon,
        }
    }

    /// Element IDs are checked up front; nothing is injected if any is unknown.
    pub fn inject_failure(&self, elements: &[String]) -> Result<Vec<ElementStatus>, FacadeError> {
        for element in elements {
            self.monitor.current_state(element)?;
        }
        let mut statuses = Vec::with_capacity(elements.len());
        for element in elements {
            self.monitor.inject_failure(element)?;
            log_system_event(
                Some(&LogContext::new().with_element(element)),
                "fault-injected",
                "element failure latched",
                SystemEventOutcome::Degraded,
            );
            statuses.push(self.element_status(element)?);
        }
        Ok(statuses)
    }

    /// Release injected faults and run a recovery for each router element, concurrently.
    ///
    /// A router whose recovery is refused (for instance already in progress) is reported in
    /// the summary rather than failing the whole call.
    pub async fn trigger_recovery(
        &self,
        elements: &[String],
    ) -> Result<RecoverySummary, FacadeError> {
        for element in elements {
            self.monitor.current_state(element)?;
        }
        let mut cleared = Vec::new();
        for element in elements {
            if self.monitor.clear_injection(element)? {
                cleared.push(element.clone());
            }
        }

        let routers: Vec<&String> = elements
            .iter()
            .filter(|element| self.orchestrator.manages(element))
            .collect();
        let recoveries = join_all(routers.into_iter().map(|router| async move {
            match self.orchestrator.recover(router).await {
                Ok(report) => {
                    let outcome = match report.outcome {
                        RecoveryOutcome::Recovered => SystemEventOutcome::Success,
                        RecoveryOutcome::DegradedSafe => SystemEventOutcome::Degraded,
                        RecoveryOutcome::Unprotected => SystemEventOutcome::Fault,
                    };
                    log_system_event(
                        Some(&LogContext::new().with_router(router)),
                        "recovery",
                        report.outcome.as_str(),
                        outcome,
                    );
                    RecoveryAttempt {
                        router: router.clone(),
                        report: Some(report),
                        error: None,
                    }
                }
                Err(err) => RecoveryAttempt {
                    router: router.clone(),
                    report: None,
                    error: Some(err.to_string()),
                },
            }
        }))
        .await;

        Ok(RecoverySummary {
            cleared,
            recoveries,
        })
    }

    /// Stop a router's routing daemon without touching its element health.
    pub async fn kill_daemon(&self, router: &str) -> Result<(), FacadeError> {
        let context = self
            .monitor
            .context(router)
            .ok_or_else(|| fabric_health::HealthError::UnknownElement(router.to_owned()))?;
        if context.role != ElementRole::Router || !self.orchestrator.manages(router) {
            return Err(FacadeError::NotARouter(router.to_owned()));
        }
        let ctx = LogContext::new().with_router(router);
        match self.daemon.stop_daemon(router).await {
            Ok(()) => {
                log_system_event(
                    Some(&ctx),
                    "daemon-killed",
                    "routing daemon stopped",
                    SystemEventOutcome::Degraded,
                );
                Ok(())
            }
            Err(err) => {
                let message = format!("{err:#}");
                log_system_event(Some(&ctx), "daemon-killed", &message, SystemEventOutcome::Fault);
                Err(FacadeError::Collaborator {
                    action: "kill-daemon",
                    target: router.to_owned(),
                    message,
                })
            }
        }
    }

    pub async fn detach(&self, switches: &[String]) -> Result<(), FacadeError> {
        self.check_switches(switches)?;
        for switch in switches {
            self.forwarding
                .detach_controller(switch)
                .await
                .map_err(|err| collaborator("detach", switch, err))?;
            log_system_event(
                Some(&LogContext::new().with_element(switch)),
                "controller-detached",
                "switch disconnected from controller",
                SystemEventOutcome::Degraded,
            );
        }
        Ok(())
    }

    pub async fn attach(&self, switches: &[String]) -> Result<(), FacadeError> {
        self.check_switches(switches)?;
        for switch in switches {
            self.forwarding
                .attach_controller(switch)
                .await
                .map_err(|err| collaborator("attach", switch, err))?;
            log_system_event(
                Some(&LogContext::new().with_element(switch)),
                "controller-attached",
                "switch reconnected to controller",
                SystemEventOutcome::Success,
            );
        }
        Ok(())
    }

    pub fn status(&self) -> StatusReport {
        let elements = self
            .monitor
            .elements()
            .filter_map(|context| self.element_status(&context.element_id).ok())
            .collect();
        StatusReport {
            generated_at: Utc::now(),
            elements,
            domains: self.board.decisions(),
            routers: self.orchestrator.statuses(),
        }
    }

    pub async fn execute(&self, command: AdminCommand) -> Result<Value, FacadeError> {
        tracing::debug!(target: "fabric::core::facade", command = %command, "executing admin command");
        let value = match command {
            AdminCommand::Fail { elements } => {
                serde_json::to_value(self.inject_failure(&elements)?)?
            }
            AdminCommand::Recover { elements } => {
                serde_json::to_value(self.trigger_recovery(&elements).await?)?
            }
            AdminCommand::Status => serde_json::to_value(self.status())?,
            AdminCommand::KillDaemon { router } => {
                self.kill_daemon(&router).await?;
                json!({ "router": router, "daemon": "stopped" })
            }
            AdminCommand::Detach { switches } => {
                self.detach(&switches).await?;
                json!({ "switches": switches, "controller": "detached" })
            }
            AdminCommand::Attach { switches } => {
                self.attach(&switches).await?;
                json!({ "switches": switches, "controller": "attached" })
            }
            AdminCommand::FailBoth { router, switches } => {
                // Both targets are checked before either plane is touched.
                self.check_switches(&switches)?;
                self.kill_daemon(&router).await?;
                self.detach(&switches).await?;
                json!({
                    "router": router,
                    "daemon": "stopped",
                    "switches": switches,
                    "controller": "detached",
                })
            }
        };
        Ok(value)
    }

    /// Parse and run one command line such as `fail spine1 spine2`.
    pub async fn execute_line(&self, line: &str) -> Result<Value, FacadeError> {
        let command: AdminCommand = line.parse()?;
        self.execute(command).await
    }

    fn element_status(&self, element: &str) -> Result<ElementStatus, FacadeError> {
        let role = self
            .monitor
            .context(element)
            .map(|context| context.role)
            .ok_or_else(|| fabric_health::HealthError::UnknownElement(element.to_owned()))?;
        Ok(ElementStatus {
            element_id: element.to_owned(),
            role,
            injected: self.monitor.is_injected(element)?,
            state: (*self.monitor.current_state(element)?).clone(),
        })
    }

    fn check_switches(&self, switches: &[String]) -> Result<(), FacadeError> {
        for switch in switches {
            let context = self
                .monitor
                .context(switch)
                .ok_or_else(|| fabric_health::HealthError::UnknownElement(switch.clone()))?;
            if !context.role.is_switch() {
                return Err(FacadeError::NotASwitch(switch.clone()));
            }
        }
        Ok(())
    }
}

fn collaborator(action: &'static str, target: &str, err: anyhow::Error) -> FacadeError {
    let message = format!("{err:#}");
    log_system_event(
        Some(&LogContext::new().with_element(target)),
        action,
        &message,
        SystemEventOutcome::Fault,
    );
    FacadeError::Collaborator {
        action,
        target: target.to_owned(),
        message,
    }
}

#[async_trait]
impl FaultTarget for FaultInjectionFacade {
    async fn execute(&self, command: &str) -> anyhow::Result<Value> {
        Ok(self.execute_line(command).await?)
    }
}
