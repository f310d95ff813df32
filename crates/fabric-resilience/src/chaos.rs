//! ---
//! fabric_section: "05-resilience-fault-tolerance"
//! fabric_subsection: "module"
//! fabric_type: "source"
//! fabric_scope: "code"
//! fabric_description: "Scripted fault scenarios replayed against the fabric."
//! fabric_version: "v0.0.0-prealpha"
//! fabric_owner: "tbd"
//! ---
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::metrics::ResilienceMetrics;

const LOG_TARGET: &str = "fabric::resilience::chaos";

/// Anything able to run an administrative command line such as `fail spine1`.
///
/// Implemented in-process by the fault injection facade and remotely by the CLI's HTTP client.
#[async_trait]
pub trait FaultTarget: Send + Sync {
    /// Execute one command and return its JSON result.
    async fn execute(&self, command: &str) -> Result<serde_json::Value>;
}

/// Declarative chaos scenario loaded from TOML configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ChaosScenario {
    /// Optional seed to guarantee deterministic replay of jitter.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Global jitter applied to the delay of each action (milliseconds).
    #[serde(default)]
    pub jitter_ms: Option<u64>,
    /// Abort the scenario on the first failed action.
    #[serde(default)]
    pub stop_on_error: bool,
    /// Ordered chaos actions executed by the engine.
    #[serde(default)]
    pub actions: Vec<ChaosAction>,
}

impl ChaosScenario {
    /// Load a scenario from disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).with_context(|| {
            format!("unable to read chaos scenario {}", path.as_ref().display())
        })?;
        contents.parse::<Self>()
    }

    fn jitter_duration(&self, rng: &mut StdRng) -> Duration {
        match self.jitter_ms {
            Some(jitter_ms) if jitter_ms > 0 => Duration::from_millis(rng.gen_range(0..=jitter_ms)),
            _ => Duration::ZERO,
        }
    }
}

impl std::str::FromStr for ChaosScenario {
    type Err = anyhow::Error;

    fn from_str(input: &str) -> std::result::Result<Self, Self::Err> {
        let scenario = toml::from_str::<Self>(input).map_err(anyhow::Error::new)?;
        for action in &scenario.actions {
            if action.targets().is_empty() && action.requires_targets() {
                anyhow::bail!("chaos action '{}' names no targets", action.label());
            }
        }
        Ok(scenario)
    }
}

/// Supported chaos actions.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChaosAction {
    /// Latch a failure on elements.
    FailElement {
        /// Element identifiers.
        elements: Vec<String>,
        /// Milliseconds to wait before executing the action.
        #[serde(default)]
        delay_ms: u64,
    },
    /// Clear injected failures and recover router elements.
    RecoverElement {
        /// Element identifiers.
        elements: Vec<String>,
        /// Milliseconds to wait before executing the action.
        #[serde(default)]
        delay_ms: u64,
    },
    /// Stop a router's routing daemon without touching its liveness.
    KillDaemon {
        /// Router identifier.
        router: String,
        /// Milliseconds to wait before executing the action.
        #[serde(default)]
        delay_ms: u64,
    },
    /// Disconnect switches from their controller.
    DetachController {
        /// Switch identifiers.
        switches: Vec<String>,
        /// Milliseconds to wait before executing the action.
        #[serde(default)]
        delay_ms: u64,
    },
    /// Reconnect switches to their controller.
    AttachController {
        /// Switch identifiers.
        switches: Vec<String>,
        /// Milliseconds to wait before executing the action.
        #[serde(default)]
        delay_ms: u64,
    },
    /// Record the fabric status at this point of the scenario.
    Status {
        /// Milliseconds to wait before executing the action.
        #[serde(default)]
        delay_ms: u64,
    },
}

impl ChaosAction {
    /// Static label for metrics and records.
    pub fn label(&self) -> &'static str {
        match self {
            ChaosAction::FailElement { .. } => "fail_element",
            ChaosAction::RecoverElement { .. } => "recover_element",
            ChaosAction::KillDaemon { .. } => "kill_daemon",
            ChaosAction::DetachController { .. } => "detach_controller",
            ChaosAction::AttachController { .. } => "attach_controller",
            ChaosAction::Status { .. } => "status",
        }
    }

    /// Configured delay before the action runs, jitter excluded.
    pub fn delay(&self) -> Duration {
        match self {
            ChaosAction::FailElement { delay_ms, .. }
            | ChaosAction::RecoverElement { delay_ms, .. }
            | ChaosAction::KillDaemon { delay_ms, .. }
            | ChaosAction::DetachController { delay_ms, .. }
            | ChaosAction::AttachController { delay_ms, .. }
            | ChaosAction::Status { delay_ms } => Duration::from_millis(*delay_ms),
        }
    }

    /// Identifiers the action applies to.
    pub fn targets(&self) -> Vec<String> {
        match self {
            ChaosAction::FailElement { elements, .. }
            | ChaosAction::RecoverElement { elements, .. } => elements.clone(),
            ChaosAction::DetachController { switches, .. }
            | ChaosAction::AttachController { switches, .. } => switches.clone(),
            ChaosAction::KillDaemon { router, .. } => vec![router.clone()],
            ChaosAction::Status { .. } => Vec::new(),
        }
    }

    fn requires_targets(&self) -> bool {
        !matches!(self, ChaosAction::Status { .. })
    }

    /// Administrative command line equivalent to the action.
    pub fn command_line(&self) -> String {
        let verb = match self {
            ChaosAction::FailElement { .. } => "fail",
            ChaosAction::RecoverElement { .. } => "recover",
            ChaosAction::KillDaemon { .. } => "kill-daemon",
            ChaosAction::DetachController { .. } => "detach",
            ChaosAction::AttachController { .. } => "attach",
            ChaosAction::Status { .. } => "status",
        };
        let mut line = verb.to_owned();
        for target in self.targets() {
            line.push(' ');
            line.push_str(&target);
        }
        line
    }
}

/// Result of one executed action.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum ChaosOutcome {
    /// The target accepted the command.
    Applied(serde_json::Value),
    /// The target rejected the command or could not be reached.
    Failed(String),
}

impl ChaosOutcome {
    /// Whether the action was applied.
    pub fn is_applied(&self) -> bool {
        matches!(self, ChaosOutcome::Applied(_))
    }
}

/// Execution record returned after running a chaos scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ChaosEventRecord {
    /// Action label executed.
    pub action: String,
    /// Identifiers the action applied to.
    pub targets: Vec<String>,
    /// Command line sent to the target.
    pub command: String,
    /// Delay applied before the action ran, jitter included.
    pub delay_applied_ms: u64,
    /// Timestamp when the action was triggered.
    pub executed_at: DateTime<Utc>,
    /// What the target reported.
    pub outcome: ChaosOutcome,
}

/// Chaos engine responsible for executing scenarios.
#[derive(Debug)]
pub struct ChaosEngine {
    scenario: ChaosScenario,
    metrics: Option<ResilienceMetrics>,
    rng: StdRng,
}

impl ChaosEngine {
    /// Build a new chaos engine from a scenario.
    pub fn new(scenario: ChaosScenario, metrics: Option<ResilienceMetrics>) -> Self {
        let seed = scenario.seed.unwrap_or(0xC0FFEE_u64);
        let rng = StdRng::seed_from_u64(seed);
        Self {
            scenario,
            metrics,
            rng,
        }
    }

    /// Execute all chaos actions sequentially against `target`, returning execution records.
    ///
    /// A failed action is recorded and the scenario continues unless `stop_on_error` is set.
    pub async fn execute(&mut self, target: &dyn FaultTarget) -> Vec<ChaosEventRecord> {
        let mut records = Vec::with_capacity(self.scenario.actions.len());
        for action in &self.scenario.actions {
            let delay = action.delay() + self.scenario.jitter_duration(&mut self.rng);
            if !delay.is_zero() {
                sleep(delay).await;
            }

            let command = action.command_line();
            let executed_at = Utc::now();
            let outcome = match target.execute(&command).await {
                Ok(detail) => ChaosOutcome::Applied(detail),
                Err(err) => ChaosOutcome::Failed(format!("{err:#}")),
            };
            let outcome_label = if outcome.is_applied() { "applied" } else { "failed" };
            if let Some(metrics) = &self.metrics {
                metrics.inc_chaos_action(action.label(), outcome_label);
            }
            warn!(
                target: LOG_TARGET,
                action = action.label(),
                command = %command,
                delay_ms = delay.as_millis() as u64,
                outcome = outcome_label,
                "chaos action executed",
            );

            let failed = !outcome.is_applied();
            records.push(ChaosEventRecord {
                action: action.label().to_owned(),
                targets: action.targets(),
                command,
                delay_applied_ms: delay.as_millis() as u64,
                executed_at,
                outcome,
            });
            if failed && self.scenario.stop_on_error {
                warn!(target: LOG_TARGET, executed = records.len(), "chaos scenario aborted on failed action");
                break;
            }
        }
        info!(target: LOG_TARGET, total_actions = records.len(), "completed chaos scenario");
        records
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        commands: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl FaultTarget for Recorder {
        async fn execute(&self, command: &str) -> Result<serde_json::Value> {
            self.commands.lock().push(command.to_owned());
            if command.starts_with("kill-daemon") {
                anyhow::bail!("unknown router");
            }
            Ok(serde_json::json!({ "ok": command }))
        }
    }

    const SCENARIO: &str = r#"
        seed = 7
        jitter_ms = 0

        [[actions]]
        type = "fail_element"
        elements = ["spine1", "bgp2"]

        [[actions]]
        type = "kill_daemon"
        router = "bgp1"
        delay_ms = 1

        [[actions]]
        type = "detach_controller"
        switches = ["leaf1"]

        [[actions]]
        type = "status"
    "#;

    #[tokio::test]
    async fn engine_runs_actions_in_order() {
        let scenario = SCENARIO.parse::<ChaosScenario>().unwrap();
        let mut engine = ChaosEngine::new(scenario, None);
        let target = Recorder::default();
        let records = engine.execute(&target).await;

        assert_eq!(
            *target.commands.lock(),
            vec!["fail spine1 bgp2", "kill-daemon bgp1", "detach leaf1", "status"]
        );
        assert_eq!(records.len(), 4);
        assert_eq!(records[1].action, "kill_daemon");
        assert_eq!(records[1].delay_applied_ms, 1);
        assert!(matches!(records[1].outcome, ChaosOutcome::Failed(_)));
        assert!(records[3].outcome.is_applied());
    }

    #[tokio::test]
    async fn stop_on_error_halts_the_scenario() {
        let scenario = format!("stop_on_error = true\n{SCENARIO}")
            .parse::<ChaosScenario>()
            .unwrap();
        let target = Recorder::default();
        let records = ChaosEngine::new(scenario, None).execute(&target).await;
        assert_eq!(records.len(), 2);
        assert_eq!(target.commands.lock().len(), 2);
    }

    #[test]
    fn scenario_loads_from_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), SCENARIO).unwrap();
        let scenario = ChaosScenario::from_file(file.path()).unwrap();
        assert_eq!(scenario.seed, Some(7));
        assert_eq!(scenario.actions.len(), 4);
        assert!(ChaosScenario::from_file(file.path().with_extension("missing")).is_err());
    }

    #[test]
    fn actions_without_targets_are_rejected() {
        let err = r#"
            [[actions]]
            type = "fail_element"
            elements = []
        "#
        .parse::<ChaosScenario>()
        .unwrap_err();
        assert!(err.to_string().contains("fail_element"));

        assert!(r#"
            [[actions]]
            type = "reboot_everything"
        "#
        .parse::<ChaosScenario>()
        .is_err());
    }
}
