//! ---
//! fabric_section: "02-health-monitoring"
//! fabric_subsection: "module"
//! fabric_type: "source"
//! fabric_scope: "code"
//! fabric_description: "Per-element context and hysteresis state machine."
//! fabric_version: "v0.0.0-prealpha"
//! fabric_owner: "tbd"
//! ---
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use fabric_common::config::{AppConfig, ElementConfig, ElementRole, MonitorConfig};
use serde::{Deserialize, Serialize};

use crate::error::{HealthError, Result};

/// Identifier and static probing parameters for a monitored element.
#[derive(Debug, Clone)]
pub struct ElementContext {
    pub element_id: String,
    pub role: ElementRole,
    pub address: Option<IpAddr>,
    pub probe_interval: Duration,
    pub probe_timeout: Duration,
}

impl ElementContext {
    pub fn from_config(config: &AppConfig, element_id: &str, element: &ElementConfig) -> Self {
        let (probe_interval, probe_timeout) = config.probe_timing(element);
        Self {
            element_id: element_id.to_owned(),
            role: element.role,
            address: element.address,
            probe_interval,
            probe_timeout,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Suspect,
    Down,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Suspect => "suspect",
            HealthStatus::Down => "down",
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a single observation of an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Success,
    /// The transport answered but reported the element unreachable.
    Unreachable,
    TimedOut,
    TransportError,
    /// Failure forced by fault injection; the transport was not consulted.
    Injected,
}

impl ProbeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ProbeOutcome::Success)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeOutcome::Success => "success",
            ProbeOutcome::Unreachable => "unreachable",
            ProbeOutcome::TimedOut => "timeout",
            ProbeOutcome::TransportError => "transport_error",
            ProbeOutcome::Injected => "injected",
        }
    }
}

/// Consecutive-outcome counts required before the status may flip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HysteresisThresholds {
    failures_to_down: u32,
    successes_to_healthy: u32,
}

impl HysteresisThresholds {
    pub fn new(failures_to_down: u32, successes_to_healthy: u32) -> Result<Self> {
        if failures_to_down < 2 || successes_to_healthy < 2 {
            return Err(HealthError::InvalidThresholds {
                failures_to_down,
                successes_to_healthy,
            });
        }
        Ok(Self {
            failures_to_down,
            successes_to_healthy,
        })
    }

    pub fn from_config(config: &MonitorConfig) -> Result<Self> {
        Self::new(config.failure_threshold, config.success_threshold)
    }

    pub fn failures_to_down(&self) -> u32 {
        self.failures_to_down
    }

    pub fn successes_to_healthy(&self) -> u32 {
        self.successes_to_healthy
    }
}

/// Point-in-time view of an element's debounced liveness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthState {
    pub status: HealthStatus,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
    pub last_transition_at: Option<DateTime<Utc>>,
    pub last_probe_at: Option<DateTime<Utc>>,
    /// Number of status transitions so far; orders events of one element.
    pub transitions: u64,
}

impl Default for HealthState {
    fn default() -> Self {
        Self {
            status: HealthStatus::Healthy,
            consecutive_successes: 0,
            consecutive_failures: 0,
            last_transition_at: None,
            last_probe_at: None,
            transitions: 0,
        }
    }
}

/// Hysteresis machine owned by exactly one element.
///
/// `healthy -> down` needs `failures_to_down` consecutive failures and `down -> healthy`
/// needs `successes_to_healthy` consecutive successes. Anything in between is `suspect`.
#[derive(Debug, Clone)]
pub struct ElementMachine {
    thresholds: HysteresisThresholds,
    state: HealthState,
}

impl ElementMachine {
    pub fn new(thresholds: HysteresisThresholds) -> Self {
        Self {
            thresholds,
            state: HealthState::default(),
        }
    }

    pub fn state(&self) -> &HealthState {
        &self.state
    }

    /// Fold one outcome into the machine, returning `(from, to)` when the status changed.
    pub fn apply(
        &mut self,
        outcome: ProbeOutcome,
        at: DateTime<Utc>,
    ) -> Option<(HealthStatus, HealthStatus)> {
        let state = &mut self.state;
        state.last_probe_at = Some(at);
        let previous = state.status;

        let next = if outcome.is_success() {
            state.consecutive_failures = 0;
            state.consecutive_successes = state.consecutive_successes.saturating_add(1);
            match previous {
                HealthStatus::Healthy => HealthStatus::Healthy,
                _ if state.consecutive_successes >= self.thresholds.successes_to_healthy => {
                    HealthStatus::Healthy
                }
                _ => HealthStatus::Suspect,
            }
        } else {
            state.consecutive_successes = 0;
            state.consecutive_failures = state.consecutive_failures.saturating_add(1);
            match previous {
                HealthStatus::Down => HealthStatus::Down,
                _ if state.consecutive_failures >= self.thresholds.failures_to_down => {
                    HealthStatus::Down
                }
                _ => HealthStatus::Suspect,
            }
        };

        if next == previous {
            return None;
        }
        state.status = next;
        state.last_transition_at = Some(at);
        state.transitions += 1;
        Some((previous, next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine(f: u32, s: u32) -> ElementMachine {
        ElementMachine::new(HysteresisThresholds::new(f, s).unwrap())
    }

    fn feed(machine: &mut ElementMachine, outcomes: &[ProbeOutcome]) -> Vec<HealthStatus> {
        outcomes
            .iter()
            .map(|outcome| {
                machine.apply(*outcome, Utc::now());
                machine.state().status
            })
            .collect()
    }

    use ProbeOutcome::{Success as Pass, TimedOut as Fail};

    #[test]
    fn down_after_exactly_f_failures() {
        let mut m = machine(3, 2);
        let trace = feed(&mut m, &[Fail, Fail, Fail]);
        assert_eq!(
            trace,
            vec![HealthStatus::Suspect, HealthStatus::Suspect, HealthStatus::Down]
        );
        assert_eq!(m.state().consecutive_failures, 3);
    }

    #[test]
    fn healthy_after_exactly_s_successes() {
        let mut m = machine(2, 3);
        feed(&mut m, &[Fail, Fail]);
        assert_eq!(m.state().status, HealthStatus::Down);
        let trace = feed(&mut m, &[Pass, Pass, Pass]);
        assert_eq!(
            trace,
            vec![HealthStatus::Suspect, HealthStatus::Suspect, HealthStatus::Healthy]
        );
    }

    #[test]
    fn interleaved_outcome_resets_the_opposite_counter() {
        let mut m = machine(3, 2);
        feed(&mut m, &[Fail, Fail, Pass, Fail, Fail]);
        assert_eq!(m.state().status, HealthStatus::Suspect);
        assert_eq!(m.state().consecutive_failures, 2);
        assert_eq!(m.state().consecutive_successes, 0);
        feed(&mut m, &[Fail]);
        assert_eq!(m.state().status, HealthStatus::Down);
    }

    #[test]
    fn single_probe_never_flips_between_healthy_and_down() {
        let mut m = machine(2, 2);
        assert_eq!(
            m.apply(Fail, Utc::now()),
            Some((HealthStatus::Healthy, HealthStatus::Suspect))
        );
        feed(&mut m, &[Fail]);
        assert_eq!(
            m.apply(Pass, Utc::now()),
            Some((HealthStatus::Down, HealthStatus::Suspect))
        );
    }

    #[test]
    fn repeated_outcomes_in_stable_state_emit_nothing() {
        let mut m = machine(2, 2);
        assert_eq!(m.apply(Pass, Utc::now()), None);
        feed(&mut m, &[Fail, Fail]);
        assert_eq!(m.apply(Fail, Utc::now()), None);
        assert_eq!(m.state().transitions, 2);
    }

    #[test]
    fn thresholds_below_two_are_rejected() {
        assert!(HysteresisThresholds::new(1, 2).is_err());
        assert!(HysteresisThresholds::new(2, 1).is_err());
    }
}
