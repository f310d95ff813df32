//! ---
//! fabric_section: "05-resilience-fault-tolerance"
//! fabric_subsection: "module"
//! fabric_type: "source"
//! fabric_scope: "code"
//! fabric_description: "Bounded restart attempts with exponential backoff."
//! fabric_version: "v0.0.0-prealpha"
//! fabric_owner: "tbd"
//! ---
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use fabric_common::config::RecoveryConfig;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::metrics::ResilienceMetrics;

const LOG_TARGET: &str = "fabric::resilience::self_healing";

/// Policy parameters controlling restart attempts and scheduling.
#[derive(Debug, Clone, Copy)]
pub struct RestartPolicy {
    /// Maximum number of restart attempts before declaring failure.
    pub max_attempts: usize,
    /// Base delay applied before the second attempt (exponential backoff).
    pub base_delay: Duration,
    /// Upper bound of the backoff delay, jitter excluded.
    pub max_delay: Duration,
    /// Maximum jitter added to each delay.
    pub jitter: Duration,
}

impl RestartPolicy {
    /// Construct a policy; at least one attempt is always made.
    pub fn new(
        max_attempts: usize,
        base_delay: Duration,
        max_delay: Duration,
        jitter: Duration,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
            jitter,
        }
    }

    /// Policy for routing daemon restarts. Jitter is a quarter of the base delay.
    pub fn from_config(config: &RecoveryConfig) -> Self {
        Self::new(
            config.restart_attempts as usize,
            config.restart_backoff,
            config.restart_backoff_max,
            config.restart_backoff / 4,
        )
    }

    /// Calculate the delay for the provided attempt (1-indexed) with exponential growth.
    fn backoff_delay(&self, attempt: usize, rng: &mut StdRng) -> Duration {
        let exponent = (attempt.saturating_sub(1) as u32).min(8);
        let base = self
            .base_delay
            .mul_f64(f64::from(2u32.pow(exponent)))
            .min(self.max_delay);
        if self.jitter.is_zero() {
            base
        } else {
            let jitter_ms = rng.gen_range(0..=self.jitter.as_millis().max(1)) as u64;
            base + Duration::from_millis(jitter_ms)
        }
    }
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::from_config(&RecoveryConfig::default())
    }
}

/// Outcome produced after running the self-healing routine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelfHealingOutcome {
    /// Router whose daemon was restarted.
    pub router: String,
    /// Number of attempts executed.
    pub attempts: usize,
    /// Whether a restart ultimately succeeded.
    pub success: bool,
    /// Error of the final failed attempt.
    pub last_error: Option<String>,
}

/// Supervisor driving restart attempts and reporting metrics.
///
/// Shared across routers; every call draws its jitter from its own seeded generator so
/// concurrent recoveries never contend.
#[derive(Debug)]
pub struct SelfHealingManager {
    policy: RestartPolicy,
    metrics: Option<ResilienceMetrics>,
    seed: u64,
    calls: AtomicU64,
}

impl SelfHealingManager {
    /// Create a new manager with the provided policy and optional metrics handle.
    pub fn new(policy: RestartPolicy, metrics: Option<ResilienceMetrics>) -> Self {
        Self {
            policy,
            metrics,
            seed: 0xFA11_0FF5,
            calls: AtomicU64::new(0),
        }
    }

    /// Seed the jitter generator for deterministic testing.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Active policy.
    pub fn policy(&self) -> &RestartPolicy {
        &self.policy
    }

    /// Run `operation` until it succeeds or the attempts are exhausted. The closure receives
    /// the 1-indexed attempt number and performs one restart.
    pub async fn attempt_recovery<F, Fut>(
        &self,
        router: &str,
        mut operation: F,
    ) -> SelfHealingOutcome
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        let call = self.calls.fetch_add(1, Ordering::Relaxed);
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(call));
        let mut last_error = None;

        for attempt in 1..=self.policy.max_attempts {
            info!(target: LOG_TARGET, router, attempt, "attempting routing daemon restart");
            match operation(attempt).await {
                Ok(()) => {
                    let outcome = SelfHealingOutcome {
                        router: router.to_owned(),
                        attempts: attempt,
                        success: true,
                        last_error: None,
                    };
                    if let Some(metrics) = &self.metrics {
                        metrics.record_self_heal(&outcome);
                    }
                    info!(target: LOG_TARGET, router, attempt, "routing daemon restart succeeded");
                    return outcome;
                }
                Err(err) => {
                    let message = format!("{err:#}");
                    warn!(target: LOG_TARGET, router, attempt, error = %message, "routing daemon restart attempt failed");
                    last_error = Some(message);
                    if attempt == self.policy.max_attempts {
                        break;
                    }
                    sleep(self.policy.backoff_delay(attempt, &mut rng)).await;
                }
            }
        }

        error!(target: LOG_TARGET, router, attempts = self.policy.max_attempts, "exhausted routing daemon restart attempts");
        let outcome = SelfHealingOutcome {
            router: router.to_owned(),
            attempts: self.policy.max_attempts,
            success: false,
            last_error,
        };
        if let Some(metrics) = &self.metrics {
            metrics.record_self_heal(&outcome);
        }
        outcome
    }
}
