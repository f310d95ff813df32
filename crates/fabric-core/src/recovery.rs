//! ---
//! fabric_section: "01-core-functionality"
//! fabric_subsection: "module"
//! fabric_type: "source"
//! fabric_scope: "code"
//! fabric_description: "Per-router static fallback and routing daemon recovery."
//! fabric_version: "v0.0.0-prealpha"
//! fabric_owner: "tbd"
//! ---
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::{ArcSwap, ArcSwapOption};
use chrono::{DateTime, Utc};
use fabric_common::config::{AppConfig, RouterConfig};
use fabric_logging::{fabric_error, LogContext};
use fabric_resilience::{ResilienceMetrics, RestartPolicy, SelfHealingManager, SelfHealingOutcome};
use fabric_routing::{RouteSnapshotStore, RoutingDaemon, SnapshotFreshness, StaticRoute};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::RecoveryError;

const LOG_TARGET: &str = "fabric::core::recovery";

/// Where a router stands in its degradation and recovery cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RouterPhase {
    Stable,
    /// The router element is down.
    Degraded,
    /// Best-effort capture of the router's best paths.
    Snapshotting,
    /// Snapshot routes are installed as low-preference statics.
    StaticFallback,
    /// The routing daemon was restarted and is re-learning routes.
    Reconverging,
}

impl RouterPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouterPhase::Stable => "stable",
            RouterPhase::Degraded => "degraded",
            RouterPhase::Snapshotting => "snapshotting",
            RouterPhase::StaticFallback => "static-fallback",
            RouterPhase::Reconverging => "reconverging",
        }
    }
}

impl fmt::Display for RouterPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecoveryOutcome {
    /// Fallback installed, daemon restarted and ready.
    Recovered,
    /// Fallback installed but the daemon is not back (failed, skipped or cancelled).
    DegradedSafe,
    /// No fallback could be installed.
    Unprotected,
}

impl RecoveryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryOutcome::Recovered => "recovered",
            RecoveryOutcome::DegradedSafe => "degraded-safe",
            RecoveryOutcome::Unprotected => "unprotected",
        }
    }
}

impl fmt::Display for RecoveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one recovery sequence did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveryReport {
    pub router: String,
    pub outcome: RecoveryOutcome,
    pub snapshot_version: Option<u64>,
    /// Dynamic routes removed, when the daemon could tell.
    pub routes_flushed: Option<usize>,
    /// Fallback routes installed by this sequence.
    pub static_routes: Vec<StaticRoute>,
    pub restart: Option<SelfHealingOutcome>,
    pub ready: bool,
    pub cancelled: bool,
    pub notes: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl RecoveryReport {
    fn begin(router: &str) -> Self {
        Self {
            router: router.to_owned(),
            outcome: RecoveryOutcome::Unprotected,
            snapshot_version: None,
            routes_flushed: None,
            static_routes: Vec::new(),
            restart: None,
            ready: false,
            cancelled: false,
            notes: Vec::new(),
            started_at: Utc::now(),
            duration_ms: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecoverySettings {
    pub fallback_admin_distance: u8,
    pub fallback_tag: u32,
    pub readiness_timeout: Duration,
    pub readiness_poll_interval: Duration,
    /// Continue from static fallback into a daemon restart when a router goes down.
    pub auto_restart: bool,
    pub capture_on_degrade: bool,
}

impl RecoverySettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            fallback_admin_distance: config.recovery.fallback_admin_distance,
            fallback_tag: config.recovery.fallback_tag,
            readiness_timeout: config.recovery.readiness_timeout,
            readiness_poll_interval: config.recovery.readiness_poll_interval,
            auto_restart: config.recovery.auto_restart,
            capture_on_degrade: config.snapshot.capture_on_degrade,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseState {
    pub phase: RouterPhase,
    pub since: DateTime<Utc>,
}

/// Status line of one router for operator reports.
#[derive(Debug, Clone, Serialize)]
pub struct RouterStatus {
    pub router: String,
    pub phase: RouterPhase,
    pub phase_since: DateTime<Utc>,
    pub recovering: bool,
    pub snapshot: Option<SnapshotFreshness>,
    pub last_recovery: Option<RecoveryReport>,
}

struct RouterRuntime {
    config: RouterConfig,
    phase: ArcSwap<PhaseState>,
    in_progress: AtomicBool,
    /// Present only while a sequence runs; a stored permit cancels its next wait.
    cancel: ArcSwapOption<Notify>,
    last_report: ArcSwapOption<RecoveryReport>,
}

impl RouterRuntime {
    fn new(config: RouterConfig) -> Self {
        Self {
            config,
            phase: ArcSwap::from_pointee(PhaseState {
                phase: RouterPhase::Stable,
                since: Utc::now(),
            }),
            in_progress: AtomicBool::new(false),
            cancel: ArcSwapOption::empty(),
            last_report: ArcSwapOption::empty(),
        }
    }
}

/// Marks a router busy for the lifetime of one sequence, even if the caller is dropped.
struct InFlight<'a>(&'a RouterRuntime);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.cancel.store(None);
        self.0.in_progress.store(false, Ordering::Release);
    }
}

/// Owns the recovery state of every router.
///
/// Routers never share state: a hung restart on one router cannot delay another. The static
/// backstop is installed from a detached task, so dropping or cancelling a sequence never
/// leaves a router without its fallback routes, and nothing here ever removes them.
pub struct RecoveryOrchestrator {
    routers: IndexMap<String, RouterRuntime>,
    store: Arc<RouteSnapshotStore>,
    daemon: Arc<dyn RoutingDaemon>,
    healing: SelfHealingManager,
    settings: RecoverySettings,
    metrics: Option<ResilienceMetrics>,
}

impl std::fmt::Debug for RecoveryOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryOrchestrator")
            .field("routers", &self.routers.keys().collect::<Vec<_>>())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl RecoveryOrchestrator {
    pub fn new(
        routers: IndexMap<String, RouterConfig>,
        store: Arc<RouteSnapshotStore>,
        settings: RecoverySettings,
        restart: RestartPolicy,
    ) -> Self {
        Self {
            routers: routers
                .into_iter()
                .map(|(router, config)| (router, RouterRuntime::new(config)))
                .collect(),
            daemon: store.daemon(),
            store,
            healing: SelfHealingManager::new(restart, None),
            settings,
            metrics: None,
        }
    }

    pub fn from_config(config: &AppConfig, store: Arc<RouteSnapshotStore>) -> Self {
        Self::new(
            config.routers.clone(),
            store,
            RecoverySettings::from_config(config),
            RestartPolicy::from_config(&config.recovery),
        )
    }

    pub fn with_metrics(mut self, metrics: ResilienceMetrics) -> Self {
        self.healing = SelfHealingManager::new(*self.healing.policy(), Some(metrics.clone()));
        self.metrics = Some(metrics);
        self
    }

    pub fn routers(&self) -> impl Iterator<Item = &str> {
        self.routers.keys().map(String::as_str)
    }

    pub fn manages(&self, router: &str) -> bool {
        self.routers.contains_key(router)
    }

    pub fn settings(&self) -> &RecoverySettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<RouteSnapshotStore> {
        &self.store
    }

    pub fn phase(&self, router: &str) -> Option<RouterPhase> {
        self.routers
            .get(router)
            .map(|runtime| runtime.phase.load().phase)
    }

    pub fn last_report(&self, router: &str) -> Option<Arc<RecoveryReport>> {
        self.routers.get(router)?.last_report.load_full()
    }

    pub fn is_recovering(&self, router: &str) -> bool {
        self.routers
            .get(router)
            .is_some_and(|runtime| runtime.in_progress.load(Ordering::Acquire))
    }

    pub fn statuses(&self) -> Vec<RouterStatus> {
        let freshness = self.store.freshness();
        self.routers
            .iter()
            .map(|(router, runtime)| {
                let phase = runtime.phase.load_full();
                RouterStatus {
                    router: router.clone(),
                    phase: phase.phase,
                    phase_since: phase.since,
                    recovering: runtime.in_progress.load(Ordering::Acquire),
                    snapshot: freshness.iter().find(|f| &f.router_id == router).cloned(),
                    last_recovery: runtime
                        .last_report
                        .load_full()
                        .map(|report| RecoveryReport::clone(&report)),
                }
            })
            .collect()
    }

    fn runtime(&self, router: &str) -> Result<&RouterRuntime, RecoveryError> {
        self.routers
            .get(router)
            .ok_or_else(|| RecoveryError::UnknownRouter(router.to_owned()))
    }

    fn acquire<'a>(
        &self,
        router: &str,
        runtime: &'a RouterRuntime,
    ) -> Result<InFlight<'a>, RecoveryError> {
        if runtime.in_progress.swap(true, Ordering::AcqRel) {
            return Err(RecoveryError::InProgress(router.to_owned()));
        }
        runtime.cancel.store(Some(Arc::new(Notify::new())));
        Ok(InFlight(runtime))
    }

    fn set_phase(&self, router: &str, runtime: &RouterRuntime, next: RouterPhase) {
        let current = runtime.phase.load();
        if current.phase == next {
            return;
        }
        let previous = current.phase;
        drop(current);
        runtime.phase.store(Arc::new(PhaseState {
            phase: next,
            since: Utc::now(),
        }));
        info!(target: LOG_TARGET, router, from = %previous, to = %next, "router phase changed");
    }

    /// Flush dynamic routes, reinstall the latest snapshot as fallback statics, restart the
    /// daemon and wait for it to become ready.
    ///
    /// Calling it again for a recovered router reinstalls the identical static set.
    pub async fn recover(&self, router: &str) -> Result<RecoveryReport, RecoveryError> {
        let runtime = self.runtime(router)?;
        let _in_flight = self.acquire(router, runtime)?;
        Ok(self.run_sequence(router, runtime, true).await)
    }

    /// React to the router element going down: capture what is still reachable, fall back to
    /// statics and, when enabled, restart the daemon.
    pub async fn handle_router_down(&self, router: &str) -> Result<RecoveryReport, RecoveryError> {
        let runtime = self.runtime(router)?;
        let _in_flight = self.acquire(router, runtime)?;
        warn!(target: LOG_TARGET, router, "router element down");
        self.set_phase(router, runtime, RouterPhase::Degraded);

        if self.settings.capture_on_degrade {
            self.set_phase(router, runtime, RouterPhase::Snapshotting);
            match self.store.capture(router).await {
                Ok(snapshot) => {
                    info!(target: LOG_TARGET, router, version = snapshot.version, routes = snapshot.len(), "captured best paths on degradation")
                }
                Err(err) => {
                    warn!(target: LOG_TARGET, router, error = %err, "capture impossible; using last available snapshot")
                }
            }
        }
        Ok(self
            .run_sequence(router, runtime, self.settings.auto_restart)
            .await)
    }

    /// The router element is healthy again. Completes a reconvergence.
    pub fn handle_router_up(&self, router: &str) -> Result<RouterPhase, RecoveryError> {
        let runtime = self.runtime(router)?;
        let phase = runtime.phase.load().phase;
        if phase == RouterPhase::Reconverging {
            self.set_phase(router, runtime, RouterPhase::Stable);
            return Ok(RouterPhase::Stable);
        }
        debug!(target: LOG_TARGET, router, phase = %phase, "router element healthy");
        Ok(phase)
    }

    /// Abort the restart or readiness wait of an in-flight sequence. Fallback routes remain.
    pub fn cancel(&self, router: &str) -> Result<bool, RecoveryError> {
        let runtime = self.runtime(router)?;
        match runtime.cancel.load_full() {
            Some(cancel) => {
                cancel.notify_one();
                info!(target: LOG_TARGET, router, "recovery cancellation requested");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn cancel_all(&self) {
        for router in self.routers.keys() {
            let _ = self.cancel(router);
        }
    }

    async fn run_sequence(
        &self,
        router: &str,
        runtime: &RouterRuntime,
        restart: bool,
    ) -> RecoveryReport {
        let started = Instant::now();
        let mut report = RecoveryReport::begin(router);
        let cancel = runtime.cancel.load_full();

        let protected = self.install_backstop(router, runtime, &mut report).await;

        if restart {
            self.restart_and_wait(router, runtime, cancel.as_deref(), &mut report)
                .await;
        } else {
            report
                .notes
                .push("daemon restart skipped: auto_restart is disabled".to_owned());
        }

        report.outcome = match (protected, report.ready) {
            (false, _) => RecoveryOutcome::Unprotected,
            (true, true) => RecoveryOutcome::Recovered,
            (true, false) => RecoveryOutcome::DegradedSafe,
        };
        let elapsed = started.elapsed();
        report.duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);

        if let Some(metrics) = &self.metrics {
            metrics.observe_recovery(router, report.outcome.as_str(), elapsed);
        }
        match report.outcome {
            RecoveryOutcome::Recovered => {
                info!(target: LOG_TARGET, router, duration_ms = report.duration_ms, routes = report.static_routes.len(), "router recovered")
            }
            RecoveryOutcome::DegradedSafe => {
                warn!(target: LOG_TARGET, router, duration_ms = report.duration_ms, notes = ?report.notes, "router holding on static fallback")
            }
            RecoveryOutcome::Unprotected => fabric_error!(
                context = LogContext::new().with_router(router),
                "router has no fallback routes after {} ms: {}",
                report.duration_ms,
                report.notes.join("; ")
            ),
        }
        runtime.last_report.store(Some(Arc::new(report.clone())));
        report
    }

    /// Steps 1 and 2. Returns whether the fallback is in place.
    async fn install_backstop(
        &self,
        router: &str,
        runtime: &RouterRuntime,
        report: &mut RecoveryReport,
    ) -> bool {
        let Some(snapshot) = self.store.latest(router) else {
            warn!(target: LOG_TARGET, router, "no snapshot captured yet; leaving dynamic routes in place");
            report
                .notes
                .push("no snapshot has been captured for this router".to_owned());
            return false;
        };
        report.snapshot_version = Some(snapshot.version);
        let routes = snapshot.as_static_routes(
            self.settings.fallback_admin_distance,
            self.settings.fallback_tag,
        );

        let task = tokio::spawn(flush_and_install(
            Arc::clone(&self.daemon),
            router.to_owned(),
            routes.clone(),
        ));
        match task.await {
            Ok(Ok(flushed)) => {
                report.routes_flushed = flushed;
                if flushed.is_none() {
                    report.notes.push(
                        "dynamic route flush failed; stale routes may shadow the fallback"
                            .to_owned(),
                    );
                }
                info!(
                    target: LOG_TARGET,
                    router,
                    version = snapshot.version,
                    routes = routes.len(),
                    admin_distance = self.settings.fallback_admin_distance,
                    tag = self.settings.fallback_tag,
                    "static fallback installed"
                );
                report.static_routes = routes;
                self.set_phase(router, runtime, RouterPhase::StaticFallback);
                true
            }
            Ok(Err(err)) => {
                error!(target: LOG_TARGET, router, error = %format!("{err:#}"), "static fallback install failed");
                report
                    .notes
                    .push(format!("static route install failed: {err:#}"));
                false
            }
            Err(join) => {
                error!(target: LOG_TARGET, router, error = %join, "static fallback task aborted");
                report
                    .notes
                    .push(format!("static route install aborted: {join}"));
                false
            }
        }
    }

    /// Steps 3 and 4.
    async fn restart_and_wait(
        &self,
        router: &str,
        runtime: &RouterRuntime,
        cancel: Option<&Notify>,
        report: &mut RecoveryReport,
    ) {
        let Some(outcome) = cancellable(cancel, self.restart_daemon(router, &runtime.config)).await
        else {
            report.cancelled = true;
            report.notes.push("cancelled during daemon restart".to_owned());
            return;
        };
        let restarted = outcome.success;
        if let Some(message) = &outcome.last_error {
            if !restarted {
                report.notes.push(format!("daemon restart failed: {message}"));
            }
        }
        report.restart = Some(outcome);
        if !restarted {
            return;
        }
        self.set_phase(router, runtime, RouterPhase::Reconverging);

        let timeout = self.settings.readiness_timeout;
        match cancellable(cancel, time::timeout(timeout, self.wait_ready(router))).await {
            None => {
                report.cancelled = true;
                report.notes.push("cancelled while waiting for readiness".to_owned());
            }
            Some(Ok(())) => {
                report.ready = true;
                self.set_phase(router, runtime, RouterPhase::Stable);
            }
            Some(Err(_)) => {
                warn!(target: LOG_TARGET, router, timeout_s = timeout.as_secs_f64(), "routing daemon not ready in time");
                report.notes.push(format!(
                    "daemon not ready within {} ms",
                    timeout.as_millis()
                ));
            }
        }
    }

    async fn restart_daemon(&self, router: &str, config: &RouterConfig) -> SelfHealingOutcome {
        let daemon = &self.daemon;
        self.healing
            .attempt_recovery(router, |attempt| async move {
                if let Err(err) = daemon.stop_daemon(router).await {
                    debug!(target: LOG_TARGET, router, attempt, error = %format!("{err:#}"), "stop before restart failed");
                }
                daemon.start_daemon(router, config).await
            })
            .await
    }

    async fn wait_ready(&self, router: &str) {
        let mut ticker = time::interval(self.settings.readiness_poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.daemon.is_ready(router).await {
                Ok(true) => return,
                Ok(false) => {}
                Err(err) => {
                    debug!(target: LOG_TARGET, router, error = %format!("{err:#}"), "readiness query failed")
                }
            }
        }
    }
}

async fn flush_and_install(
    daemon: Arc<dyn RoutingDaemon>,
    router: String,
    routes: Vec<StaticRoute>,
) -> anyhow::Result<Option<usize>> {
    let flushed = match daemon.flush_dynamic_routes(&router).await {
        Ok(count) => Some(count),
        Err(err) => {
            warn!(target: LOG_TARGET, router = %router, error = %format!("{err:#}"), "dynamic route flush failed");
            None
        }
    };
    daemon.install_static_routes(&router, &routes).await?;
    Ok(flushed)
}

async fn cancellable<F>(cancel: Option<&Notify>, work: F) -> Option<F::Output>
where
    F: Future,
{
    match cancel {
        Some(cancel) => {
            tokio::select! {
                biased;
                _ = cancel.notified() => None,
                output = work => Some(output),
            }
        }
        None => Some(work.await),
    }
}
