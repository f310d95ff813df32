//! ---
//! fabric_section: "10-testing"
//! fabric_subsection: "integration-tests"
//! fabric_type: "source"
//! fabric_scope: "code"
//! fabric_description: "End-to-end failover of the simulated two-plane fabric."
//! fabric_version: "v0.0.0-prealpha"
//! fabric_owner: "tbd"
//! ---
use std::path::Path;
use std::time::Duration;

use fabric_common::config::AppConfig;
use fabric_core::{Collaborators, FabricRuntime, RecoveryOutcome, RouterPhase, RuntimeHandle};
use fabric_metrics::new_registry;
use fabric_resilience::{ChaosEngine, ChaosOutcome, ChaosScenario, Regime, ResilienceMetrics};
use fabric_routing::StaticRoute;
use fabric_testharness::{DaemonCall, SimulatedFabric};

fn config() -> AppConfig {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/fabric.sim.toml");
    let mut config: AppConfig = std::fs::read_to_string(path)
        .unwrap()
        .parse()
        .unwrap();
    config.monitor.probe_interval = Duration::from_millis(20);
    config.monitor.probe_timeout = Duration::from_millis(10);
    config.recovery.readiness_poll_interval = Duration::from_millis(5);
    config.snapshot.interval = Some(Duration::from_millis(20));
    config
}

async fn start(config: AppConfig) -> (SimulatedFabric, RuntimeHandle) {
    let sim = SimulatedFabric::from_config(&config);
    let handle = FabricRuntime::new(
        config,
        Collaborators {
            probe: sim.probe.clone(),
            daemon: sim.daemon.clone(),
            forwarding: sim.forwarding.clone(),
        },
    )
    .with_registry(new_registry())
    .start()
    .await
    .unwrap();
    (sim, handle)
}

async fn eventually<F>(what: &str, mut check: F)
where
    F: FnMut() -> bool,
{
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

fn fallback() -> StaticRoute {
    StaticRoute {
        prefix: "10.0.2.0/24".parse().unwrap(),
        nexthop: "10.0.12.2".parse().unwrap(),
        admin_distance: 250,
        tag: 666,
    }
}

fn position(calls: &[DaemonCall], from: usize, wanted: impl Fn(&DaemonCall) -> bool) -> usize {
    from + calls[from..]
        .iter()
        .position(wanted)
        .unwrap_or_else(|| panic!("call missing after index {from}: {calls:?}"))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fallback_routes_carry_traffic_while_the_daemon_stays_down() {
    let mut config = config();
    config.recovery.auto_restart = false;
    let (sim, handle) = start(config).await;
    eventually("first snapshot", || handle.store().latest("bgp1").is_some()).await;

    handle.facade().inject_failure(&["bgp1".to_owned()]).unwrap();
    eventually("overlay freezes", || {
        handle
            .board()
            .get("overlay")
            .is_some_and(|decision| decision.regime == Regime::FailStatic)
    })
    .await;
    eventually("bgp1 recovery report", || {
        handle.orchestrator().last_report("bgp1").is_some()
    })
    .await;

    let report = handle.orchestrator().last_report("bgp1").unwrap();
    assert_eq!(report.outcome, RecoveryOutcome::DegradedSafe);
    assert_eq!(report.static_routes, vec![fallback()]);
    assert_eq!(
        sim.daemon.forwarding_table("bgp1"),
        vec![("10.0.2.0/24".parse().unwrap(), "10.0.12.2".parse().unwrap(), 250)]
    );
    // Frozen domains never reprogram the forwarding plane.
    assert!(sim.forwarding.last_update("overlay").is_none());
    handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn router_loss_scenario_flushes_installs_then_restarts() {
    let (sim, handle) = start(config()).await;
    eventually("first snapshot", || handle.store().latest("bgp1").is_some()).await;

    let scenario = ChaosScenario::from_file(
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/scenarios/router-loss.toml"),
    )
    .unwrap();
    let registry = new_registry();
    let metrics = ResilienceMetrics::new(registry).unwrap();
    let records = ChaosEngine::new(scenario, Some(metrics))
        .execute(handle.facade())
        .await;
    assert_eq!(records.len(), 5);
    assert!(records.iter().all(|record| record.outcome.is_applied()), "{records:#?}");

    let ChaosOutcome::Applied(summary) = &records[3].outcome else {
        unreachable!()
    };
    assert_eq!(summary["cleared"][0], "bgp1");
    assert_eq!(summary["recoveries"][0]["report"]["outcome"], "recovered");

    let calls = sim.daemon.calls_for("bgp1");
    let flush = position(&calls, 0, |call| matches!(call, DaemonCall::Flush(_)));
    let install = position(&calls, flush, |call| {
        matches!(call, DaemonCall::InstallStatic(_, routes) if routes == &vec![fallback()])
    });
    let stop = position(&calls, install, |call| matches!(call, DaemonCall::Stop(_)));
    position(&calls, stop, |call| matches!(call, DaemonCall::Start(_)));

    assert!(sim.daemon.is_running("bgp1"));
    assert_eq!(sim.daemon.static_routes("bgp1"), vec![fallback()]);
    // The restarted daemon's learned route wins over the fallback again.
    assert_eq!(
        sim.daemon.forwarding_table("bgp1"),
        vec![("10.0.2.0/24".parse().unwrap(), "10.0.12.2".parse().unwrap(), 20)]
    );

    eventually("overlay thaws", || {
        handle
            .board()
            .get("overlay")
            .is_some_and(|decision| decision.regime == Regime::FailClosed)
    })
    .await;
    eventually("bgp1 stable", || {
        handle.orchestrator().phase("bgp1") == Some(RouterPhase::Stable)
    })
    .await;
    handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn losing_both_spines_freezes_the_layer_without_reprogramming() {
    let (sim, handle) = start(config()).await;
    handle
        .facade()
        .inject_failure(&["spine1".to_owned(), "spine2".to_owned()])
        .unwrap();
    eventually("spine layer freezes", || {
        handle
            .board()
            .get("spine-layer")
            .is_some_and(|decision| {
                decision.regime == Regime::FailStatic && decision.failed.len() == 2
            })
    })
    .await;
    let updates_while_frozen = sim.forwarding.updates().len();

    handle
        .facade()
        .trigger_recovery(&["spine1".to_owned(), "spine2".to_owned()])
        .await
        .unwrap();
    eventually("spine layer thaws", || {
        handle
            .board()
            .get("spine-layer")
            .is_some_and(|decision| {
                decision.regime == Regime::FailClosed && decision.failed.is_empty()
            })
    })
    .await;
    let last = sim.forwarding.last_update("spine-layer").unwrap();
    assert_eq!(last.healthy, vec!["spine1", "spine2"]);
    assert!(sim.forwarding.updates().len() > updates_while_frozen);
    handle.shutdown().await.unwrap();
}
