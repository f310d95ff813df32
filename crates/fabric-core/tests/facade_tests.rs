//! ---
//! fabric_section: "01-core-functionality"
//! fabric_subsection: "tests"
//! fabric_type: "test"
//! fabric_scope: "code"
//! fabric_description: "Operator facade commands against simulated collaborators."
//! fabric_version: "v0.0.0-prealpha"
//! fabric_owner: "tbd"
//! ---
use std::sync::Arc;

use fabric_common::config::AppConfig;
use fabric_core::{
    AdminCommand, CommandError, DecisionBoard, FacadeError, FaultInjectionFacade,
    RecoveryOrchestrator, RecoveryOutcome,
};
use fabric_health::{HealthError, HealthMonitor, HealthStatus};
use fabric_resilience::{DegradationPolicy, FaultTarget, ProtectionDomain, Regime};
use fabric_routing::RouteSnapshotStore;
use fabric_testharness::{PlaneCall, SimulatedFabric};

fn config() -> AppConfig {
    let mut config: AppConfig = include_str!("../../../configs/fabric.sim.toml")
        .parse()
        .expect("simulation config parses");
    config.recovery.readiness_poll_interval = std::time::Duration::from_millis(5);
    config
}

struct Fixture {
    sim: SimulatedFabric,
    monitor: Arc<HealthMonitor>,
    store: Arc<RouteSnapshotStore>,
    board: Arc<DecisionBoard>,
    facade: FaultInjectionFacade,
}

fn fixture() -> Fixture {
    let config = config();
    let sim = SimulatedFabric::from_config(&config);
    let (monitor, _events) = HealthMonitor::from_config(&config, sim.probe.clone()).unwrap();
    let monitor = Arc::new(monitor);
    let store = Arc::new(RouteSnapshotStore::new(
        config.routers.keys().cloned(),
        sim.daemon.clone(),
    ));
    let orchestrator = Arc::new(RecoveryOrchestrator::from_config(&config, store.clone()));
    let board = Arc::new(DecisionBoard::new(config.domains.keys().cloned()));
    let facade = FaultInjectionFacade::new(
        monitor.clone(),
        orchestrator,
        board.clone(),
        sim.forwarding.clone(),
    );
    Fixture {
        sim,
        monitor,
        store,
        board,
        facade,
    }
}

#[tokio::test]
async fn fail_latches_every_listed_element() {
    let fx = fixture();
    let value = fx.facade.execute_line("fail spine1 leaf2").await.unwrap();
    let statuses = value.as_array().unwrap();
    assert_eq!(statuses.len(), 2);
    assert_eq!(statuses[0]["element_id"], "spine1");
    assert_eq!(statuses[0]["status"], "suspect");
    assert_eq!(statuses[0]["injected"], true);
    assert_eq!(statuses[1]["role"], "leaf");

    assert!(fx.monitor.is_injected("spine1").unwrap());
    fx.monitor.observe("spine1").await.unwrap();
    fx.monitor.observe("spine1").await.unwrap();
    assert_eq!(
        fx.monitor.current_state("spine1").unwrap().status,
        HealthStatus::Down
    );
}

#[tokio::test]
async fn unknown_element_aborts_the_whole_injection() {
    let fx = fixture();
    let err = fx
        .facade
        .inject_failure(&["spine1".to_owned(), "spine9".to_owned()])
        .unwrap_err();
    assert!(matches!(
        err,
        FacadeError::Health(HealthError::UnknownElement(ref id)) if id == "spine9"
    ));
    assert!(err.is_client_error());
    assert!(!fx.monitor.is_injected("spine1").unwrap());
}

#[tokio::test]
async fn recover_clears_faults_and_recovers_routers() {
    let fx = fixture();
    fx.store.capture("bgp1").await.unwrap();
    fx.facade
        .inject_failure(&["bgp1".to_owned(), "spine2".to_owned()])
        .unwrap();

    let summary = fx
        .facade
        .trigger_recovery(&["bgp1".to_owned(), "spine2".to_owned(), "leaf1".to_owned()])
        .await
        .unwrap();
    assert_eq!(summary.cleared, vec!["bgp1", "spine2"]);
    assert_eq!(summary.recoveries.len(), 1);
    let attempt = &summary.recoveries[0];
    assert_eq!(attempt.router, "bgp1");
    assert!(attempt.error.is_none());
    assert_eq!(
        attempt.report.as_ref().unwrap().outcome,
        RecoveryOutcome::Recovered
    );
    assert!(!fx.monitor.is_injected("bgp1").unwrap());
    assert_eq!(fx.sim.daemon.static_routes("bgp1").len(), 1);
}

#[tokio::test]
async fn kill_daemon_only_accepts_routers() {
    let fx = fixture();
    let err = fx.facade.execute_line("kill-daemon spine1").await.unwrap_err();
    assert!(matches!(err, FacadeError::NotARouter(ref id) if id == "spine1"));

    let value = fx.facade.execute_line("failbgp bgp2").await.unwrap();
    assert_eq!(value["daemon"], "stopped");
    assert!(!fx.sim.daemon.is_running("bgp2"));
    assert_eq!(
        fx.monitor.current_state("bgp2").unwrap().status,
        HealthStatus::Healthy
    );
}

#[tokio::test]
async fn detach_and_attach_drive_the_forwarding_plane() {
    let fx = fixture();
    fx.facade
        .execute(AdminCommand::Detach {
            switches: vec!["leaf1".to_owned(), "spine2".to_owned()],
        })
        .await
        .unwrap();
    assert!(!fx.sim.forwarding.is_attached("leaf1"));
    fx.facade.execute_line("recoversdn leaf1").await.unwrap();
    assert!(fx.sim.forwarding.is_attached("leaf1"));
    assert_eq!(
        fx.sim.forwarding.calls(),
        vec![
            PlaneCall::Detach("leaf1".to_owned()),
            PlaneCall::Detach("spine2".to_owned()),
            PlaneCall::Attach("leaf1".to_owned()),
        ]
    );

    let err = fx.facade.execute_line("detach bgp1").await.unwrap_err();
    assert!(matches!(err, FacadeError::NotASwitch(ref id) if id == "bgp1"));

    fx.sim.forwarding.fail_with(Some("ovs-vsctl: database connection failed"));
    let err = fx.facade.execute_line("attach spine2").await.unwrap_err();
    assert!(!err.is_client_error());
    assert!(err.to_string().contains("database connection failed"));
}

#[tokio::test]
async fn fail_both_stops_the_daemon_then_detaches_switches() {
    let fx = fixture();
    let err = fx.facade.execute_line("failboth bgp1 bgp2").await.unwrap_err();
    assert!(matches!(err, FacadeError::NotASwitch(ref id) if id == "bgp2"));
    assert!(fx.sim.daemon.is_running("bgp1"));

    let value = fx.facade.execute_line("failboth bgp1 leaf1").await.unwrap();
    assert_eq!(value["daemon"], "stopped");
    assert_eq!(value["controller"], "detached");
    assert!(!fx.sim.daemon.is_running("bgp1"));
    assert!(!fx.sim.forwarding.is_attached("leaf1"));
    assert_eq!(fx.sim.forwarding.calls(), vec![PlaneCall::Detach("leaf1".to_owned())]);
}

#[tokio::test]
async fn malformed_commands_are_client_errors() {
    let fx = fixture();
    let err = fx.facade.execute_line("reboot spine1").await.unwrap_err();
    assert!(matches!(
        err,
        FacadeError::Command(CommandError::UnknownCommand(ref verb)) if verb == "reboot"
    ));
    assert!(err.is_client_error());

    let err = fx.facade.execute_line("fail").await.unwrap_err();
    assert!(matches!(
        err,
        FacadeError::Command(CommandError::MissingArgument { command: "fail", .. })
    ));
}

#[tokio::test]
async fn status_reports_elements_domains_and_routers() {
    let fx = fixture();
    let config = config();
    let domain = ProtectionDomain::from_config("spine-layer", &config.domains["spine-layer"]);
    fx.monitor.inject_failure("spine1").unwrap();
    fx.board
        .publish(DegradationPolicy::new().evaluate(&domain, fx.monitor.as_ref()));

    let report = fx.facade.status();
    assert_eq!(report.elements.len(), config.elements.len());
    assert_eq!(report.routers.len(), 2);
    assert_eq!(report.domains.len(), 1);
    assert_eq!(report.domains[0].regime, Regime::FailStatic);

    let value = FaultTarget::execute(&fx.facade, "status").await.unwrap();
    assert_eq!(value["domains"][0]["regime"], "fail-static");
    assert_eq!(value["routers"][0]["phase"], "stable");
    let spine1 = value["elements"]
        .as_array()
        .unwrap()
        .iter()
        .find(|element| element["element_id"] == "spine1")
        .unwrap();
    assert_eq!(spine1["consecutive_failures"], 1);
}
