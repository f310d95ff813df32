//! ---
//! fabric_section: "07-admin-api"
//! fabric_subsection: "tests"
//! fabric_type: "test"
//! fabric_scope: "code"
//! fabric_description: "Admin API served over a simulated fabric."
//! fabric_version: "v0.0.0-prealpha"
//! fabric_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use fabric_api::{spawn_api_server, ApiClient, ApiServer, ApiState};
use fabric_common::config::{AppConfig, Mode};
use fabric_core::{Collaborators, FabricRuntime, RuntimeHandle};
use fabric_metrics::new_registry;
use fabric_resilience::{ChaosEngine, ChaosScenario};
use fabric_testharness::SimulatedFabric;
use serde_json::{json, Value};

struct Harness {
    sim: SimulatedFabric,
    runtime: RuntimeHandle,
    server: ApiServer,
    client: ApiClient,
}

impl Harness {
    async fn start() -> Self {
        let mut config: AppConfig = include_str!("../../../configs/fabric.sim.toml")
            .parse()
            .expect("simulation config parses");
        config.monitor.probe_interval = Duration::from_millis(20);
        config.monitor.probe_timeout = Duration::from_millis(10);
        config.recovery.readiness_poll_interval = Duration::from_millis(5);
        config.snapshot.interval = Some(Duration::from_millis(20));

        let sim = SimulatedFabric::from_config(&config);
        let runtime = FabricRuntime::new(
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
        let state = Arc::new(ApiState::new(
            runtime.facade().clone(),
            Mode::Simulation,
            "0.1.0-test",
        ));
        let server = spawn_api_server(state, "127.0.0.1:0".parse().unwrap()).unwrap();
        let client = ApiClient::new(&server.addr().to_string()).unwrap();
        Self {
            sim,
            runtime,
            server,
            client,
        }
    }

    async fn stop(self) {
        self.server.shutdown().await.unwrap();
        self.runtime.shutdown().await.unwrap();
    }
}

fn element<'a>(status: &'a Value, id: &str) -> &'a Value {
    status["elements"]
        .as_array()
        .unwrap()
        .iter()
        .find(|element| element["element_id"] == id)
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn healthz_reports_mode_and_version() {
    let harness = Harness::start().await;
    let health = harness.client.healthz().await.unwrap();
    assert_eq!(health.status, "ok");
    assert_eq!(health.mode, Mode::Simulation);
    assert_eq!(health.version, "0.1.0-test");
    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_elements_show_up_as_injected_in_status() {
    let harness = Harness::start().await;
    let statuses = harness.client.fail(&["leaf1".to_owned()]).await.unwrap();
    assert_eq!(statuses[0]["element_id"], "leaf1");
    assert_eq!(statuses[0]["injected"], true);

    let status = harness.client.status().await.unwrap();
    assert_eq!(element(&status, "leaf1")["injected"], true);
    assert_eq!(element(&status, "leaf2")["injected"], false);
    assert_eq!(status["domains"].as_array().unwrap().len(), 2);

    let summary = harness.client.recover(&["leaf1".to_owned()]).await.unwrap();
    assert_eq!(summary["cleared"], json!(["leaf1"]));
    assert!(summary["recoveries"].as_array().unwrap().is_empty());
    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bad_requests_are_rejected_with_the_reason() {
    let harness = Harness::start().await;

    let err = harness.client.command("reboot spine1").await.unwrap_err();
    let message = err.to_string();
    assert!(message.contains("returned 400"), "{message}");
    assert!(message.contains("unknown command 'reboot'"), "{message}");

    let err = harness.client.fail(&[]).await.unwrap_err();
    assert!(err.to_string().contains("returned 400"));

    let err = harness.client.fail(&["spine9".to_owned()]).await.unwrap_err();
    assert!(err.to_string().contains("returned 404"));

    let err = harness.client.command("kill-daemon leaf1").await.unwrap_err();
    assert!(err.to_string().contains("not a router"));
    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn killed_daemon_is_recovered_through_the_command_endpoint() {
    let harness = Harness::start().await;
    for _ in 0..300 {
        if harness.runtime.store().latest("bgp2").is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let killed = harness.client.command("kill-daemon bgp2").await.unwrap();
    assert_eq!(killed, json!({"router": "bgp2", "daemon": "stopped"}));
    assert!(!harness.sim.daemon.is_running("bgp2"));

    let summary = harness.client.command("recover bgp2").await.unwrap();
    let attempt = &summary["recoveries"][0];
    assert_eq!(attempt["router"], "bgp2");
    assert_eq!(attempt["report"]["outcome"], "recovered");
    assert!(harness.sim.daemon.is_running("bgp2"));
    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn chaos_scenario_runs_against_the_remote_fabric() {
    let harness = Harness::start().await;
    let scenario: ChaosScenario = r#"
        [[actions]]
        type = "detach_controller"
        switches = ["leaf2"]

        [[actions]]
        type = "fail_element"
        elements = ["spine9"]

        [[actions]]
        type = "attach_controller"
        switches = ["leaf2"]
    "#
    .parse()
    .unwrap();

    let records = ChaosEngine::new(scenario, None)
        .execute(&harness.client)
        .await;
    assert_eq!(records.len(), 3);
    assert!(records[0].outcome.is_applied());
    assert!(!records[1].outcome.is_applied());
    assert!(records[2].outcome.is_applied());
    assert!(harness.sim.forwarding.is_attached("leaf2"));
    harness.stop().await;
}
