//! ---
//! fabric_section: "09-simulation"
//! fabric_subsection: "tests"
//! fabric_type: "test"
//! fabric_scope: "code"
//! fabric_description: "Simulated collaborators built from the example simulation config."
//! fabric_version: "v0.0.0-prealpha"
//! fabric_owner: "tbd"
//! ---
use fabric_common::config::AppConfig;
use fabric_routing::{RoutingDaemon, StaticRoute};
use fabric_testharness::{DaemonCall, SimulatedFabric};

fn config() -> AppConfig {
    include_str!("../../../configs/fabric.sim.toml")
        .parse()
        .expect("simulation config parses")
}

#[tokio::test]
async fn routers_learn_their_peers_networks() {
    let fabric = SimulatedFabric::from_config(&config());
    let rib = fabric.daemon.query_rib("bgp1").await.unwrap();
    assert_eq!(rib.len(), 1);
    assert_eq!(rib[0].prefix.to_string(), "10.0.2.0/24");
    assert_eq!(rib[0].nexthop.to_string(), "10.0.12.2");
    assert_eq!(rib[0].as_path, vec![65002]);
    assert_eq!(rib[0].admin_distance, 20);

    let rib = fabric.daemon.query_rib("bgp2").await.unwrap();
    assert_eq!(rib[0].prefix.to_string(), "10.0.1.0/24");
}

#[tokio::test]
async fn static_backstop_wins_only_while_dynamic_routes_are_gone() {
    let config = config();
    let fabric = SimulatedFabric::from_config(&config);
    let daemon = &fabric.daemon;

    daemon.kill("bgp1");
    assert!(daemon.query_rib("bgp1").await.is_err());
    assert_eq!(daemon.forwarding_table("bgp1")[0].2, 20);

    assert_eq!(daemon.flush_dynamic_routes("bgp1").await.unwrap(), 1);
    assert!(daemon.forwarding_table("bgp1").is_empty());

    let route = StaticRoute {
        prefix: "10.0.2.0/24".parse().unwrap(),
        nexthop: "10.0.12.2".parse().unwrap(),
        admin_distance: 250,
        tag: 666,
    };
    daemon
        .install_static_routes("bgp1", std::slice::from_ref(&route))
        .await
        .unwrap();
    daemon
        .install_static_routes("bgp1", std::slice::from_ref(&route))
        .await
        .unwrap();
    assert_eq!(daemon.static_routes("bgp1"), vec![route.clone()]);
    assert_eq!(daemon.forwarding_table("bgp1")[0].2, 250);

    daemon.set_ready("bgp1", false);
    daemon
        .start_daemon("bgp1", config.router("bgp1").unwrap())
        .await
        .unwrap();
    assert!(!daemon.is_ready("bgp1").await.unwrap());
    daemon.set_ready("bgp1", true);
    assert!(daemon.is_ready("bgp1").await.unwrap());

    let table = daemon.forwarding_table("bgp1");
    assert_eq!(table.len(), 1);
    assert_eq!(table[0].2, 20);
    assert_eq!(daemon.static_routes("bgp1").len(), 1);
    assert_eq!(daemon.starts("bgp1"), 1);
    assert!(matches!(
        daemon.calls_for("bgp1").first(),
        Some(DaemonCall::QueryRib(_))
    ));
    assert!(daemon.calls_for("bgp2").is_empty());
}

#[tokio::test]
async fn start_failures_are_consumed_in_order() {
    let config = config();
    let fabric = SimulatedFabric::from_config(&config);
    let router = config.router("bgp2").unwrap();
    fabric.daemon.fail_next_starts("bgp2", 2);
    assert!(fabric.daemon.start_daemon("bgp2", router).await.is_err());
    assert!(fabric.daemon.start_daemon("bgp2", router).await.is_err());
    fabric.daemon.start_daemon("bgp2", router).await.unwrap();
    assert_eq!(fabric.daemon.starts("bgp2"), 1);
    assert!(fabric.daemon.query_rib("bgp9").await.is_err());
}

#[tokio::test]
async fn ecmp_fallback_keeps_both_next_hops() {
    let fabric = SimulatedFabric::from_config(&config());
    let fallback = |nexthop: &str| StaticRoute {
        prefix: "10.0.2.0/24".parse().unwrap(),
        nexthop: nexthop.parse().unwrap(),
        admin_distance: 250,
        tag: 666,
    };
    fabric
        .daemon
        .install_static_routes("bgp1", &[fallback("10.0.13.3")])
        .await
        .unwrap();
    fabric
        .daemon
        .install_static_routes("bgp1", &[fallback("10.0.12.2"), fallback("10.0.12.9")])
        .await
        .unwrap();
    assert_eq!(
        fabric.daemon.static_routes("bgp1"),
        vec![fallback("10.0.12.2"), fallback("10.0.12.9")]
    );
}
