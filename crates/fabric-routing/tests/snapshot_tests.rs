//! ---
//! fabric_section: "04-routing-snapshots"
//! fabric_subsection: "tests"
//! fabric_type: "test"
//! fabric_scope: "code"
//! fabric_description: "Snapshot store capture, isolation, and retention tests."
//! fabric_version: "v0.0.0-prealpha"
//! fabric_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fabric_common::config::RouterConfig;
use fabric_routing::{RouteRecord, RouteSnapshotStore, RoutingDaemon, SnapshotError, StaticRoute};
use parking_lot::Mutex;
use tokio::sync::Notify;

#[derive(Default)]
struct FakeDaemon {
    ribs: Mutex<HashMap<String, Result<Vec<RouteRecord>, String>>>,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
}

impl FakeDaemon {
    fn set_rib(&self, router: &str, rib: Result<Vec<RouteRecord>, String>) {
        self.ribs.lock().insert(router.to_owned(), rib);
    }

    fn gate(&self, router: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.gates.lock().insert(router.to_owned(), gate.clone());
        gate
    }
}

#[async_trait]
impl RoutingDaemon for FakeDaemon {
    async fn start_daemon(&self, _router: &str, _config: &RouterConfig) -> anyhow::Result<()> {
        Ok(())
    }

    async fn stop_daemon(&self, _router: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn query_rib(&self, router: &str) -> anyhow::Result<Vec<RouteRecord>> {
        let gate = self.gates.lock().get(router).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        match self.ribs.lock().get(router).cloned() {
            Some(Ok(rib)) => Ok(rib),
            Some(Err(message)) => Err(anyhow::anyhow!(message)),
            None => Err(anyhow::anyhow!("router {router} unreachable")),
        }
    }

    async fn is_ready(&self, _router: &str) -> anyhow::Result<bool> {
        Ok(true)
    }

    async fn flush_dynamic_routes(&self, _router: &str) -> anyhow::Result<usize> {
        Ok(0)
    }

    async fn install_static_routes(
        &self,
        _router: &str,
        _routes: &[StaticRoute],
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

fn path(prefix: &str, nexthop: &str, valid: bool, best: bool) -> RouteRecord {
    RouteRecord {
        prefix: prefix.parse().unwrap(),
        nexthop: nexthop.parse().unwrap(),
        as_path: vec![65002],
        admin_distance: 20,
        valid,
        best,
    }
}

fn store(daemon: &Arc<FakeDaemon>) -> RouteSnapshotStore {
    RouteSnapshotStore::new(["bgp1", "bgp2"], daemon.clone())
}

#[tokio::test]
async fn capture_keeps_only_valid_best_paths_in_order() {
    let daemon = Arc::new(FakeDaemon::default());
    daemon.set_rib(
        "bgp1",
        Ok(vec![
            path("10.0.2.0/24", "10.0.12.2", true, true),
            path("10.0.2.0/24", "10.0.13.3", true, false),
            path("10.0.3.0/24", "10.0.12.2", false, true),
            path("10.0.1.0/24", "10.0.12.2", true, true),
            path("10.0.1.0/24", "10.0.12.2", true, true),
        ]),
    );
    let store = store(&daemon);

    let snapshot = store.capture("bgp1").await.unwrap();
    assert_eq!(snapshot.version, 1);
    let prefixes: Vec<String> = snapshot
        .records
        .iter()
        .map(|r| r.prefix.to_string())
        .collect();
    assert_eq!(prefixes, vec!["10.0.1.0/24", "10.0.2.0/24"]);
    assert_eq!(store.latest("bgp1").unwrap(), snapshot);

    let again = store.capture("bgp1").await.unwrap();
    assert_eq!(again.version, 2);
    assert_eq!(again.records, snapshot.records);
}

#[tokio::test]
async fn failed_capture_leaves_latest_untouched() {
    let daemon = Arc::new(FakeDaemon::default());
    daemon.set_rib("bgp1", Ok(vec![path("10.0.2.0/24", "10.0.12.2", true, true)]));
    let store = store(&daemon);
    let good = store.capture("bgp1").await.unwrap();

    daemon.set_rib("bgp1", Err("vtysh: bgpd is not running".to_owned()));
    let err = store.capture("bgp1").await.unwrap_err();
    assert!(matches!(err, SnapshotError::Query { ref router, .. } if router == "bgp1"));
    assert_eq!(store.latest("bgp1").unwrap(), good);

    let freshness = store.freshness();
    let bgp1 = freshness.iter().find(|f| f.router_id == "bgp1").unwrap();
    assert_eq!(bgp1.version, Some(1));
    assert_eq!(bgp1.route_count, 1);
    assert!(bgp1.last_error.is_some());
    let bgp2 = freshness.iter().find(|f| f.router_id == "bgp2").unwrap();
    assert_eq!(bgp2.version, None);
}

#[tokio::test]
async fn withdrawn_routes_publish_an_empty_snapshot() {
    let daemon = Arc::new(FakeDaemon::default());
    daemon.set_rib("bgp1", Ok(vec![path("10.0.2.0/24", "10.0.12.2", true, true)]));
    let store = store(&daemon);
    store.capture("bgp1").await.unwrap();

    daemon.set_rib("bgp1", Ok(vec![path("10.0.2.0/24", "10.0.12.2", true, false)]));
    let empty = store.capture("bgp1").await.unwrap();
    assert_eq!(empty.version, 2);
    assert!(empty.is_empty());
    assert_eq!(store.latest("bgp1").unwrap(), empty);
    assert!(empty.as_static_routes(250, 666).is_empty());

    let bgp1 = store
        .freshness()
        .into_iter()
        .find(|f| f.router_id == "bgp1")
        .unwrap();
    assert_eq!(bgp1.version, Some(2));
    assert_eq!(bgp1.route_count, 0);
    assert!(bgp1.last_error.is_none());
}

#[tokio::test]
async fn unknown_router_is_rejected() {
    let daemon = Arc::new(FakeDaemon::default());
    let store = store(&daemon);
    assert_eq!(
        store.capture("bgp9").await.unwrap_err(),
        SnapshotError::UnknownRouter("bgp9".to_owned())
    );
    assert!(store.latest("bgp9").is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn captures_are_serialized_per_router_only() {
    let daemon = Arc::new(FakeDaemon::default());
    daemon.set_rib("bgp1", Ok(vec![path("10.0.2.0/24", "10.0.12.2", true, true)]));
    daemon.set_rib("bgp2", Ok(vec![path("10.0.1.0/24", "10.0.12.1", true, true)]));
    let gate = daemon.gate("bgp1");
    let store = Arc::new(store(&daemon));

    let blocked = tokio::spawn({
        let store = store.clone();
        async move { store.capture("bgp1").await }
    });
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert_eq!(
        store.capture("bgp1").await.unwrap_err(),
        SnapshotError::CaptureInProgress("bgp1".to_owned())
    );
    let other = tokio::time::timeout(Duration::from_millis(200), store.capture("bgp2"))
        .await
        .expect("bgp2 capture is not blocked by bgp1")
        .unwrap();
    assert_eq!(other.version, 1);
    assert!(store.latest("bgp1").is_none());

    gate.notify_one();
    let first = blocked.await.unwrap().unwrap();
    assert_eq!(first.version, 1);

    daemon.gates.lock().clear();
    assert_eq!(store.capture("bgp1").await.unwrap().version, 2);
}

#[tokio::test]
async fn snapshot_converts_to_fallback_routes() {
    let daemon = Arc::new(FakeDaemon::default());
    daemon.set_rib(
        "bgp1",
        Ok(vec![
            path("10.0.2.0/24", "10.0.12.2", true, true),
            path("10.0.3.0/24", "10.0.12.2", true, true),
        ]),
    );
    let store = store(&daemon);
    let snapshot = store.capture("bgp1").await.unwrap();
    let routes = snapshot.as_static_routes(250, 666);
    assert_eq!(routes.len(), 2);
    assert!(routes.iter().all(|r| r.admin_distance == 250 && r.tag == 666));
    assert_eq!(
        routes[0].to_string(),
        "ip route 10.0.2.0/24 10.0.12.2 250 tag 666"
    );
}
