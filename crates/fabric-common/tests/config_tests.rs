//! ---
//! fabric_section: "01-core-functionality"
//! fabric_subsection: "tests"
//! fabric_type: "test"
//! fabric_scope: "code"
//! fabric_description: "Configuration loading and validation tests."
//! fabric_version: "v0.0.0-prealpha"
//! fabric_owner: "tbd"
//! ---
use std::io::Write;
use std::time::Duration;

use fabric_common::config::{AppConfig, DomainThreshold, ElementRole, Mode};

const BASE: &str = r#"
mode = "simulation"

[monitor]
probe_interval_ms = 500
probe_timeout_ms = 200

[elements.spine1]
role = "spine"

[elements.spine2]
role = "spine"
probe_interval_ms = 1000

[elements.bgp1]
role = "router"
address = "10.0.12.1"

[domains.spines]
members = ["spine1", "spine2"]
threshold = 0.5

[routers.bgp1]
asn = 65001
router_id = "10.0.1.1"
peers = [{ address = "10.0.12.2", asn = 65002 }]
"#;

#[test]
fn parses_topology_and_defaults() {
    let config: AppConfig = BASE.parse().expect("config parses");
    assert_eq!(config.mode, Mode::Simulation);
    assert_eq!(config.elements.len(), 3);
    assert_eq!(config.elements["bgp1"].role, ElementRole::Router);
    assert_eq!(
        config.domains["spines"].threshold,
        DomainThreshold::new(1, 2).unwrap()
    );
    assert_eq!(config.monitor.failure_threshold, 3);
    assert_eq!(config.monitor.success_threshold, 2);
    assert_eq!(config.recovery.fallback_admin_distance, 250);
    assert_eq!(config.recovery.fallback_tag, 666);
    assert_eq!(config.routers["bgp1"].peers[0].asn, 65002);

    let (interval, timeout) = config.probe_timing(&config.elements["spine2"]);
    assert_eq!(interval, Duration::from_secs(1));
    assert_eq!(timeout, Duration::from_millis(200));
}

#[test]
fn rejects_unknown_domain_member() {
    let broken = BASE.replace(r#"["spine1", "spine2"]"#, r#"["spine1", "spine9"]"#);
    let err = broken.parse::<AppConfig>().unwrap_err();
    assert!(format!("{err:#}").contains("spine9"));
}

#[test]
fn rejects_router_without_router_element() {
    let broken = BASE.replace("[routers.bgp1]", "[routers.spine1]");
    assert!(broken.parse::<AppConfig>().is_err());
}

#[test]
fn rejects_single_probe_hysteresis() {
    let broken = BASE.replace(
        "probe_timeout_ms = 200",
        "probe_timeout_ms = 200\nfailure_threshold = 1",
    );
    assert!(broken.parse::<AppConfig>().is_err());
}

#[test]
fn rejects_fallback_distance_below_dynamic() {
    let broken = format!("{BASE}\n[recovery]\nfallback_admin_distance = 20\n");
    assert!(broken.parse::<AppConfig>().is_err());
}

#[test]
fn logging_defaults_and_invalid_filter() {
    let config: AppConfig = BASE.parse().unwrap();
    assert!(config.logging.file);
    assert_eq!(config.logging.filter, "info,fabric=debug");

    let quiet = BASE.replace(
        "mode = \"simulation\"",
        "mode = \"simulation\"\n\n[logging]\nfile = false\nfilter = \"warn\"",
    );
    let config: AppConfig = quiet.parse().unwrap();
    assert!(!config.logging.file);
    assert_eq!(config.logging.filter, "warn");

    let broken = BASE.replace(
        "mode = \"simulation\"",
        "mode = \"simulation\"\n\n[logging]\nfilter = \"fabric=[oops\"",
    );
    let err = broken.parse::<AppConfig>().unwrap_err();
    assert!(format!("{err:#}").contains("logging.filter"));
}

#[test]
fn rejects_timeout_longer_than_interval() {
    let broken = BASE.replace("probe_timeout_ms = 200", "probe_timeout_ms = 900");
    assert!(broken.parse::<AppConfig>().is_err());
}

#[test]
fn loads_first_existing_candidate() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fabric.toml");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(BASE.as_bytes()).unwrap();

    let missing = dir.path().join("missing.toml");
    let loaded = AppConfig::load_with_source(&[missing, path.clone()]).expect("load");
    assert_eq!(loaded.source, path);
    assert_eq!(loaded.config.domains.len(), 1);
}

#[test]
fn reports_inspected_candidates_when_none_exist() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nowhere.toml");
    let err = AppConfig::load_with_source(&[missing]).unwrap_err();
    assert!(err.to_string().contains("nowhere.toml"));
}
