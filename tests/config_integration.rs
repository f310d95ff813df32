//! ---
//! fabric_section: "10-testing"
//! fabric_subsection: "integration-tests"
//! fabric_type: "source"
//! fabric_scope: "code"
//! fabric_description: "Shipped configuration and scenario files stay loadable."
//! fabric_version: "v0.0.0-prealpha"
//! fabric_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};

use fabric_common::config::{AppConfig, ElementRole, Mode};
use fabric_resilience::{ChaosAction, ChaosScenario};

fn repo(path: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("..").join(path)
}

fn read(path: &str) -> String {
    let full = repo(path);
    fs::read_to_string(&full)
        .unwrap_or_else(|err| panic!("failed to read {}: {}", full.display(), err))
}

#[test]
fn shipped_configs_validate() {
    let example: AppConfig = read("configs/fabric.example.toml").parse().unwrap();
    assert_eq!(example.mode, Mode::Production);
    let sim: AppConfig = read("configs/fabric.sim.toml").parse().unwrap();
    assert_eq!(sim.mode, Mode::Simulation);

    for config in [&example, &sim] {
        assert_eq!(config.recovery.fallback_admin_distance, 250);
        assert_eq!(config.recovery.fallback_tag, 666);
        for router in config.routers.keys() {
            assert_eq!(config.element(router).unwrap().role, ElementRole::Router);
        }
        assert_eq!(
            config.domains.keys().collect::<Vec<_>>(),
            vec!["spine-layer", "overlay"]
        );
    }
}

#[test]
fn example_config_maps_every_leaf_uplink() {
    let example: AppConfig = read("configs/fabric.example.toml").parse().unwrap();
    for (element_id, element) in &example.elements {
        if element.role == ElementRole::Leaf {
            let uplinks = example
                .adapters
                .uplinks
                .get(element_id)
                .unwrap_or_else(|| panic!("leaf {element_id} has no uplink map"));
            assert_eq!(uplinks.len(), example.domains["spine-layer"].members.len());
        }
    }
    for router in example.routers.keys() {
        assert!(
            example.adapters.exec_prefix.contains_key(router),
            "router {router} must run inside its namespace"
        );
    }
}

#[test]
fn scenarios_parse_and_name_configured_elements() {
    let sim: AppConfig = read("configs/fabric.sim.toml").parse().unwrap();
    let dir = repo("configs/scenarios");
    let mut seen = 0;
    for entry in fs::read_dir(&dir).unwrap() {
        let path = entry.unwrap().path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("toml") {
            continue;
        }
        let scenario = ChaosScenario::from_file(&path).unwrap();
        assert!(!scenario.actions.is_empty(), "{} is empty", path.display());
        for action in &scenario.actions {
            for target in action.targets() {
                assert!(
                    sim.element(&target).is_some(),
                    "{} targets unknown element {target}",
                    path.display()
                );
            }
            if let ChaosAction::KillDaemon { router, .. } = action {
                assert!(sim.router(router).is_some());
            }
        }
        seen += 1;
    }
    assert!(seen >= 2);
}

#[test]
fn manifests_carry_frontmatter() {
    let mut manifests = vec![repo("Cargo.toml"), repo("tests/Cargo.toml")];
    for parent in ["crates", "bin"] {
        for entry in fs::read_dir(repo(parent)).unwrap() {
            let manifest = entry.unwrap().path().join("Cargo.toml");
            if manifest.exists() {
                manifests.push(manifest);
            }
        }
    }
    for manifest in manifests {
        let content = fs::read_to_string(&manifest).unwrap();
        assert!(
            content.starts_with("# ---"),
            "{} must include frontmatter header",
            manifest.display()
        );
    }
}
