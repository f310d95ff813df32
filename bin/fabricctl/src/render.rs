//! ---
//! fabric_section: "08-binaries"
//! fabric_subsection: "binary"
//! fabric_type: "source"
//! fabric_scope: "code"
//! fabric_description: "Plain-text rendering of admin API responses."
//! fabric_version: "v0.0.0-prealpha"
//! fabric_owner: "tbd"
//! ---
use std::fmt::Write;

use fabric_resilience::{ChaosEventRecord, ChaosOutcome};
use serde_json::Value;

fn text<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or("-")
}

fn items(value: &Value) -> &[Value] {
    value.as_array().map(Vec::as_slice).unwrap_or_default()
}

fn names(value: &Value) -> String {
    let names: Vec<&str> = items(value).iter().filter_map(Value::as_str).collect();
    if names.is_empty() {
        "-".to_owned()
    } else {
        names.join(",")
    }
}

pub fn status(report: &Value) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "ELEMENTS");
    for element in items(&report["elements"]) {
        let injected = if element["injected"].as_bool().unwrap_or(false) {
            " (injected)"
        } else {
            ""
        };
        let _ = writeln!(
            out,
            "  {:<10} {:<7} {}{}",
            text(element, "element_id"),
            text(element, "role"),
            text(element, "status"),
            injected
        );
    }

    let _ = writeln!(out, "DOMAINS");
    for domain in items(&report["domains"]) {
        let _ = writeln!(
            out,
            "  {:<12} {:<12} failed {}/{} (threshold {}) down: {}",
            text(domain, "domain"),
            text(domain, "regime"),
            domain["failed"].as_array().map_or(0, Vec::len),
            domain["total"].as_u64().unwrap_or(0),
            text(domain, "threshold"),
            names(&domain["failed"])
        );
    }

    let _ = writeln!(out, "ROUTERS");
    for router in items(&report["routers"]) {
        let snapshot = match router["snapshot"].get("version").and_then(Value::as_u64) {
            Some(version) => format!(
                "snapshot v{version} ({} routes)",
                router["snapshot"]["route_count"].as_u64().unwrap_or(0)
            ),
            None => "no snapshot".to_owned(),
        };
        let last = router["last_recovery"]
            .get("outcome")
            .and_then(Value::as_str)
            .map(|outcome| format!(", last recovery {outcome}"))
            .unwrap_or_default();
        let _ = writeln!(
            out,
            "  {:<10} {:<12} {snapshot}{last}",
            text(router, "router"),
            text(router, "phase")
        );
    }
    out
}

pub fn injected(statuses: &Value) -> String {
    let mut out = String::new();
    for status in items(statuses) {
        let _ = writeln!(
            out,
            "{}: failure latched ({})",
            text(status, "element_id"),
            text(status, "status")
        );
    }
    out
}

pub fn recovery(summary: &Value) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "cleared: {}", names(&summary["cleared"]));
    for attempt in items(&summary["recoveries"]) {
        let router = text(attempt, "router");
        match attempt.get("report") {
            Some(report) => {
                let _ = writeln!(
                    out,
                    "{router}: {} ({} fallback routes, {} ms)",
                    text(report, "outcome"),
                    items(&report["static_routes"]).len(),
                    report["duration_ms"].as_u64().unwrap_or(0)
                );
                for note in items(&report["notes"]).iter().filter_map(Value::as_str) {
                    let _ = writeln!(out, "  {note}");
                }
            }
            None => {
                let _ = writeln!(out, "{router}: refused: {}", text(attempt, "error"));
            }
        }
    }
    out
}

pub fn chaos(records: &[ChaosEventRecord]) -> String {
    let mut out = String::new();
    for (index, record) in records.iter().enumerate() {
        let result = match &record.outcome {
            ChaosOutcome::Applied(_) => "applied".to_owned(),
            ChaosOutcome::Failed(reason) => format!("failed: {reason}"),
        };
        let _ = writeln!(
            out,
            "{:>2}. +{}ms {:<24} {result}",
            index + 1,
            record.delay_applied_ms,
            record.command
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_lists_every_section() {
        let report = json!({
            "elements": [
                {"element_id": "spine1", "role": "spine", "injected": true, "status": "down"},
                {"element_id": "bgp1", "role": "router", "injected": false, "status": "healthy"}
            ],
            "domains": [
                {"domain": "spine-layer", "regime": "fail-closed", "failed": ["spine1"], "total": 2, "threshold": "1/2"}
            ],
            "routers": [
                {"router": "bgp1", "phase": "stable", "snapshot": {"version": 3, "route_count": 1}, "last_recovery": null}
            ]
        });
        let rendered = status(&report);
        assert!(rendered.contains("spine1     spine   down (injected)"));
        assert!(rendered.contains("failed 1/2 (threshold 1/2) down: spine1"));
        assert!(rendered.contains("snapshot v3 (1 routes)"));
        assert!(!rendered.contains("last recovery"));
    }

    #[test]
    fn recovery_shows_refused_routers() {
        let summary = json!({
            "cleared": ["bgp1"],
            "recoveries": [
                {"router": "bgp1", "report": {"outcome": "recovered", "static_routes": [{}], "duration_ms": 12, "notes": []}},
                {"router": "bgp2", "error": "recovery of router bgp2 is already in progress"}
            ]
        });
        let rendered = recovery(&summary);
        assert!(rendered.starts_with("cleared: bgp1\n"));
        assert!(rendered.contains("bgp1: recovered (1 fallback routes, 12 ms)"));
        assert!(rendered.contains("bgp2: refused: recovery of router bgp2 is already in progress"));
    }
}
