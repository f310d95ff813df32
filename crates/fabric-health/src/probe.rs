//! ---
//! fabric_section: "02-health-monitoring"
//! fabric_subsection: "module"
//! fabric_type: "source"
//! fabric_scope: "code"
//! fabric_description: "Probe transport boundary."
//! fabric_version: "v0.0.0-prealpha"
//! fabric_owner: "tbd"
//! ---
use async_trait::async_trait;

use crate::element::ElementContext;

/// Reachability check supplied by an adapter (ICMP, controller link, simulated).
///
/// `Ok(false)`, any error, and exceeding the element's probe timeout all count as a failed
/// probe. The monitor logs error text but never interprets it.
#[async_trait]
pub trait ProbeTransport: Send + Sync + 'static {
    async fn probe(&self, element: &ElementContext) -> anyhow::Result<bool>;
}
