//! ---
//! fabric_section: "04-routing-snapshots"
//! fabric_subsection: "module"
//! fabric_type: "source"
//! fabric_scope: "code"
//! fabric_description: "Route records and static fallback routes."
//! fabric_version: "v0.0.0-prealpha"
//! fabric_owner: "tbd"
//! ---
use std::cmp::Ordering;
use std::fmt;
use std::net::IpAddr;

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

/// One path from a router's RIB.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRecord {
    pub prefix: IpNetwork,
    pub nexthop: IpAddr,
    #[serde(default)]
    pub as_path: Vec<u32>,
    pub admin_distance: u8,
    pub valid: bool,
    pub best: bool,
}

impl RouteRecord {
    pub fn is_usable(&self) -> bool {
        self.valid && self.best
    }

    /// Snapshot order: prefix address, prefix length, then next hop.
    pub fn snapshot_order(&self, other: &Self) -> Ordering {
        (self.prefix.network(), self.prefix.prefix(), self.nexthop).cmp(&(
            other.prefix.network(),
            other.prefix.prefix(),
            other.nexthop,
        ))
    }
}

/// Low-preference route installed to keep forwarding while the dynamic plane is unavailable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StaticRoute {
    pub prefix: IpNetwork,
    pub nexthop: IpAddr,
    pub admin_distance: u8,
    pub tag: u32,
}

impl StaticRoute {
    pub fn from_record(record: &RouteRecord, admin_distance: u8, tag: u32) -> Self {
        Self {
            prefix: record.prefix,
            nexthop: record.nexthop,
            admin_distance,
            tag,
        }
    }
}

/// Merge `routes` into `installed`, replacing entries for the same prefixes.
///
/// Installed routes for a prefix in `routes` with a next hop not in `routes` are removed
/// and returned. Several next hops for one prefix are all kept.
pub fn replace_fallback_routes(
    installed: &mut Vec<StaticRoute>,
    routes: &[StaticRoute],
) -> Vec<StaticRoute> {
    let mut stale = Vec::new();
    installed.retain(|existing| {
        let replaced = routes.iter().any(|route| route.prefix == existing.prefix)
            && !routes.contains(existing);
        if replaced {
            stale.push(existing.clone());
        }
        !replaced
    });
    for route in routes {
        if !installed.contains(route) {
            installed.push(route.clone());
        }
    }
    installed.sort_by_key(|route| (route.prefix.network(), route.prefix.prefix(), route.nexthop));
    stale
}

impl fmt::Display for StaticRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ip route {} {} {} tag {}",
            self.prefix, self.nexthop, self.admin_distance, self.tag
        )
    }
}
