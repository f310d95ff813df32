//! ---
//! fabric_section: "06-collaborator-adapters"
//! fabric_subsection: "module"
//! fabric_type: "source"
//! fabric_scope: "code"
//! fabric_description: "FRR zebra/bgpd control through vtysh and iproute2."
//! fabric_version: "v0.0.0-prealpha"
//! fabric_owner: "tbd"
//! ---
use std::fmt::Write as _;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use fabric_common::config::{AppConfig, RouterConfig};
use fabric_routing::{replace_fallback_routes, RouteRecord, RoutingDaemon, StaticRoute};
use indexmap::IndexMap;
use ipnetwork::IpNetwork;
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::runner::{CommandLine, CommandRunner};

const LOG_TARGET: &str = "fabric::adapters::frr";
const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct BgpTable {
    #[serde(default)]
    routes: IndexMap<String, Vec<BgpPath>>,
}

#[derive(Debug, Deserialize)]
struct BgpPath {
    #[serde(default)]
    valid: bool,
    /// Newer FRR releases say `bestpath`, older ones `best`.
    #[serde(default, alias = "best")]
    bestpath: bool,
    #[serde(default)]
    path: String,
    #[serde(default)]
    nexthops: Vec<BgpNexthop>,
}

#[derive(Debug, Deserialize)]
struct BgpNexthop {
    ip: IpAddr,
}

#[derive(Debug, Deserialize)]
struct BgpSummary {
    #[serde(rename = "ipv4Unicast", default)]
    ipv4_unicast: Option<AfiSummary>,
}

#[derive(Debug, Deserialize)]
struct AfiSummary {
    #[serde(default)]
    peers: IndexMap<String, PeerSummary>,
}

#[derive(Debug, Deserialize)]
struct PeerSummary {
    #[serde(default)]
    state: String,
}

/// Parse `show ip bgp json` into one record per path.
///
/// Locally originated paths (unspecified next hop) cannot back a static route and are dropped.
pub fn parse_bgp_table(json: &str, admin_distance: u8) -> Result<Vec<RouteRecord>> {
    let table: BgpTable =
        serde_json::from_str(json).context("malformed `show ip bgp json` output")?;
    let mut records = Vec::new();
    for (prefix, paths) in table.routes {
        let prefix: IpNetwork = prefix
            .parse()
            .with_context(|| format!("invalid prefix {prefix} in BGP table"))?;
        for path in paths {
            let Some(nexthop) = path.nexthops.first().map(|hop| hop.ip) else {
                continue;
            };
            if nexthop.is_unspecified() {
                continue;
            }
            records.push(RouteRecord {
                prefix,
                nexthop,
                as_path: path
                    .path
                    .split_whitespace()
                    .filter_map(|asn| asn.parse().ok())
                    .collect(),
                admin_distance,
                valid: path.valid,
                best: path.bestpath,
            });
        }
    }
    Ok(records)
}

/// Whether `show ip bgp summary json` lists at least one established IPv4 session.
pub fn parse_bgp_ready(json: &str) -> Result<bool> {
    let summary: BgpSummary =
        serde_json::from_str(json).context("malformed `show ip bgp summary json` output")?;
    Ok(summary.ipv4_unicast.is_some_and(|afi| {
        afi.peers
            .values()
            .any(|peer| peer.state.eq_ignore_ascii_case("established"))
    }))
}

/// Fallback statics with `tag` found in `show running-config` output.
pub fn parse_tagged_statics(running_config: &str, tag: u32) -> Vec<StaticRoute> {
    running_config
        .lines()
        .filter_map(|line| {
            let words: Vec<&str> = line.split_whitespace().collect();
            match words.as_slice() {
                ["ip", "route", prefix, nexthop, distance, "tag", found] => Some(StaticRoute {
                    prefix: prefix.parse().ok()?,
                    nexthop: nexthop.parse().ok()?,
                    admin_distance: distance.parse().ok()?,
                    tag: found.parse().ok()?,
                }),
                _ => None,
            }
        })
        .filter(|route| route.tag == tag)
        .collect()
}

/// Integrated `frr.conf` for a router's zebra and bgpd.
///
/// `statics` are the fallback routes installed so far, so a zebra started from this file
/// comes up with the backstop already in place.
pub fn render_frr_conf(
    router: &str,
    config: &RouterConfig,
    config_dir: &Path,
    statics: &[StaticRoute],
) -> String {
    let mut conf = String::new();
    let _ = writeln!(conf, "frr defaults traditional\n!\nhostname {router}\n!");
    let _ = writeln!(conf, "service integrated-vtysh-config\n!");
    let _ = writeln!(conf, "log file {}/log/frr.log informational\n!", config_dir.display());
    if !statics.is_empty() {
        for route in statics {
            let _ = writeln!(conf, "{route}");
        }
        let _ = writeln!(conf, "!");
    }
    let _ = writeln!(conf, "router bgp {}", config.asn);
    let _ = writeln!(conf, " bgp router-id {}", config.router_id);
    let _ = writeln!(conf, " no bgp ebgp-requires-policy\n no bgp default ipv4-unicast");
    let _ = writeln!(conf, " timers bgp 3 9");
    for peer in &config.peers {
        let _ = writeln!(conf, " neighbor {} remote-as {}", peer.address, peer.asn);
        let _ = writeln!(conf, " neighbor {} timers connect 5", peer.address);
    }
    let _ = writeln!(conf, " !\n address-family ipv4 unicast");
    for network in &config.networks {
        let _ = writeln!(conf, "  network {network}");
    }
    for peer in &config.peers {
        let _ = writeln!(conf, "  neighbor {} activate", peer.address);
        let _ = writeln!(conf, "  neighbor {} next-hop-self", peer.address);
    }
    let _ = writeln!(conf, " exit-address-family\n!\nline vty\n!");
    conf
}

/// Drives one zebra/bgpd pair per router, each in its own configuration directory and
/// optionally inside the router's network namespace.
///
/// Only bgpd is stopped and restarted. zebra keeps the fallback statics in the kernel
/// across a restart, and the statics are also written into `frr.conf` for a zebra that
/// has to be started again.
pub struct FrrRoutingDaemon {
    runner: Arc<dyn CommandRunner>,
    vtysh: String,
    frr_dir: PathBuf,
    exec_prefix: IndexMap<String, Vec<String>>,
    config_dirs: IndexMap<String, PathBuf>,
    dynamic_admin_distance: u8,
    fallback_tag: u32,
    installed: Mutex<IndexMap<String, Vec<StaticRoute>>>,
}

impl std::fmt::Debug for FrrRoutingDaemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrrRoutingDaemon")
            .field("vtysh", &self.vtysh)
            .field("frr_dir", &self.frr_dir)
            .field("routers", &self.config_dirs.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl FrrRoutingDaemon {
    pub fn from_config(config: &AppConfig, runner: Arc<dyn CommandRunner>) -> Self {
        let config_dirs = config
            .routers
            .iter()
            .map(|(router, router_config)| {
                let dir = router_config
                    .config_dir
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(format!("/tmp/frr-{router}")));
                (router.clone(), dir)
            })
            .collect();
        Self {
            runner,
            vtysh: config.adapters.vtysh.clone(),
            frr_dir: config.adapters.frr_dir.clone(),
            exec_prefix: config.adapters.exec_prefix.clone(),
            config_dirs,
            dynamic_admin_distance: config.recovery.dynamic_admin_distance,
            fallback_tag: config.recovery.fallback_tag,
            installed: Mutex::new(IndexMap::new()),
        }
    }

    /// Fallback statics this adapter has installed on `router`.
    pub fn installed_statics(&self, router: &str) -> Vec<StaticRoute> {
        self.installed
            .lock()
            .get(router)
            .cloned()
            .unwrap_or_default()
    }

    fn pattern(daemon: &str, dir: &Path) -> String {
        format!("{daemon}.*{}", dir.display())
    }

    async fn is_running(&self, daemon: &str, dir: &Path) -> Result<bool> {
        let line = CommandLine::new("pgrep", ["-f".to_owned(), Self::pattern(daemon, dir)]);
        let output = self.runner.run(&line, COMMAND_TIMEOUT).await?;
        match output.status {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => output.into_stdout(&line).map(|_| false),
        }
    }

    fn config_dir(&self, router: &str) -> Result<&PathBuf> {
        self.config_dirs
            .get(router)
            .with_context(|| format!("router {router} is not configured"))
    }

    fn in_namespace(&self, router: &str, line: CommandLine) -> CommandLine {
        match self.exec_prefix.get(router) {
            Some(prefix) => line.with_prefix(prefix),
            None => line,
        }
    }

    async fn run(&self, router: &str, line: CommandLine) -> Result<String> {
        let line = self.in_namespace(router, line);
        let output = self.runner.run(&line, COMMAND_TIMEOUT).await?;
        output.into_stdout(&line)
    }

    async fn vtysh(&self, router: &str, commands: &[String]) -> Result<String> {
        let dir = self.config_dir(router)?;
        let mut args = vec![
            "--config_dir".to_owned(),
            dir.display().to_string(),
            "--vty_socket".to_owned(),
            dir.join("sockets").display().to_string(),
        ];
        for command in commands {
            args.push("-c".to_owned());
            args.push(command.clone());
        }
        self.run(router, CommandLine::new(self.vtysh.as_str(), args))
            .await
    }

    fn daemon_command(&self, daemon: &str, dir: &Path) -> CommandLine {
        let conf = dir.join("frr.conf");
        CommandLine::new(
            self.frr_dir.join(daemon).display().to_string(),
            [
                "-d".to_owned(),
                "-f".to_owned(),
                conf.display().to_string(),
                "-i".to_owned(),
                dir.join("run").join(format!("{daemon}.pid")).display().to_string(),
                "-z".to_owned(),
                dir.join("sockets").join("zserv.api").display().to_string(),
                "--vty_socket".to_owned(),
                dir.join("sockets").display().to_string(),
            ],
        )
    }
}

#[async_trait]
impl RoutingDaemon for FrrRoutingDaemon {
    async fn start_daemon(&self, router: &str, config: &RouterConfig) -> Result<()> {
        let dir = self.config_dir(router)?.clone();
        for sub in ["run", "log", "sockets"] {
            tokio::fs::create_dir_all(dir.join(sub))
                .await
                .with_context(|| format!("failed to create {}", dir.join(sub).display()))?;
        }
        let conf_path = dir.join("frr.conf");
        let statics = self.installed_statics(router);
        tokio::fs::write(&conf_path, render_frr_conf(router, config, &dir, &statics))
            .await
            .with_context(|| format!("failed to write {}", conf_path.display()))?;

        if self.is_running("zebra", &dir).await? {
            debug!(target: LOG_TARGET, router, "zebra already running");
        } else {
            self.run(router, self.daemon_command("zebra", &dir))
                .await
                .with_context(|| format!("failed to start zebra for {router}"))?;
        }
        self.run(router, self.daemon_command("bgpd", &dir))
            .await
            .with_context(|| format!("failed to start bgpd for {router}"))?;
        info!(target: LOG_TARGET, router, dir = %dir.display(), statics = statics.len(), "frr daemons started");
        Ok(())
    }

    async fn stop_daemon(&self, router: &str) -> Result<()> {
        let dir = self.config_dir(router)?;
        let line = CommandLine::new("pkill", ["-f".to_owned(), Self::pattern("bgpd", dir)]);
        let output = self.runner.run(&line, COMMAND_TIMEOUT).await?;
        // pkill exits 1 when nothing matched, which is a stopped daemon too.
        if !matches!(output.status, Some(0) | Some(1)) {
            output.into_stdout(&line)?;
        }
        debug!(target: LOG_TARGET, router, "bgpd stopped");
        Ok(())
    }

    async fn query_rib(&self, router: &str) -> Result<Vec<RouteRecord>> {
        let json = self.vtysh(router, &["show ip bgp json".to_owned()]).await?;
        parse_bgp_table(&json, self.dynamic_admin_distance)
    }

    async fn is_ready(&self, router: &str) -> Result<bool> {
        let json = self
            .vtysh(router, &["show ip bgp summary json".to_owned()])
            .await?;
        parse_bgp_ready(&json)
    }

    async fn flush_dynamic_routes(&self, router: &str) -> Result<usize> {
        let listed = self
            .run(router, CommandLine::new("ip", ["-o", "route", "show", "proto", "bgp"]))
            .await?;
        let count = listed.lines().filter(|line| !line.trim().is_empty()).count();
        self.run(router, CommandLine::new("ip", ["route", "flush", "proto", "bgp"]))
            .await?;
        debug!(target: LOG_TARGET, router, count, "kernel bgp routes flushed");
        Ok(count)
    }

    async fn install_static_routes(&self, router: &str, routes: &[StaticRoute]) -> Result<()> {
        if routes.is_empty() {
            return Ok(());
        }
        let running = self
            .vtysh(router, &["show running-config".to_owned()])
            .await?;
        let mut present = parse_tagged_statics(&running, self.fallback_tag);
        let stale = replace_fallback_routes(&mut present, routes);
        if !stale.is_empty() {
            warn!(target: LOG_TARGET, router, stale = stale.len(), "replacing fallback routes with a different next hop");
        }

        let mut commands = vec!["configure terminal".to_owned()];
        commands.extend(stale.iter().map(|route| format!("no {route}")));
        commands.extend(routes.iter().map(ToString::to_string));
        commands.push("end".to_owned());
        self.vtysh(router, &commands).await?;

        replace_fallback_routes(
            self.installed.lock().entry(router.to_owned()).or_default(),
            routes,
        );
        Ok(())
    }
}
