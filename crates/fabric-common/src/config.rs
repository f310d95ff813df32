//! ---
//! fabric_section: "01-core-functionality"
//! fabric_subsection: "module"
//! fabric_type: "source"
//! fabric_scope: "code"
//! fabric_description: "Fabric topology, probing, and recovery configuration."
//! fabric_version: "v0.0.0-prealpha"
//! fabric_owner: "tbd"
//! ---
use std::fmt;
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_mode() -> Mode {
    Mode::Production
}

fn default_probe_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_probe_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_success_threshold() -> u32 {
    2
}

fn default_fallback_admin_distance() -> u8 {
    250
}

fn default_dynamic_admin_distance() -> u8 {
    20
}

fn default_fallback_tag() -> u32 {
    666
}

fn default_readiness_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_readiness_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_restart_attempts() -> u32 {
    3
}

fn default_restart_backoff() -> Duration {
    Duration::from_millis(500)
}

fn default_restart_backoff_max() -> Duration {
    Duration::from_secs(5)
}

fn default_true() -> bool {
    true
}

fn default_snapshot_interval() -> Option<Duration> {
    Some(Duration::from_secs(10))
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_log_filter() -> String {
    "info,fabric=debug".to_owned()
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9898))
}

fn default_api_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_ping_command() -> String {
    "ping".to_owned()
}

fn default_vtysh_command() -> String {
    "vtysh".to_owned()
}

fn default_ovs_vsctl_command() -> String {
    "ovs-vsctl".to_owned()
}

fn default_ovs_ofctl_command() -> String {
    "ovs-ofctl".to_owned()
}

fn default_controller_target() -> String {
    "tcp:127.0.0.1:6653".to_owned()
}

fn default_frr_dir() -> PathBuf {
    PathBuf::from("/usr/lib/frr")
}

/// Primary configuration object for the fabric failover runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_mode")]
    pub mode: Mode,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    #[serde(default)]
    pub elements: IndexMap<String, ElementConfig>,
    #[serde(default)]
    pub domains: IndexMap<String, DomainConfig>,
    #[serde(default)]
    pub routers: IndexMap<String, RouterConfig>,
    #[serde(default)]
    pub adapters: AdapterConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "FABRIC_CONFIG";

    /// Load configuration from disk, respecting the `FABRIC_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: PathBuf) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        contents
            .parse::<AppConfig>()
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn element(&self, element_id: &str) -> Option<&ElementConfig> {
        self.elements.get(element_id)
    }

    pub fn router(&self, router_id: &str) -> Option<&RouterConfig> {
        self.routers.get(router_id)
    }

    /// Effective probe interval and timeout for an element, after per-element overrides.
    pub fn probe_timing(&self, element: &ElementConfig) -> (Duration, Duration) {
        (
            element.probe_interval.unwrap_or(self.monitor.probe_interval),
            element.probe_timeout.unwrap_or(self.monitor.probe_timeout),
        )
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        if self.elements.is_empty() {
            bail!("configuration must declare at least one element");
        }
        self.monitor.validate()?;
        self.recovery.validate()?;
        crate::logging::parse_filter(&self.logging.filter)
            .with_context(|| format!("logging.filter '{}' is invalid", self.logging.filter))?;
        for (element_id, element) in &self.elements {
            let (interval, timeout) = self.probe_timing(element);
            if interval.is_zero() {
                bail!("element '{}' has a zero probe interval", element_id);
            }
            if timeout > interval {
                bail!(
                    "element '{}' probe timeout {:?} exceeds its interval {:?}",
                    element_id,
                    timeout,
                    interval
                );
            }
        }
        for (domain_id, domain) in &self.domains {
            for member in &domain.members {
                if !self.elements.contains_key(member) {
                    bail!(
                        "domain '{}' references unknown element '{}'",
                        domain_id,
                        member
                    );
                }
            }
        }
        for router_id in self.routers.keys() {
            match self.elements.get(router_id) {
                Some(element) if element.role == ElementRole::Router => {}
                Some(element) => bail!(
                    "router '{}' is declared as element role '{}'",
                    router_id,
                    element.role
                ),
                None => bail!("router '{}' has no matching element", router_id),
            }
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
            api: ApiConfig::default(),
            monitor: MonitorConfig::default(),
            recovery: RecoveryConfig::default(),
            snapshot: SnapshotConfig::default(),
            elements: IndexMap::new(),
            domains: IndexMap::new(),
            routers: IndexMap::new(),
            adapters: AdapterConfig::default(),
        }
    }
}

impl FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Which collaborators the daemon drives.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Shell out to ping, vtysh and ovs-vsctl on the emulation host.
    #[default]
    Production,
    /// In-memory collaborators; nothing leaves the process.
    Simulation,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Production => "production",
            Mode::Simulation => "simulation",
        }
    }

    pub fn is_simulation(&self) -> bool {
        matches!(self, Mode::Simulation)
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "production" => Ok(Mode::Production),
            "simulation" => Ok(Mode::Simulation),
            other => Err(format!("unknown mode: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ElementRole {
    Spine,
    Leaf,
    Router,
}

impl ElementRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementRole::Spine => "spine",
            ElementRole::Leaf => "leaf",
            ElementRole::Router => "router",
        }
    }

    pub fn is_switch(&self) -> bool {
        matches!(self, ElementRole::Spine | ElementRole::Leaf)
    }
}

impl fmt::Display for ElementRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementConfig {
    pub role: ElementRole,
    /// Probe target. Switches without an address are probed through their controller link.
    #[serde(default)]
    pub address: Option<IpAddr>,
    #[serde(default, rename = "probe_interval_ms")]
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    pub probe_interval: Option<Duration>,
    #[serde(default, rename = "probe_timeout_ms")]
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    pub probe_timeout: Option<Duration>,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_probe_interval", rename = "probe_interval_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub probe_interval: Duration,
    #[serde(default = "default_probe_timeout", rename = "probe_timeout_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub probe_timeout: Duration,
    /// Consecutive failed probes before an element is marked down.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Consecutive successful probes before an element is marked healthy again.
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    /// Upper bound of the random delay applied before each probe task's first tick.
    #[serde(default, rename = "start_jitter_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub start_jitter: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            probe_interval: default_probe_interval(),
            probe_timeout: default_probe_timeout(),
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            start_jitter: Duration::ZERO,
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold < 2 {
            bail!(
                "monitor.failure_threshold must be at least 2 (got {})",
                self.failure_threshold
            );
        }
        if self.success_threshold < 2 {
            bail!(
                "monitor.success_threshold must be at least 2 (got {})",
                self.success_threshold
            );
        }
        Ok(())
    }
}

/// Failed-member ratio at which a protection domain switches to fail-static.
///
/// Stored as an exact fraction so boundary comparisons never depend on float rounding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ThresholdRepr", into = "String")]
pub struct DomainThreshold {
    numerator: u32,
    denominator: u32,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ThresholdRepr {
    Text(String),
    Decimal(f64),
}

impl DomainThreshold {
    const DECIMAL_SCALE: u32 = 1_000_000;

    pub fn new(numerator: u32, denominator: u32) -> Result<Self> {
        if denominator == 0 || numerator == 0 || numerator > denominator {
            bail!(
                "domain threshold {}/{} must lie in (0, 1]",
                numerator,
                denominator
            );
        }
        let divisor = gcd(numerator, denominator);
        Ok(Self {
            numerator: numerator / divisor,
            denominator: denominator / divisor,
        })
    }

    pub fn from_decimal(value: f64) -> Result<Self> {
        if !(value > 0.0 && value <= 1.0) {
            bail!("domain threshold {} must lie in (0, 1]", value);
        }
        let scaled = (value * f64::from(Self::DECIMAL_SCALE)).round() as u32;
        Self::new(scaled.max(1), Self::DECIMAL_SCALE)
    }

    pub fn numerator(&self) -> u32 {
        self.numerator
    }

    pub fn denominator(&self) -> u32 {
        self.denominator
    }

    pub fn as_f64(&self) -> f64 {
        f64::from(self.numerator) / f64::from(self.denominator)
    }

    /// `failed / total >= threshold`, evaluated without division. `total` must be non-zero.
    pub fn is_reached(&self, failed: usize, total: usize) -> bool {
        (failed as u128) * u128::from(self.denominator)
            >= u128::from(self.numerator) * (total as u128)
    }
}

impl Default for DomainThreshold {
    fn default() -> Self {
        Self {
            numerator: 1,
            denominator: 2,
        }
    }
}

impl FromStr for DomainThreshold {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.split_once('/') {
            Some((num, den)) => {
                let numerator = num
                    .trim()
                    .parse::<u32>()
                    .with_context(|| format!("invalid threshold numerator in '{}'", trimmed))?;
                let denominator = den
                    .trim()
                    .parse::<u32>()
                    .with_context(|| format!("invalid threshold denominator in '{}'", trimmed))?;
                Self::new(numerator, denominator)
            }
            None => {
                let value = trimmed
                    .parse::<f64>()
                    .with_context(|| format!("invalid threshold '{}'", trimmed))?;
                Self::from_decimal(value)
            }
        }
    }
}

impl TryFrom<ThresholdRepr> for DomainThreshold {
    type Error = anyhow::Error;

    fn try_from(value: ThresholdRepr) -> Result<Self, Self::Error> {
        match value {
            ThresholdRepr::Text(text) => text.parse(),
            ThresholdRepr::Decimal(decimal) => Self::from_decimal(decimal),
        }
    }
}

impl From<DomainThreshold> for String {
    fn from(value: DomainThreshold) -> Self {
        value.to_string()
    }
}

impl fmt::Display for DomainThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        let r = a % b;
        a = b;
        b = r;
    }
    a.max(1)
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DomainConfig {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub threshold: DomainThreshold,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    pub address: IpAddr,
    pub asn: u32,
}

/// Last-known daemon configuration used when a router's routing daemon is restarted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    pub asn: u32,
    pub router_id: Ipv4Addr,
    #[serde(default)]
    pub peers: Vec<PeerConfig>,
    /// Locally originated networks announced by the daemon.
    #[serde(default)]
    pub networks: Vec<String>,
    /// Directory holding the daemon's generated configuration files.
    #[serde(default)]
    pub config_dir: Option<PathBuf>,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Administrative distance of reinstalled fallback routes.
    #[serde(default = "default_fallback_admin_distance")]
    pub fallback_admin_distance: u8,
    /// Distance the routing daemon assigns to its own learned routes.
    #[serde(default = "default_dynamic_admin_distance")]
    pub dynamic_admin_distance: u8,
    #[serde(default = "default_fallback_tag")]
    pub fallback_tag: u32,
    #[serde(default = "default_readiness_timeout", rename = "readiness_timeout_secs")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub readiness_timeout: Duration,
    #[serde(
        default = "default_readiness_poll_interval",
        rename = "readiness_poll_interval_ms"
    )]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub readiness_poll_interval: Duration,
    #[serde(default = "default_restart_attempts")]
    pub restart_attempts: u32,
    #[serde(default = "default_restart_backoff", rename = "restart_backoff_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub restart_backoff: Duration,
    #[serde(
        default = "default_restart_backoff_max",
        rename = "restart_backoff_max_ms"
    )]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub restart_backoff_max: Duration,
    /// Restart the daemon automatically once a router element is marked down.
    #[serde(default = "default_true")]
    pub auto_restart: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            fallback_admin_distance: default_fallback_admin_distance(),
            dynamic_admin_distance: default_dynamic_admin_distance(),
            fallback_tag: default_fallback_tag(),
            readiness_timeout: default_readiness_timeout(),
            readiness_poll_interval: default_readiness_poll_interval(),
            restart_attempts: default_restart_attempts(),
            restart_backoff: default_restart_backoff(),
            restart_backoff_max: default_restart_backoff_max(),
            auto_restart: true,
        }
    }
}

impl RecoveryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.fallback_admin_distance <= self.dynamic_admin_distance {
            bail!(
                "recovery.fallback_admin_distance ({}) must exceed dynamic_admin_distance ({})",
                self.fallback_admin_distance,
                self.dynamic_admin_distance
            );
        }
        if self.restart_attempts == 0 {
            bail!("recovery.restart_attempts must be at least 1");
        }
        if self.readiness_poll_interval.is_zero() {
            bail!("recovery.readiness_poll_interval_ms must be non-zero");
        }
        Ok(())
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Periodic capture cadence; `None` limits capture to degradation events.
    #[serde(default = "default_snapshot_interval", rename = "interval_secs")]
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    pub interval: Option<Duration>,
    #[serde(default = "default_true")]
    pub capture_on_degrade: bool,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            interval: default_snapshot_interval(),
            capture_on_degrade: true,
        }
    }
}

/// Host commands used by the production collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    #[serde(default = "default_ping_command")]
    pub ping: String,
    #[serde(default = "default_vtysh_command")]
    pub vtysh: String,
    #[serde(default = "default_ovs_vsctl_command")]
    pub ovs_vsctl: String,
    #[serde(default = "default_ovs_ofctl_command")]
    pub ovs_ofctl: String,
    #[serde(default = "default_controller_target")]
    pub controller_target: String,
    #[serde(default = "default_frr_dir")]
    pub frr_dir: PathBuf,
    /// Command prefix that enters an element's namespace (e.g. `["mnexec", "-a", "4242"]`).
    #[serde(default)]
    pub exec_prefix: IndexMap<String, Vec<String>>,
    /// Per leaf switch, the OpenFlow port leading to each spine.
    #[serde(default)]
    pub uplinks: IndexMap<String, IndexMap<String, u32>>,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            ping: default_ping_command(),
            vtysh: default_vtysh_command(),
            ovs_vsctl: default_ovs_vsctl_command(),
            ovs_ofctl: default_ovs_ofctl_command(),
            controller_target: default_controller_target(),
            frr_dir: default_frr_dir(),
            exec_prefix: IndexMap::new(),
            uplinks: IndexMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
    /// Write the daily rolling JSON file next to stdout output.
    #[serde(default = "default_true")]
    pub file: bool,
    /// Filter used when neither `FABRIC_LOG` nor `RUST_LOG` is set.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
            file: true,
            filter: default_log_filter(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: default_metrics_listen(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_api_listen")]
    pub listen: SocketAddr,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: default_api_listen(),
        }
    }
}
