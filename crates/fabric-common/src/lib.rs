//! ---
//! fabric_section: "01-core-functionality"
//! fabric_subsection: "module"
//! fabric_type: "source"
//! fabric_scope: "code"
//! fabric_description: "Shared primitives for the fabric failover runtime."
//! fabric_version: "v0.0.0-prealpha"
//! fabric_owner: "tbd"
//! ---
//! Configuration loading and tracing bootstrap consumed across the workspace.

pub mod config;
pub mod logging;

pub use config::{
    AdapterConfig, ApiConfig, AppConfig, DomainConfig, DomainThreshold, ElementConfig,
    ElementRole, LoadedAppConfig, LoggingConfig, MetricsConfig, Mode, MonitorConfig, PeerConfig,
    RecoveryConfig, RouterConfig, SnapshotConfig,
};
pub use logging::{init_tracing, LogFormat};
