//! ---
//! fabric_section: "08-binaries"
//! fabric_subsection: "binary"
//! fabric_type: "source"
//! fabric_scope: "code"
//! fabric_description: "Binary entrypoint for the fabric failover daemon."
//! fabric_version: "v0.0.0-prealpha"
//! fabric_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use fabric_adapters::{HostAdapters, ProcessRunner};
use fabric_api::{spawn_api_server, ApiServer, ApiState};
use fabric_common::config::{AppConfig, Mode};
use fabric_common::logging::init_tracing;
use fabric_core::{Collaborators, FabricRuntime};
use fabric_metrics::{new_registry, spawn_http_server, DaemonMetrics, SharedRegistry};
use fabric_testharness::SimulatedFabric;
use tokio::signal;
use tracing::{info, warn};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(
    author,
    version = VERSION,
    about = "Fabric failover daemon",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, value_enum, help = "Override application mode")]
    mode: Option<CliMode>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliMode {
    Production,
    Simulation,
}

impl From<CliMode> for Mode {
    fn from(value: CliMode) -> Self {
        match value {
            CliMode::Production => Mode::Production,
            CliMode::Simulation => Mode::Simulation,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the failover runtime until interrupted")]
    Run,
    #[command(about = "Load and validate the configuration, then exit")]
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/fabric.toml"));
    candidates.push(PathBuf::from("configs/fabric.sim.toml"));

    let load_started = Instant::now();
    let loaded = AppConfig::load_with_source(&candidates)?;
    let mut config = loaded.config;
    if let Some(mode) = cli.mode {
        config.mode = mode.into();
    }
    config.validate()?;
    let load_duration = load_started.elapsed();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::CheckConfig => {
            println!(
                "{}: ok ({} mode, {} elements, {} domains, {} routers)",
                loaded.source.display(),
                config.mode.as_str(),
                config.elements.len(),
                config.domains.len(),
                config.routers.len()
            );
            Ok(())
        }
        Commands::Run => {
            init_tracing("fabricd", &config.logging)?;
            info!(config_path = %loaded.source.display(), mode = config.mode.as_str(), "configuration loaded");

            let registry = new_registry();
            let daemon_metrics = DaemonMetrics::new(registry.clone())?;
            daemon_metrics.observe_config_load(load_duration.as_secs_f64());
            daemon_metrics.inc_start();
            daemon_metrics.set_build_info(VERSION, config.mode.as_str());

            run_daemon(config, registry).await
        }
    }
}

fn collaborators(config: &AppConfig) -> Collaborators {
    match config.mode {
        Mode::Simulation => {
            let sim = SimulatedFabric::from_config(config);
            Collaborators {
                probe: sim.probe,
                daemon: sim.daemon,
                forwarding: sim.forwarding,
            }
        }
        Mode::Production => {
            let host = HostAdapters::from_config(config, Arc::new(ProcessRunner));
            Collaborators {
                probe: host.probe,
                daemon: host.daemon,
                forwarding: host.forwarding,
            }
        }
    }
}

async fn run_daemon(config: AppConfig, registry: SharedRegistry) -> Result<()> {
    let metrics_settings = config.metrics.clone();
    let api_settings = config.api.clone();
    let mode = config.mode;

    let metrics_server = if metrics_settings.enabled {
        info!(address = %metrics_settings.listen, "metrics exporter enabled");
        Some(spawn_http_server(registry.clone(), metrics_settings.listen)?)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    let collaborators = collaborators(&config);
    let runtime = FabricRuntime::new(config, collaborators)
        .with_registry(registry)
        .start()
        .await?;

    let mut api_server: Option<ApiServer> = None;
    if api_settings.enabled {
        let state = Arc::new(ApiState::new(runtime.facade().clone(), mode, VERSION));
        match spawn_api_server(state, api_settings.listen) {
            Ok(server) => api_server = Some(server),
            Err(err) => warn!(error = %err, "failed to start api server"),
        }
    } else {
        info!("api server disabled by configuration");
    }

    info!(mode = mode.as_str(), "daemon running; waiting for termination signal");
    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");

    if let Some(server) = api_server {
        server.shutdown().await?;
    }
    runtime.shutdown().await?;
    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }
    Ok(())
}
