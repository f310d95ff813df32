//! ---
//! fabric_section: "08-binaries"
//! fabric_subsection: "binary"
//! fabric_type: "source"
//! fabric_scope: "code"
//! fabric_description: "Operator CLI talking to a running fabric daemon."
//! fabric_version: "v0.0.0-prealpha"
//! fabric_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use fabric_api::ApiClient;
use fabric_logging as logging;
use fabric_resilience::{ChaosEngine, ChaosScenario};
use tokio::runtime::Runtime;
use tracing::info;

mod render;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Fabric failover operator utility",
    long_about = None
)]
struct Cli {
    #[arg(
        long,
        env = "FABRIC_ENDPOINT",
        default_value = "http://127.0.0.1:8080",
        help = "Admin API of the daemon"
    )]
    endpoint: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Show element health, domain regimes, and router recovery state")]
    Status {
        #[arg(long, help = "Print the raw JSON report")]
        json: bool,
    },
    #[command(about = "Latch a failure on elements until they are recovered")]
    Fail {
        #[arg(required = true, value_name = "ELEMENT")]
        elements: Vec<String>,
    },
    #[command(about = "Clear injected failures and recover router elements")]
    Recover {
        #[arg(required = true, value_name = "ELEMENT")]
        elements: Vec<String>,
    },
    #[command(about = "Stop a router's routing daemon")]
    KillDaemon {
        #[arg(value_name = "ROUTER")]
        router: String,
    },
    #[command(about = "Disconnect switches from their controller")]
    Detach {
        #[arg(required = true, value_name = "SWITCH")]
        switches: Vec<String>,
    },
    #[command(about = "Reconnect switches to their controller")]
    Attach {
        #[arg(required = true, value_name = "SWITCH")]
        switches: Vec<String>,
    },
    #[command(about = "Stop a router's routing daemon, then disconnect switches")]
    FailBoth {
        #[arg(value_name = "ROUTER")]
        router: String,
        #[arg(required = true, value_name = "SWITCH")]
        switches: Vec<String>,
    },
    #[command(about = "Replay a chaos scenario file against the daemon")]
    Scenario {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();
    let client = ApiClient::new(&cli.endpoint)?;
    let runtime = Runtime::new()?;
    runtime.block_on(run(&client, cli.command))
}

async fn run(client: &ApiClient, command: Commands) -> Result<()> {
    match command {
        Commands::Status { json } => {
            let report = client.status().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", render::status(&report));
            }
        }
        Commands::Fail { elements } => {
            let statuses = client.fail(&elements).await?;
            print!("{}", render::injected(&statuses));
        }
        Commands::Recover { elements } => {
            let summary = client.recover(&elements).await?;
            print!("{}", render::recovery(&summary));
        }
        Commands::KillDaemon { router } => {
            client.command(&format!("kill-daemon {router}")).await?;
            println!("{router}: routing daemon stopped");
        }
        Commands::Detach { switches } => {
            client.command(&format!("detach {}", switches.join(" "))).await?;
            println!("{}: detached from controller", switches.join(", "));
        }
        Commands::Attach { switches } => {
            client.command(&format!("attach {}", switches.join(" "))).await?;
            println!("{}: attached to controller", switches.join(", "));
        }
        Commands::FailBoth { router, switches } => {
            client
                .command(&format!("fail-both {router} {}", switches.join(" ")))
                .await?;
            println!(
                "{router}: routing daemon stopped; {}: detached from controller",
                switches.join(", ")
            );
        }
        Commands::Scenario { file } => {
            let scenario = ChaosScenario::from_file(&file)?;
            info!(scenario = %file.display(), actions = scenario.actions.len(), endpoint = client.endpoint(), "replaying chaos scenario");
            let records = ChaosEngine::new(scenario, None).execute(client).await;
            print!("{}", render::chaos(&records));
            let failed = records
                .iter()
                .filter(|record| !record.outcome.is_applied())
                .count();
            if failed > 0 {
                bail!("{failed} of {} scenario actions failed", records.len());
            }
        }
    }
    Ok(())
}
