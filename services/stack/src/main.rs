//! Stack CLI
//!
//! Evaluates the Eneftea deployment against a network inventory and prints
//! the result as JSON.
//!
//! ## Usage
//!
//! ```bash
//! # Render the template
//! stack --config stack.json --inventory inventory.json plan
//!
//! # Show creation waves
//! stack --inventory inventory.json order
//!
//! # Walk the graph against the recording engine, failing one resource
//! stack --inventory inventory.json apply --fail-on eneftea-lb
//!
//! # Where does a request end up?
//! stack --inventory inventory.json route /api/health
//! stack --inventory inventory.json rewrite /nft-media/token/1.json
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use eneftea_infra::engine::apply;
use eneftea_infra::load_balancer::ListenerProtocol;
use eneftea_infra::{Deployment, RecordingEngine, StackConfig, StackTemplate, StaticInventory};

/// Eneftea stack - evaluate and inspect the deployment graph
#[derive(Parser, Debug)]
#[command(name = "stack", version, about)]
struct Cli {
    /// Flat JSON configuration file; environment variables override it
    #[arg(long, env = "STACK_CONFIG")]
    config: Option<PathBuf>,

    /// Network inventory snapshot (VPCs, subnets, security groups, zones)
    #[arg(long, env = "STACK_INVENTORY")]
    inventory: PathBuf,

    /// Debug logging
    #[arg(long, short, default_value = "false")]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the rendered template
    Plan,

    /// Print the creation waves
    Order,

    /// Apply against the recording engine and print the report
    Apply {
        /// Resources the engine should reject
        #[arg(long)]
        fail_on: Vec<String>,
    },

    /// Route a request through the load balancer listeners
    Route {
        path: String,

        /// Host header, defaults to the API domain
        #[arg(long)]
        host: Option<String>,

        /// Use the plain HTTP listener
        #[arg(long, default_value = "false")]
        http: bool,
    },

    /// Show what the CDN origin receives for a viewer path
    Rewrite { path: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    FmtSubscriber::builder()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .with_target(false)
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = load_config(&cli)?;
    let inventory = StaticInventory::from_file(&cli.inventory)
        .with_context(|| format!("Failed to load inventory {}", cli.inventory.display()))?;

    let deployment = Deployment::compose(&config, &inventory)
        .await
        .context("Failed to evaluate deployment")?;

    match cli.command {
        Command::Plan => {
            let template = StackTemplate::render(
                &deployment.graph,
                "Eneftea API, load balancer and content distribution",
                &deployment.exports(),
            )?;
            println!("{}", template.to_json_pretty()?);
        }
        Command::Order => {
            let waves: Vec<Vec<&str>> = deployment
                .graph
                .waves()?
                .into_iter()
                .map(|wave| wave.into_iter().map(|d| d.name.as_str()).collect())
                .collect();
            print_json(&json!({ "resources": deployment.graph.len(), "waves": waves }))?;
        }
        Command::Apply { fail_on } => {
            let mut engine = RecordingEngine::new();
            for name in &fail_on {
                if !deployment.graph.contains(name) {
                    bail!("Unknown resource {}", name);
                }
                engine = engine.fail_on(name, "rejected by request");
            }

            let report = apply(&deployment.graph, &engine).await?;
            print_json(&report)?;
            if !report.is_success() {
                for err in report.errors() {
                    info!(error = %err, "Resource not created");
                }
                bail!("{} of {} resources not created", report.errors().len(), report.outcomes.len());
            }
        }
        Command::Route { path, host, http } => {
            let protocol = if http {
                ListenerProtocol::Http
            } else {
                ListenerProtocol::Https
            };
            let host = host.unwrap_or_else(|| deployment.load_balancer.alias.name.clone());
            let outcome = deployment
                .load_balancer
                .routing
                .listener(protocol)
                .handle(&host, &path);
            print_json(&outcome)?;
        }
        Command::Rewrite { path } => {
            print_json(&deployment.cdn.behaviors.origin_request(&path))?;
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<StackConfig> {
    let env = StackConfig::from_env();
    match &cli.config {
        Some(path) => Ok(StackConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?
            .merge(env)),
        None => Ok(env),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
