//! keel CLI - operator interface for the keel daemon
//!
//! Talks to `keeld` over its REST API to:
//! - Apply and inspect declarative manifests
//! - Scale workloads and watch reconciliation state
//! - Resolve ingress routes and forward local ports to services
//! - Stream control-plane events

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod client;
mod commands;
mod error;
mod output;

use commands::{apply, delete, events, get, port_forward, route, scale};
use error::CliResult;

/// keel CLI application
#[derive(Parser)]
#[command(name = "keel")]
#[command(about = "keel - declarative deployment orchestrator CLI", long_about = None)]
#[command(version)]
struct Cli {
    /// Keel daemon endpoint
    #[arg(
        short,
        long,
        env = "KEEL_ENDPOINT",
        default_value = "http://127.0.0.1:7300"
    )]
    endpoint: String,

    /// Output format (table, json, yaml)
    #[arg(short, long, default_value = "table")]
    output: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Apply a manifest of resource documents
    Apply {
        /// Manifest path, or `-` for stdin
        #[arg(short, long)]
        file: String,
    },

    /// List or get resources and reconciliation state
    Get {
        /// What to get (secrets, configmaps, workloads, services,
        /// ingressrules, instances, endpoints)
        kind: String,

        /// Resource name (omit to list)
        name: Option<String>,

        /// Filter instances by owning workload
        #[arg(short, long)]
        workload: Option<String>,
    },

    /// Delete a resource
    Delete {
        /// Resource kind
        kind: String,

        /// Resource name
        name: String,

        /// Skip confirmation
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Scale a workload
    Scale {
        /// Workload name
        workload: String,

        /// Target replica count
        #[arg(short, long)]
        replicas: u32,

        /// Fail if the workload generation moved past this value
        #[arg(long)]
        expected_generation: Option<u64>,
    },

    /// Resolve an ingress route to a service and endpoint
    Route {
        /// Request host
        host: String,

        /// Request path
        path: String,
    },

    /// Stream control-plane events
    Events {
        /// Only show events from one component (store, reconciler,
        /// registry, ingress, api)
        #[arg(short = 'S', long)]
        source: Option<String>,
    },

    /// Pause reconciliation
    Pause,

    /// Resume reconciliation
    Resume,

    /// Forward a local port to a service
    PortForward {
        /// Service name
        service: String,

        /// Local port to listen on
        local_port: u16,
    },

    /// Check daemon connectivity
    Status,
}

#[tokio::main]
async fn main() -> CliResult<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().without_time())
        .init();

    let client = client::KeelClient::new(&cli.endpoint)?;

    match cli.command {
        Commands::Apply { file } => apply::execute(&file, &client).await,

        Commands::Get {
            kind,
            name,
            workload,
        } => {
            get::execute(
                &kind,
                name.as_deref(),
                workload.as_deref(),
                &client,
                cli.output,
            )
            .await
        }

        Commands::Delete { kind, name, yes } => delete::execute(&kind, &name, yes, &client).await,

        Commands::Scale {
            workload,
            replicas,
            expected_generation,
        } => scale::execute(&workload, replicas, expected_generation, &client).await,

        Commands::Route { host, path } => route::execute(&host, &path, &client, cli.output).await,

        Commands::Events { source } => events::execute(source.as_deref(), &client).await,

        Commands::Pause => {
            let status = client.pause().await?;
            output::print_success("Reconciliation paused");
            if status.halted {
                output::print_warning("Reconciler is halted; resume will not recover it");
            }
            Ok(())
        }

        Commands::Resume => {
            let status = client.resume().await?;
            output::print_success("Reconciliation resumed");
            if status.halted {
                output::print_warning("Reconciler is halted; restart the daemon to recover");
            }
            Ok(())
        }

        Commands::PortForward {
            service,
            local_port,
        } => port_forward::execute(&service, local_port, &client).await,

        Commands::Status => match client.daemon_status().await {
            Ok(status) => {
                if status.halted {
                    println!("⚠ keel daemon is up, but the reconciler is halted");
                } else {
                    println!("✓ keel daemon is healthy");
                }
                println!("  Version: {}", status.version);
                println!("  Uptime: {}", status.uptime);
                println!(
                    "  Workloads: {} ({} steady, {} degraded)",
                    status.stats.workloads,
                    status.stats.steady_workloads,
                    status.stats.degraded_workloads
                );
                println!(
                    "  Instances: {} ({} ready)",
                    status.stats.instances, status.stats.ready_instances
                );
                println!(
                    "  Services: {}  Ingress rules: {}",
                    status.stats.services, status.stats.ingress_rules
                );
                if status.paused {
                    println!("  Reconciliation is paused");
                }
                Ok(())
            }
            Err(e) => {
                eprintln!("✗ Cannot connect to keel daemon: {}", e);
                std::process::exit(1);
            }
        },
    }
}
