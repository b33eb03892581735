//! Keel Daemon - declarative deployment orchestrator
//!
//! The keel daemon provides:
//! - A versioned store of declared resources with change feeds
//! - Per-workload reconciliation against a container runtime
//! - Service endpoint discovery and ingress routing
//! - REST API and event streaming for operators

use clap::Parser;
use keel_daemon::{DaemonConfig, DaemonError, DaemonResult, Server};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Keel Daemon CLI
#[derive(Parser)]
#[command(name = "keeld")]
#[command(about = "Keel daemon - declarative deployment orchestrator", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "KEEL_CONFIG")]
    config: Option<String>,

    /// Listen address
    #[arg(short, long, env = "KEEL_LISTEN_ADDR")]
    listen: Option<String>,

    /// Log level
    #[arg(long, env = "KEEL_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "KEEL_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> DaemonResult<()> {
    let cli = Cli::parse();

    // Load configuration, then apply CLI overrides
    let mut config = DaemonConfig::load(cli.config.as_deref())
        .map_err(|e| DaemonError::Config(e.to_string()))?;

    if let Some(listen) = cli.listen {
        config.server.listen_addr = listen
            .parse()
            .map_err(|e| DaemonError::Config(format!("Invalid listen address: {}", e)))?;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if cli.json {
        config.logging.json = true;
    }

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    // Print startup banner
    println!(
        r#"
  _  __ _____ _____ _
 | |/ /| ____| ____| |
 | ' / |  _| |  _| | |
 | . \ | |___| |___| |___
 |_|\_\|_____|_____|_____|

  Declarative deployment orchestrator
  Version: {}
  Listening: {}
"#,
        env!("CARGO_PKG_VERSION"),
        config.server.listen_addr
    );

    // Create and run server
    let server = Server::new(config);
    server.run().await
}
