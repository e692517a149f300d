//! approvald - Approval workflow daemon
//!
//! Loads workflow templates and runs the SLA monitor that classifies open
//! approvals and escalates breached ones.

use approval_daemon::{Daemon, DaemonConfig, DaemonError, DaemonResult};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Approval daemon CLI
#[derive(Parser)]
#[command(name = "approvald")]
#[command(about = "Approval workflow daemon - template routing and SLA escalation", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "APPROVAL_CONFIG")]
    config: Option<String>,

    /// Template file, overrides the configured one
    #[arg(short, long, env = "APPROVAL_TEMPLATES")]
    templates: Option<String>,

    /// Log level
    #[arg(long, env = "APPROVAL_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "APPROVAL_LOG_JSON")]
    json: bool,

    /// Run one SLA sweep and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> DaemonResult<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = DaemonConfig::load(cli.config.as_deref())
        .map_err(|e| DaemonError::Config(e.to_string()))?;

    // Override with CLI args
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if cli.json {
        config.logging.json = true;
    }
    if let Some(path) = cli.templates {
        config.templates.path = Some(path);
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

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting approvald");

    let daemon = Daemon::new(config);
    daemon.load_templates().await?;

    if cli.once {
        let report = daemon.sweep_once().await?;
        tracing::info!(
            scanned = report.scanned,
            on_time = report.on_time,
            at_risk = report.at_risk,
            breached = report.breached,
            escalated = report.escalated,
            failed = report.failed,
            configuration_errors = report.configuration_errors.len(),
            "Single sweep complete"
        );
        return Ok(());
    }

    daemon.run().await
}
