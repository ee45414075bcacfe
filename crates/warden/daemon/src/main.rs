//! Warden Daemon - autonomous incident recovery for device fleets
//!
//! The daemon provides:
//! - REST API for telemetry ingestion
//! - Detection, diagnosis and remediation of device incidents
//! - Escalation to operators when automation gives up
//! - Learned recovery patterns persisted across restarts

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use warden_daemon::{DaemonConfig, DaemonError, DaemonResult, Server};

/// Warden Daemon CLI
#[derive(Parser)]
#[command(name = "wardend")]
#[command(about = "Warden Daemon - Fleet incident detection and recovery", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "WARDEN_CONFIG")]
    config: Option<String>,

    /// Listen address
    #[arg(
        short,
        long,
        env = "WARDEN_LISTEN_ADDR",
        default_value = "127.0.0.1:8080"
    )]
    listen: String,

    /// Log level
    #[arg(long, env = "WARDEN_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Enable JSON logging
    #[arg(long, env = "WARDEN_LOG_JSON")]
    json: bool,

    /// Maximum recovery attempts per incident
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Minimum success rate for reusing a learned pattern
    #[arg(long)]
    pattern_confidence_floor: Option<f64>,

    /// Minimum diagnosis confidence for a targeted plan
    #[arg(long)]
    min_confidence_threshold: Option<f64>,

    /// Seconds allowed for health to return after a plan
    #[arg(long)]
    verification_timeout_sec: Option<u64>,

    /// Seconds allowed for a single action
    #[arg(long)]
    action_timeout_sec: Option<u64>,
}

impl Cli {
    fn apply(&self, config: &mut DaemonConfig) -> DaemonResult<()> {
        config.server.listen_addr = self
            .listen
            .parse()
            .map_err(|e| DaemonError::Config(format!("Invalid listen address: {}", e)))?;

        let recovery = &mut config.recovery;
        if let Some(n) = self.max_attempts {
            recovery.max_attempts = n;
        }
        if let Some(floor) = self.pattern_confidence_floor {
            recovery.pattern_confidence_floor = floor;
        }
        if let Some(threshold) = self.min_confidence_threshold {
            recovery.min_confidence_threshold = threshold;
        }
        if let Some(secs) = self.verification_timeout_sec {
            recovery.verification_timeout = std::time::Duration::from_secs(secs);
        }
        if let Some(secs) = self.action_timeout_sec {
            recovery.action_timeout = std::time::Duration::from_secs(secs);
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> DaemonResult<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| cli.log_level.clone().into());

    if cli.json {
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

    // Load configuration
    let mut config = DaemonConfig::load(cli.config.as_deref())?;

    // Override with CLI args
    cli.apply(&mut config)?;

    // Print startup banner
    println!(
        r#"
 __        __            _
 \ \      / /_ _ _ __ __| | ___ _ __
  \ \ /\ / / _` | '__/ _` |/ _ \ '_ \
   \ V  V / (_| | | | (_| |  __/ | | |
    \_/\_/ \__,_|_|  \__,_|\___|_| |_|

  Fleet Incident Recovery
  Version: {}
  Actions: {}
  Listening: {}
"#,
        env!("CARGO_PKG_VERSION"),
        if config.capability.action_webhook.is_some() {
            "webhook"
        } else {
            "dry run"
        },
        config.server.listen_addr
    );

    // Create and run server
    let server = Server::new(config)?;
    server.run().await
}
