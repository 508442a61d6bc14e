//! rackd daemon - Main entry point
//!
//! Scans local hardware on a fixed rate, registers this host as a rack with the
//! cluster and serves a status API.

mod api;
mod config;
mod server;
mod state;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "rackd")]
#[command(about = "Hardware discovery and rack registration daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "rackd.toml")]
    config: PathBuf,

    /// Bind address for the status API
    #[arg(short, long)]
    bind: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Run a single scan and exit
    #[arg(long)]
    scan_once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("rackd v{}", env!("CARGO_PKG_VERSION"));

    let mut config = config::load_config(&args.config)?;
    if let Some(bind) = args.bind {
        config.daemon.bind = bind;
    }

    info!(
        cluster = %config.cluster.base_url(),
        scan_rate_hz = config.daemon.scan_rate_hz,
        simulated = config.simulated_devices.len(),
        "Configuration loaded"
    );

    let state = state::AppState::new(config.clone())?;

    if args.scan_once {
        info!("Running single hardware scan");
        let scanned = state.scan().await;
        state.shutdown().await;
        let devices = scanned?;
        println!("Discovered {} devices:", devices.len());
        for device in devices {
            println!("  - {} ({}) {} {}", device.name, device.key, device.make, device.model);
            if device.has_parent() {
                println!("    Parent: {}", device.parent_device);
            }
            if !device.resource_name.is_empty() {
                println!("    Resource: {}", device.resource_name);
            }
        }
    } else {
        server::run(state, &config.daemon.bind).await?;
    }

    Ok(())
}
