//! # Beacon Server
//!
//! Signaling relay and presence server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings (in-memory storage)
//! beacon
//!
//! # Run with custom config
//! beacon --config /path/to/beacon.toml
//!
//! # Share the registration database
//! beacon --db /var/lib/beacon/profiles.db
//!
//! # Run with environment variables
//! BEACON_PORT=8080 BEACON_HOST=0.0.0.0 beacon
//! BEACON__PRESENCE__ONLINE_WINDOW_SECS=60 beacon
//! ```

mod client_addr;
mod config;
mod handlers;
mod metrics;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "beacon")]
#[command(about = "Beacon signaling relay and presence server")]
#[command(version)]
struct Args {
    /// Configuration file, skipping the default search and environment overrides
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Bind address
    #[arg(long)]
    host: Option<String>,

    /// SQLite database path (in-memory storage if not specified)
    #[arg(short, long)]
    db: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "beacon=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => config::Config::from_file(path)?,
        None => config::Config::load()?,
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(db) = args.db {
        config.storage.database = Some(db);
    }

    tracing::info!("Starting Beacon server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
