//! Swachh Ledger Daemon
//!
//! ## Usage
//!
//! ```bash
//! # Start with defaults
//! swachh-ledger
//!
//! # Start with custom config
//! swachh-ledger --config /path/to/config.toml
//!
//! # Custom port and storage directory
//! swachh-ledger --http-port 8096 --storage-dir /data/ledger
//!
//! # Enable trusted service callers
//! SWACHH_SERVICE_TOKEN=secret swachh-ledger
//! ```

use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use swachh_ledger::services::events::spawn_logging_listener;
use swachh_ledger::{Config, HttpServer, LedgerDb, Services};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "swachh-ledger")]
#[command(about = "Waste disposal ledger and achievement engine")]
struct Args {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Storage directory
    #[arg(long)]
    storage_dir: Option<PathBuf>,

    /// HTTP API port
    #[arg(long)]
    http_port: Option<u16>,

    /// Bearer token accepted from trusted services
    #[arg(long, env = "SWACHH_SERVICE_TOKEN")]
    service_token: Option<String>,

    /// Do not seed default categories and badges
    #[arg(long)]
    no_seed: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("swachh_ledger=info".parse()?),
        )
        .init();

    let args = Args::parse();

    // Load config
    let mut config = if let Some(config_path) = &args.config {
        Config::load(config_path)
            .with_context(|| format!("Failed to load config {}", config_path.display()))?
    } else {
        Config::default()
    };

    // Apply CLI overrides
    if let Some(dir) = args.storage_dir {
        config.storage_dir = dir;
    }
    if let Some(port) = args.http_port {
        config.http_port = port;
    }
    if args.service_token.is_some() {
        config.service_token = args.service_token;
    }
    if args.no_seed {
        config.seed_defaults = false;
    }

    info!(
        storage_dir = %config.storage_dir.display(),
        http_port = config.http_port,
        "Starting swachh-ledger"
    );

    tokio::fs::create_dir_all(&config.storage_dir).await?;

    // Save default config if it doesn't exist
    let config_path = config.config_path();
    if !config_path.exists() {
        config.save(&config_path)?;
        info!(path = %config_path.display(), "Created default config");
    }

    let db = LedgerDb::open_with_timeout(&config.database_path(), config.busy_timeout())?;
    let services = Arc::new(Services::new(Arc::new(db)));

    if config.seed_defaults {
        let (categories, badges) = services.catalog.seed_defaults()?;
        if categories + badges > 0 {
            info!(categories, badges, "Seeded default catalog");
        }
    }

    let _listener = spawn_logging_listener(Arc::clone(&services.events));

    let http_addr: SocketAddr = format!("{}:{}", config.bind_address, config.http_port)
        .parse()
        .context("Invalid bind address")?;
    if config.service_token.is_none() {
        info!("No service token configured; only end-user callers are accepted");
    }
    let server = Arc::new(
        HttpServer::new(Arc::clone(&services), http_addr)
            .with_service_token(config.service_token.clone()),
    );

    info!("HTTP API available at http://{}", http_addr);
    info!("  POST /disposals                 - Record a disposal");
    info!("  GET  /users/{{id}}/profile        - Profile and level");
    info!("  GET  /users/{{id}}/badges         - Achievements");
    info!("  POST /users/{{id}}/reconcile      - Recompute totals");
    info!("  GET  /leaderboard               - Leaderboard");

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server failed");
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    match services.db.stats() {
        Ok(stats) => info!(
            users = stats.users,
            disposals = stats.disposals,
            badges_awarded = stats.badges_awarded,
            "Final ledger stats"
        ),
        Err(e) => error!(error = %e, "Failed to read final stats"),
    }

    Ok(())
}
