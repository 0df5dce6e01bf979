//! Egide Server - Main entry point.
//!
//! Wires the core engines together via [`vault::Vault`] and idles until
//! shutdown. This binary has no transport of its own (see the workspace's
//! `Non-goals`) — it exists to prove the engines compose and to give
//! operators a process to run under a supervisor.

mod config;
mod vault;

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::VaultConfig;
use vault::Vault;

#[derive(Parser)]
#[command(name = "egide-server")]
#[command(about = "Nubster Egide - Secrets, KMS, and PKI server")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config/egide.toml")]
    config: String,

    /// Directory holding the vault's on-disk storage.
    #[arg(long, default_value = "data", env = "EGIDE_DATA_DIR")]
    data_dir: PathBuf,

    /// Enable development mode (auto-unseal on first run).
    #[arg(long, env = "EGIDE_DEV_MODE")]
    dev: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    tracing::info!(data_dir = %cli.data_dir.display(), "starting egide server");

    if cli.dev {
        tracing::warn!("development mode enabled - DO NOT USE IN PRODUCTION");
    }

    std::fs::create_dir_all(&cli.data_dir)?;
    let config = VaultConfig::load(&PathBuf::from(&cli.config))?;

    let _vault = Vault::bootstrap(&cli.data_dir, cli.dev, &config).await?;

    tracing::info!("egide server started successfully");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");

    Ok(())
}
