//! Barcast Command-Line Relay
//!
//! `barcast start` loads the configuration and streams normalized bars from
//! every configured platform to the broker until the lifetime elapses or
//! Ctrl+C arrives.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures_util::future::join_all;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::EnvFilter;

use barcast_core::broker::{BarBus, RedisBus};
use barcast_core::config::{Config, DEFAULT_CONFIG};
use barcast_core::exchanges::BinanceConnector;
use barcast_core::session::SessionSupervisor;

#[derive(Parser)]
#[command(name = "barcast", version, about = "Streams exchange candlesticks onto a redis bus")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the version and exit
    Version,
    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Stream bars from every configured platform
    Start {
        /// Configuration file to use instead of the default location
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Write the default configuration file, replacing any existing one
    Generate,
    /// Print the configuration file path
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Config { command } => match command {
            ConfigCommands::Generate => {
                let path = Config::default_path()?;
                write_default_config(&path)?;
                println!("Generated default configuration: {}", path.display());
                Ok(())
            }
            ConfigCommands::Path => {
                println!("{}", Config::default_path()?.display());
                Ok(())
            }
        },
        Commands::Start { config } => start(config).await,
    }
}

fn write_default_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("could not create {}", parent.display()))?;
    }
    std::fs::write(path, DEFAULT_CONFIG)
        .with_context(|| format!("could not write {}", path.display()))?;
    Ok(())
}

async fn start(config_path: Option<PathBuf>) -> Result<()> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };
    let config = Config::load(&path)
        .with_context(|| format!("invalid configuration at {}", path.display()))?;

    println!("Streaming prices to {}...", config.broker_url);

    let bus: Arc<dyn BarBus> = Arc::new(RedisBus::connect(&config.broker_url).await?);
    let connector = Arc::new(BinanceConnector::new());

    let (shutdown, _receiver) = broadcast::channel(1);

    // sessions subscribe to the shutdown channel at creation, before the
    // signal task exists
    let mut sessions = Vec::with_capacity(config.platforms.len());
    for platform in &config.platforms {
        let supervisor = SessionSupervisor::from_config(
            platform,
            &config.pairs,
            Arc::clone(&connector),
            Arc::clone(&bus),
        );
        sessions.push(supervisor.run(shutdown.clone()));
    }

    let ctrl_c_shutdown = shutdown;
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received...");
            let _ = ctrl_c_shutdown.send(());
        }
    });

    let mut failures = 0;
    for report in join_all(sessions).await {
        failures += report.failures();
    }
    if failures > 0 {
        bail!("{} relay session(s) failed", failures);
    }
    Ok(())
}
