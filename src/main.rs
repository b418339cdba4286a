use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;
mod db;

use commands::{CacheCommand, ConfigCommand, StatusCommand, WatchCommand};
use config::Config;
use db::{init_db, SqliteCache};

#[derive(Parser)]
#[command(name = "gistsync")]
#[command(version)]
#[command(about = "Keep a local directory mirrored to GitHub Gists", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync a directory with your gists until interrupted
    Watch(WatchCommand),

    /// Show the authenticated user and synced gists
    Status(StatusCommand),

    /// Manage the local cache
    Cache(CacheCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gistsync=info,gistsync_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Save config path for init command
    let cli_config_path = cli.config.clone();

    let config = Config::load(cli.config)?;

    match cli.command {
        Some(Commands::Watch(cmd)) => {
            let cache = open_cache(&config).await?;
            cmd.run(cache, &config).await?;
        }
        Some(Commands::Status(cmd)) => {
            let cache = open_cache(&config).await?;
            cmd.run(cache, &config).await?;
        }
        Some(Commands::Cache(cmd)) => {
            let cache = open_cache(&config).await?;
            cmd.run(&cache, &config).await?;
        }
        Some(Commands::Config(cmd)) => {
            cmd.run(&config, cli_config_path)?;
        }
        None => {
            println!("Use --help to see available commands");
        }
    }

    Ok(())
}

async fn open_cache(config: &Config) -> Result<Arc<SqliteCache>, Box<dyn std::error::Error>> {
    let pool = init_db(&config.database_path.value).await?;
    tracing::debug!(path = %config.database_path.value.display(), "Opened cache database");
    Ok(Arc::new(SqliteCache::new(pool)))
}
