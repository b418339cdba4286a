//! `gistsync watch`: run the sync engine until interrupted.

use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use gistsync_core::{GistsSync, SyncOptions, SyncState};

use crate::config::Config;
use crate::db::SqliteCache;

#[derive(Debug, Args)]
pub struct WatchCommand {
    /// Directory to mirror (defaults to the configured directory)
    pub directory: Option<PathBuf>,

    /// Seconds between remote refreshes; 0 disables polling
    #[arg(long, value_name = "SECS")]
    pub poll_interval: Option<u64>,

    /// Load remote state and poll without watching the directory
    #[arg(long)]
    pub no_watch: bool,
}

impl WatchCommand {
    pub async fn run(
        &self,
        cache: Arc<SqliteCache>,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let options = self.sync_options(cache, config)?;
        let directory = self
            .directory
            .clone()
            .unwrap_or_else(|| config.directory.value.clone());

        if !directory.is_dir() {
            return Err(format!("Not a directory: {}", directory.display()).into());
        }

        let sync = GistsSync::new(&directory, options)?;
        let mut errors = sync.subscribe();

        sync.initialize().await;
        if sync.state() != SyncState::Ready {
            return match errors.try_recv() {
                Ok(err) => Err(err.into()),
                Err(_) => Err("Failed to initialize gist sync".into()),
            };
        }

        println!(
            "Syncing {} ({} gists). Press Ctrl-C to stop.",
            sync.pattern().display(),
            sync.index().len()
        );

        let mut error_count = 0usize;
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                received = errors.recv() => match received {
                    // Already logged by the engine.
                    Ok(_) => error_count += 1,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Error channel lagged");
                        error_count += skipped as usize;
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }

        info!("Shutting down");
        sync.shutdown().await;

        if error_count > 0 {
            println!("Stopped with {} sync error(s); see the log for details.", error_count);
        } else {
            println!("Stopped.");
        }
        Ok(())
    }

    fn sync_options(
        &self,
        cache: Arc<SqliteCache>,
        config: &Config,
    ) -> Result<SyncOptions, Box<dyn std::error::Error>> {
        let token = config.require_token()?;
        let poll_secs = self
            .poll_interval
            .unwrap_or(config.poll_interval_secs.value);

        let mut options = SyncOptions::new(cache, token)
            .with_poll_interval(Duration::from_secs(poll_secs))
            .with_watching(config.watch.value && !self.no_watch)
            .with_serialized_cache_writes(config.serialize_cache_writes.value);
        if let Some(url) = &config.api_url {
            options = options.with_api_base_url(url.value.clone());
        }
        Ok(options)
    }
}
