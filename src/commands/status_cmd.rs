use clap::Args;
use serde::Serialize;
use std::sync::Arc;

use gistsync_core::{FilenameIndex, GistsSync, SyncOptions};

use super::config_cmd::OutputFormat;
use crate::config::Config;
use crate::db::SqliteCache;

#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output format
    #[arg(long, short, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Debug, Serialize)]
struct StatusReport {
    login: String,
    directory: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_updated_at: Option<String>,
    cache_entries: i64,
    gists: Vec<GistEntry>,
}

#[derive(Debug, Serialize)]
struct GistEntry {
    filename: String,
    id: Option<String>,
}

impl StatusCommand {
    pub async fn run(
        &self,
        cache: Arc<SqliteCache>,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let token = config.require_token()?;
        let mut options = SyncOptions::new(cache.clone(), token);
        if let Some(url) = &config.api_url {
            options = options.with_api_base_url(url.value.clone());
        }

        // Neither watches nor polls; only reads through the cache.
        let sync = GistsSync::new(&config.directory.value, options)?;
        let user = sync.get_user().await?;
        let gists = sync.get_all_gist().await?;
        let index = FilenameIndex::build(&gists);

        let cache_updated_at = cache
            .updated_at(&format!("{}{}", user.login, gistsync_core::sync::GISTS_KEY_SUFFIX))
            .await?
            .map(|t| t.to_rfc3339());

        let report = StatusReport {
            login: user.login,
            directory: sync.pattern().display().to_string(),
            cache_updated_at,
            cache_entries: cache.count().await?,
            gists: index
                .filenames()
                .into_iter()
                .map(|filename| GistEntry {
                    filename: filename.to_string(),
                    id: index.get(filename).and_then(|g| g.id.clone()),
                })
                .collect(),
        };

        match self.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            OutputFormat::Text => print_text(&report),
        }
        Ok(())
    }
}

fn print_text(report: &StatusReport) {
    println!("Gist Sync Status");
    println!("================\n");
    println!("User:      {}", report.login);
    println!("Directory: {}", report.directory);
    if let Some(at) = &report.cache_updated_at {
        println!("Cached:    {} ({} entries)", at, report.cache_entries);
    }
    println!();

    if report.gists.is_empty() {
        println!("No gists found.");
        return;
    }

    println!("{} gist(s):", report.gists.len());
    for entry in &report.gists {
        println!(
            "  {}  {}",
            entry.id.as_deref().unwrap_or("(no id)"),
            entry.filename
        );
    }
}
