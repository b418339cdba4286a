use clap::{Args, Subcommand};

use gistsync_core::sync::GISTS_KEY_SUFFIX;
use gistsync_core::{CacheStore, UserProfile};

use crate::config::Config;
use crate::db::SqliteCache;

#[derive(Debug, Args)]
pub struct CacheCommand {
    #[command(subcommand)]
    pub command: CacheSubcommand,
}

#[derive(Debug, Subcommand)]
pub enum CacheSubcommand {
    /// Drop the cached user profile and gist collection
    Clear,
}

impl CacheCommand {
    pub async fn run(
        &self,
        cache: &SqliteCache,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            CacheSubcommand::Clear => {
                let token = config.require_token()?;
                let cleared = clear_user_entries(cache, token).await?;
                if cleared.is_empty() {
                    println!("Cache is already empty.");
                } else {
                    println!("Cleared {} cache entr{}.", cleared.len(), plural_y(cleared.len()));
                }
                Ok(())
            }
        }
    }
}

/// Clears the user profile stored under `token` and that user's gist
/// collection. Returns the keys that held a value.
pub async fn clear_user_entries(
    cache: &SqliteCache,
    token: &str,
) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    let mut cleared = Vec::new();

    if let Some(value) = cache.get(token).await? {
        if let Ok(user) = serde_json::from_value::<UserProfile>(value) {
            let key = format!("{}{}", user.login, GISTS_KEY_SUFFIX);
            if cache.get(&key).await?.is_some() {
                cache.clear(&key).await?;
                cleared.push(key);
            }
        }
        cache.clear(token).await?;
        cleared.push("user".to_string());
    }

    Ok(cleared)
}

fn plural_y(count: usize) -> &'static str {
    if count == 1 {
        "y"
    } else {
        "ies"
    }
}
