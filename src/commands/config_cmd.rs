use clap::{Args, Subcommand, ValueEnum};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::{Config, ConfigValue};

#[derive(Debug, Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigSubcommand {
    /// Show current configuration values
    Show {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Initialize configuration file
    Init,
}

const DEFAULT_CONFIG: &str = r#"# gistsync configuration

# Directory mirrored to your gists (one gist per file)
directory: .

# Path to the SQLite cache (default: platform data dir, gistsync/cache.db)
# database_path: ~/.local/share/gistsync/cache.db

# Seconds between refreshes of the remote gist list (0 disables polling)
poll_interval_secs: 0

# Watch the directory for changes
watch: true

# Apply cache updates one at a time
serialize_cache_writes: false

# GitHub token with the gist scope (or set GISTSYNC_TOKEN / GITHUB_TOKEN)
# token: ghp_...

# API root for GitHub Enterprise
# api_url: https://github.example.com/api/v3
"#;

impl ConfigCommand {
    pub fn run(
        &self,
        config: &Config,
        cli_config_path: Option<PathBuf>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ConfigSubcommand::Show { format } => {
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(config)?);
                    }
                    OutputFormat::Text => print_text(config),
                }
                Ok(())
            }

            ConfigSubcommand::Init => {
                let config_path = cli_config_path.unwrap_or_else(Config::default_config_path);
                init_config_file(&config_path)
            }
        }
    }
}

fn print_text(config: &Config) {
    println!("Configuration");
    println!("=============\n");

    if let Some(path) = &config.config_file {
        println!("Config file: {}", path.display());
    } else {
        println!(
            "Config file: {} (not found)",
            Config::default_config_path().display()
        );
    }
    println!();

    print_value("directory", &config.directory.value.display(), config.directory.source.to_string());
    print_value(
        "database_path",
        &config.database_path.value.display(),
        config.database_path.source.to_string(),
    );
    print_value(
        "poll_interval_secs",
        &config.poll_interval_secs.value,
        config.poll_interval_secs.source.to_string(),
    );
    print_value("watch", &config.watch.value, config.watch.source.to_string());
    print_value(
        "serialize_cache_writes",
        &config.serialize_cache_writes.value,
        config.serialize_cache_writes.source.to_string(),
    );
    print_optional("token", config.token.as_ref().map(|t| masked(t)));
    print_optional("api_url", config.api_url.clone());
}

fn print_value(name: &str, value: &dyn std::fmt::Display, source: String) {
    println!("{}: {}", name, value);
    println!("  source: {}", source);
    println!();
}

fn print_optional(name: &str, value: Option<ConfigValue<String>>) {
    match value {
        Some(v) => print_value(name, &v.value, v.source.to_string()),
        None => {
            println!("{}: (not set)", name);
            println!();
        }
    }
}

/// Keeps the last four characters of a token.
fn masked(token: &ConfigValue<String>) -> ConfigValue<String> {
    let visible: String = token
        .value
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    ConfigValue::new(format!("****{}", visible), token.source.clone())
}

fn init_config_file(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    if config_path.exists() {
        println!("Config file already exists: {}", config_path.display());
        println!("Use 'gistsync config show' to view current configuration.");
        return Ok(());
    }

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut file = fs::File::create(config_path)?;
    file.write_all(DEFAULT_CONFIG.as_bytes())?;

    println!("Created config file: {}", config_path.display());
    println!("\nEdit this file to customize your settings.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigSource;
    use tempfile::tempdir;

    #[test]
    fn test_masked_token() {
        let token = ConfigValue::new("ghp_abcdef1234".to_string(), ConfigSource::File);
        let shown = masked(&token);
        assert_eq!(shown.value, "****1234");
        assert_eq!(shown.source, ConfigSource::File);
    }

    #[test]
    fn test_init_writes_loadable_config() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("gistsync").join("config.yaml");

        init_config_file(&config_path).unwrap();

        let config = Config::load(Some(config_path.clone())).unwrap();
        assert_eq!(config.config_file, Some(config_path));
        assert_eq!(config.directory.source, ConfigSource::File);
        assert!(config.watch.value);
    }

    #[test]
    fn test_init_keeps_existing_file() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(&config_path, "watch: false\n").unwrap();

        init_config_file(&config_path).unwrap();

        assert_eq!(fs::read_to_string(&config_path).unwrap(), "watch: false\n");
    }
}
