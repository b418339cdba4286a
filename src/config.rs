use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Source of a configuration value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Default,
    File,
    Environment,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::File => write!(f, "file"),
            ConfigSource::Environment => write!(f, "environment"),
        }
    }
}

/// A configuration value with its source
#[derive(Debug, Clone, Serialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }
}

/// Application configuration with source tracking
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Directory mirrored to gists
    pub directory: ConfigValue<PathBuf>,
    /// Path to the SQLite cache database
    pub database_path: ConfigValue<PathBuf>,
    /// Seconds between remote refreshes; 0 disables polling
    pub poll_interval_secs: ConfigValue<u64>,
    /// Watch the directory for changes
    pub watch: ConfigValue<bool>,
    /// Serialize cache updates per key
    pub serialize_cache_writes: ConfigValue<bool>,
    /// GitHub access token
    #[serde(skip_serializing)]
    pub token: Option<ConfigValue<String>>,
    /// Gists API root, api.github.com when unset
    pub api_url: Option<ConfigValue<String>>,
    /// Config file path used (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
}

/// Internal struct for deserializing config file
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
    directory: Option<PathBuf>,
    database_path: Option<PathBuf>,
    poll_interval_secs: Option<u64>,
    watch: Option<bool>,
    serialize_cache_writes: Option<bool>,
    token: Option<String>,
    api_url: Option<String>,
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut directory = ConfigValue::new(PathBuf::from("."), ConfigSource::Default);
        let mut database_path = ConfigValue::new(
            Self::default_data_dir().join("cache.db"),
            ConfigSource::Default,
        );
        let mut poll_interval_secs = ConfigValue::new(0, ConfigSource::Default);
        let mut watch = ConfigValue::new(true, ConfigSource::Default);
        let mut serialize_cache_writes = ConfigValue::new(false, ConfigSource::Default);
        let mut token = None;
        let mut api_url = None;
        let mut config_file = None;

        // Try to load from config file
        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            let file_config: ConfigFile = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;

            config_file = Some(path.clone());

            if let Some(dir) = file_config.directory {
                directory = ConfigValue::new(resolve_against(&path, dir), ConfigSource::File);
            }
            if let Some(db_path) = file_config.database_path {
                database_path = ConfigValue::new(resolve_against(&path, db_path), ConfigSource::File);
            }
            if let Some(secs) = file_config.poll_interval_secs {
                poll_interval_secs = ConfigValue::new(secs, ConfigSource::File);
            }
            if let Some(enabled) = file_config.watch {
                watch = ConfigValue::new(enabled, ConfigSource::File);
            }
            if let Some(enabled) = file_config.serialize_cache_writes {
                serialize_cache_writes = ConfigValue::new(enabled, ConfigSource::File);
            }
            if let Some(value) = file_config.token {
                token = Some(ConfigValue::new(value, ConfigSource::File));
            }
            if let Some(url) = file_config.api_url {
                api_url = Some(ConfigValue::new(url, ConfigSource::File));
            }
        }

        // Apply environment variable overrides
        if let Ok(dir) = std::env::var("GISTSYNC_DIRECTORY") {
            directory = ConfigValue::new(PathBuf::from(dir), ConfigSource::Environment);
        }
        if let Ok(db_path) = std::env::var("GISTSYNC_DATABASE_PATH") {
            database_path = ConfigValue::new(PathBuf::from(db_path), ConfigSource::Environment);
        }
        if let Ok(secs) = std::env::var("GISTSYNC_POLL_INTERVAL") {
            let secs = secs
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue("GISTSYNC_POLL_INTERVAL", secs.clone()))?;
            poll_interval_secs = ConfigValue::new(secs, ConfigSource::Environment);
        }
        if let Some(value) = ["GISTSYNC_TOKEN", "GITHUB_TOKEN"]
            .iter()
            .find_map(|name| std::env::var(name).ok().filter(|v| !v.is_empty()))
        {
            token = Some(ConfigValue::new(value, ConfigSource::Environment));
        }
        if let Ok(url) = std::env::var("GISTSYNC_API_URL") {
            api_url = Some(ConfigValue::new(url, ConfigSource::Environment));
        }

        Ok(Self {
            directory,
            database_path,
            poll_interval_secs,
            watch,
            serialize_cache_writes,
            token,
            api_url,
            config_file,
        })
    }

    /// Returns the token or an error telling the user where to set one.
    pub fn require_token(&self) -> Result<&str, ConfigError> {
        self.token
            .as_ref()
            .map(|t| t.value.as_str())
            .ok_or(ConfigError::MissingToken)
    }

    /// Default config directory (platform-specific):
    /// - Linux: ~/.config/gistsync/
    /// - macOS: ~/Library/Application Support/gistsync/
    /// - Windows: %APPDATA%/gistsync/
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("gistsync")
    }

    /// Default data directory (platform-specific):
    /// - Linux: ~/.local/share/gistsync/
    /// - macOS: ~/Library/Application Support/gistsync/
    /// - Windows: %APPDATA%/gistsync/
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("gistsync")
    }

    /// Default config file path (platform-specific config dir + config.yaml)
    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.yaml")
    }
}

/// Resolve relative paths against the config file's directory
fn resolve_against(config_path: &Path, value: PathBuf) -> PathBuf {
    if value.is_relative() {
        config_path
            .parent()
            .map(|p| p.join(&value))
            .unwrap_or(value)
    } else {
        value
    }
}

#[derive(Debug)]
pub enum ConfigError {
    ReadError(PathBuf, std::io::Error),
    ParseError(PathBuf, serde_yaml::Error),
    InvalidValue(&'static str, String),
    MissingToken,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::InvalidValue(name, value) => {
                write!(f, "Invalid value for {}: '{}'", name, value)
            }
            ConfigError::MissingToken => write!(
                f,
                "No GitHub token configured. Set GISTSYNC_TOKEN or add 'token' to {}",
                Config::default_config_path().display()
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("nonexistent.yaml");

        let config = Config::load(Some(config_path)).unwrap();
        assert!(config
            .database_path
            .value
            .to_string_lossy()
            .contains("cache.db"));
        assert_eq!(config.database_path.source, ConfigSource::Default);
        assert_eq!(config.directory.value, PathBuf::from("."));
        assert!(config.watch.value);
        assert!(!config.serialize_cache_writes.value);
        assert!(config.config_file.is_none());
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "directory: /home/me/notes").unwrap();
        writeln!(file, "database_path: /custom/path/db.sqlite").unwrap();
        writeln!(file, "watch: false").unwrap();
        writeln!(file, "serialize_cache_writes: true").unwrap();
        writeln!(file, "api_url: http://localhost:9000").unwrap();

        let config = Config::load(Some(config_path.clone())).unwrap();
        assert_eq!(config.directory.value, PathBuf::from("/home/me/notes"));
        assert_eq!(config.directory.source, ConfigSource::File);
        assert_eq!(
            config.database_path.value,
            PathBuf::from("/custom/path/db.sqlite")
        );
        assert!(!config.watch.value);
        assert_eq!(config.watch.source, ConfigSource::File);
        assert!(config.serialize_cache_writes.value);
        assert_eq!(
            config.api_url.map(|u| u.value),
            Some("http://localhost:9000".to_string())
        );
        assert_eq!(config.config_file, Some(config_path));
    }

    #[test]
    fn test_relative_paths_resolve_against_config_dir() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "directory: notes").unwrap();
        writeln!(file, "database_path: cache.db").unwrap();

        let config = Config::load(Some(config_path)).unwrap();
        assert_eq!(config.directory.value, temp_dir.path().join("notes"));
        assert_eq!(config.database_path.value, temp_dir.path().join("cache.db"));
    }

    #[test]
    #[ignore] // Run with --ignored; env vars can pollute parallel tests
    fn test_env_var_overrides_file() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "poll_interval_secs: 30").unwrap();

        std::env::set_var("GISTSYNC_POLL_INTERVAL", "120");

        let config = Config::load(Some(config_path)).unwrap();
        assert_eq!(config.poll_interval_secs.value, 120);
        assert_eq!(config.poll_interval_secs.source, ConfigSource::Environment);

        std::env::remove_var("GISTSYNC_POLL_INTERVAL");
    }

    #[test]
    fn test_invalid_yaml_error() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "invalid: yaml: content: [").unwrap();

        let result = Config::load(Some(config_path));
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_token_from_file_is_not_serialized() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "token: ghp_secret").unwrap();

        let config = Config::load(Some(config_path)).unwrap();
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("ghp_secret"));
    }

    #[test]
    fn test_missing_token_error() {
        let err = ConfigError::MissingToken;
        assert!(err.to_string().contains("GISTSYNC_TOKEN"));
    }
}
