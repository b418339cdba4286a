mod cache_repo;

pub use cache_repo::SqliteCache;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Initialize the database connection pool and run migrations
pub async fn init_db(path: &Path) -> Result<SqlitePool, CacheStoreError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| CacheStoreError::CreateDir(parent.to_path_buf(), e))?;
    }

    let db_url = format!("sqlite:{}?mode=rwc", path.display());

    let options = SqliteConnectOptions::from_str(&db_url)?.create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

#[derive(Debug)]
pub enum CacheStoreError {
    CreateDir(PathBuf, std::io::Error),
    Database(sqlx::Error),
    Migrate(sqlx::migrate::MigrateError),
}

impl std::fmt::Display for CacheStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheStoreError::CreateDir(path, e) => write!(
                f,
                "Failed to create database directory '{}': {}",
                path.display(),
                e
            ),
            CacheStoreError::Database(e) => write!(f, "Database error: {}", e),
            CacheStoreError::Migrate(e) => write!(f, "Failed to migrate cache database: {}", e),
        }
    }
}

impl std::error::Error for CacheStoreError {}

impl From<sqlx::Error> for CacheStoreError {
    fn from(e: sqlx::Error) -> Self {
        CacheStoreError::Database(e)
    }
}

impl From<sqlx::migrate::MigrateError> for CacheStoreError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        CacheStoreError::Migrate(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_init_db_creates_tables() {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("nested").join("test.db");

        let pool = init_db(&db_path).await.unwrap();

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' AND name NOT LIKE '_sqlx_%' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();

        let table_names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        assert_eq!(table_names, vec!["cache_entries"]);
        assert!(db_path.exists());
    }
}
