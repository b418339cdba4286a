use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gistsync_core::{CacheError, CacheStore};
use serde_json::Value;
use sqlx::SqlitePool;

/// Cache store persisted in the `cache_entries` table.
pub struct SqliteCache {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct CacheRow {
    value: String,
    updated_at: String,
}

impl SqliteCache {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, key: &str) -> Result<Option<CacheRow>, sqlx::Error> {
        sqlx::query_as("SELECT value, updated_at FROM cache_entries WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
    }

    /// When `key` was last written.
    pub async fn updated_at(&self, key: &str) -> Result<Option<DateTime<Utc>>, sqlx::Error> {
        Ok(self.fetch(key).await?.and_then(|row| {
            DateTime::parse_from_rfc3339(&row.updated_at)
                .ok()
                .map(|t| t.with_timezone(&Utc))
        }))
    }

    pub async fn count(&self) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM cache_entries")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

fn cache_error(e: sqlx::Error) -> CacheError {
    CacheError::new(e.to_string())
}

#[async_trait]
impl CacheStore for SqliteCache {
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let Some(row) = self.fetch(key).await.map_err(cache_error)? else {
            return Ok(None);
        };
        serde_json::from_str(&row.value)
            .map(Some)
            .map_err(|e| CacheError::new(format!("corrupt cache entry '{}': {}", key, e)))
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), CacheError> {
        let value = serde_json::to_string(&value).map_err(|e| CacheError::new(e.to_string()))?;
        let updated_at = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO cache_entries (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(&value)
        .bind(&updated_at)
        .execute(&self.pool)
        .await
        .map_err(cache_error)?;

        tracing::trace!(key, "Cache entry written");
        Ok(())
    }

    async fn clear(&self, key: &str) -> Result<(), CacheError> {
        sqlx::query("DELETE FROM cache_entries WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(cache_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use serde_json::json;
    use tempfile::tempdir;

    async fn setup() -> (SqliteCache, tempfile::TempDir) {
        let temp_dir = tempdir().unwrap();
        let pool = init_db(&temp_dir.path().join("cache.db")).await.unwrap();
        (SqliteCache::new(pool), temp_dir)
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let (cache, _dir) = setup().await;
        assert_eq!(cache.get("T1").await.unwrap(), None);
        assert_eq!(cache.updated_at("T1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let (cache, _dir) = setup().await;
        let gists = json!([{"id": "g1", "files": {"a.txt": {"filename": "a.txt"}}}]);

        cache.set("octocat:gists", gists.clone()).await.unwrap();

        assert_eq!(cache.get("octocat:gists").await.unwrap(), Some(gists));
        assert!(cache.updated_at("octocat:gists").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_set_upserts() {
        let (cache, _dir) = setup().await;

        cache.set("T1", json!({"login": "old"})).await.unwrap();
        cache.set("T1", json!({"login": "octocat"})).await.unwrap();

        assert_eq!(
            cache.get("T1").await.unwrap(),
            Some(json!({"login": "octocat"}))
        );
        assert_eq!(cache.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_clear() {
        let (cache, _dir) = setup().await;
        cache.set("T1", json!({"login": "octocat"})).await.unwrap();

        cache.clear("T1").await.unwrap();
        cache.clear("never-set").await.unwrap();

        assert_eq!(cache.get("T1").await.unwrap(), None);
        assert_eq!(cache.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("cache.db");

        let cache = SqliteCache::new(init_db(&db_path).await.unwrap());
        cache.set("k", json!(42)).await.unwrap();
        drop(cache);

        let reopened = SqliteCache::new(init_db(&db_path).await.unwrap());
        assert_eq!(reopened.get("k").await.unwrap(), Some(json!(42)));
    }
}
