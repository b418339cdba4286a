//! Key/value cache capability used to memoize remote reads.
//!
//! The engine never owns a cache; it is handed one through
//! [`SyncOptions`](crate::SyncOptions). Values are plain JSON.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;

/// Error reported by a cache backend.
#[derive(Error, Debug, Clone)]
#[error("Cache error: {0}")]
pub struct CacheError(pub String);

impl CacheError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Asynchronous key/value store.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Returns the value for `key`, or `None` on a miss.
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;

    async fn set(&self, key: &str, value: Value) -> Result<(), CacheError>;

    /// Removes `key`. Clearing a missing key is not an error.
    async fn clear(&self, key: &str) -> Result<(), CacheError>;
}

/// Process-local cache backed by a map.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Value>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), CacheError> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn clear(&self, key: &str) -> Result<(), CacheError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}
