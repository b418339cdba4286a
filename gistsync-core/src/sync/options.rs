//! Engine configuration.

use std::sync::Arc;
use std::time::Duration;

use super::error::SyncError;
use crate::cache::CacheStore;
use crate::watcher::WatchBackend;

/// Options for [`GistsSync`](super::GistsSync).
///
/// `cache` and `application_token` are required; everything else has a
/// default.
#[derive(Clone)]
pub struct SyncOptions {
    /// Store for the user profile and the gist collection.
    pub cache: Option<Arc<dyn CacheStore>>,
    /// GitHub token. Also the cache key of the user profile.
    pub application_token: Option<String>,
    /// Zero disables polling.
    pub poll_interval: Duration,
    /// Start the watch session as soon as the engine is initialized.
    pub is_watching: bool,
    /// Serialize the cache read-modify-write per key and await it before a
    /// file handler returns. Off by default.
    pub serialize_cache_writes: bool,
    /// Clear the cached collection on every poll tick so the tick always
    /// reaches the remote.
    pub poll_invalidates_cache: bool,
    pub api_base_url: Option<String>,
    pub user_agent: Option<String>,
    /// Filesystem event source; `notify` when unset.
    pub watch_backend: Option<Arc<dyn WatchBackend>>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            cache: None,
            application_token: None,
            poll_interval: Duration::ZERO,
            is_watching: false,
            serialize_cache_writes: false,
            poll_invalidates_cache: true,
            api_base_url: None,
            user_agent: None,
            watch_backend: None,
        }
    }
}

impl std::fmt::Debug for SyncOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOptions")
            .field("has_cache", &self.cache.is_some())
            .field("has_token", &self.application_token.is_some())
            .field("poll_interval", &self.poll_interval)
            .field("is_watching", &self.is_watching)
            .field("serialize_cache_writes", &self.serialize_cache_writes)
            .field("poll_invalidates_cache", &self.poll_invalidates_cache)
            .field("api_base_url", &self.api_base_url)
            .finish_non_exhaustive()
    }
}

impl SyncOptions {
    /// Options with the two required fields set.
    pub fn new(cache: Arc<dyn CacheStore>, application_token: impl Into<String>) -> Self {
        Self {
            cache: Some(cache),
            application_token: Some(application_token.into()),
            ..Self::default()
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_watching(mut self, is_watching: bool) -> Self {
        self.is_watching = is_watching;
        self
    }

    pub fn with_serialized_cache_writes(mut self, enabled: bool) -> Self {
        self.serialize_cache_writes = enabled;
        self
    }

    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = Some(url.into());
        self
    }

    pub fn with_watch_backend(mut self, backend: Arc<dyn WatchBackend>) -> Self {
        self.watch_backend = Some(backend);
        self
    }

    /// Checks the required fields and hands them back.
    pub(crate) fn validate(&self) -> Result<(Arc<dyn CacheStore>, String), SyncError> {
        let cache = self.cache.clone().ok_or_else(|| {
            SyncError::Configuration("the sync engine needs a cache store".to_string())
        })?;
        let token = self
            .application_token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                SyncError::Configuration(
                    "the sync engine needs a user token to access gists".to_string(),
                )
            })?;
        Ok((cache, token))
    }
}
