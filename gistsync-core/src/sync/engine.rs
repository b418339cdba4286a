//! The sync engine: event handling, caching protocol and polling.

use std::collections::HashMap;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::time::Duration;

use tokio::sync::{broadcast, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::error::SyncError;
use super::options::SyncOptions;
use crate::api::{ApiResponse, GistsClient, UserProfile};
use crate::cache::CacheStore;
use crate::gist::{serialize_single_file, FilenameIndex, GistRecord, SingleFile};
use crate::watcher::{
    default_ignored, GistsWatcher, NotifyBackend, WatchBackend, WatchError, WatchHandlers,
    WatcherOptions,
};

/// Suffix of the cache key holding a user's gist collection.
pub const GISTS_KEY_SUFFIX: &str = ":gists";

const ERROR_CHANNEL_CAPACITY: usize = 64;

/// Coarse lifecycle of the engine. Polling runs alongside `Ready` and is
/// reported separately by [`GistsSync::is_polling`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Constructed,
    Initializing,
    Ready,
}

/// Handle to a sync engine. Clones share the same engine.
#[derive(Clone)]
pub struct GistsSync {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for GistsSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GistsSync")
            .field("pattern", &self.pattern())
            .field("state", &self.state())
            .field("poll_interval", &self.poll_interval())
            .finish_non_exhaustive()
    }
}

struct Inner {
    cache: Arc<dyn CacheStore>,
    application_token: String,
    is_watching: bool,
    serialize_cache_writes: bool,
    poll_invalidates_cache: bool,
    watch_backend: Arc<dyn WatchBackend>,
    api: RwLock<GistsClient>,
    /// Replaced wholesale, never edited in place.
    index: RwLock<Arc<FilenameIndex>>,
    state: Mutex<SyncState>,
    pattern: Mutex<PathBuf>,
    poll_interval: Mutex<Duration>,
    watcher: Mutex<Option<GistsWatcher>>,
    poller: Mutex<Option<JoinHandle<()>>>,
    pending: Mutex<Vec<JoinHandle<()>>>,
    key_locks: KeyedLocks,
    errors: broadcast::Sender<SyncError>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(poller) = lock(&self.poller).take() {
            poller.abort();
        }
    }
}

/// One async mutex per cache key.
#[derive(Default)]
struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let key_lock = lock(&self.locks).entry(key.to_string()).or_default().clone();
        key_lock.lock_owned().await
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn gists_key(login: &str) -> String {
    format!("{}{}", login, GISTS_KEY_SUFFIX)
}

fn remote_failed(operation: &'static str, response: ApiResponse) -> SyncError {
    SyncError::RemoteRequestFailed {
        operation,
        status: response.status,
        body: response.body,
    }
}

/// Makes `directory` absolute against the working directory.
fn resolve_pattern(directory: &Path) -> PathBuf {
    std::path::absolute(directory).unwrap_or_else(|_| directory.to_path_buf())
}

/// Reads a file as (basename, content). Empty files read as `"."` because
/// the remote rejects empty gist content.
async fn read_file_data(path: &Path) -> Result<SingleFile, SyncError> {
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| SyncError::InvalidArgument(format!("{} has no filename", path.display())))?;

    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| SyncError::Transport(format!("failed to read {}: {}", path.display(), e)))?;

    let content = String::from_utf8_lossy(&bytes).into_owned();
    let content = if content.is_empty() { ".".to_string() } else { content };
    Ok(SingleFile { filename, content })
}

/// Whether `content` needs pushing over the existing record.
fn has_file_updated(filename: &str, content: &str, existing: Option<&GistRecord>) -> bool {
    let Some(existing) = existing else {
        return true;
    };
    match existing.files.get(filename).and_then(|f| f.content.as_deref()) {
        None | Some("") => true,
        Some(old) => old != content,
    }
}

impl GistsSync {
    /// Validates `options` and prepares an engine watching `directory`.
    ///
    /// Nothing touches the network or the filesystem until
    /// [`initialize`](Self::initialize).
    pub fn new(directory: impl AsRef<Path>, options: SyncOptions) -> Result<Self, SyncError> {
        let (cache, application_token) = options.validate()?;

        let mut api = GistsClient::new(application_token.clone());
        if let Some(url) = &options.api_base_url {
            api = api.with_base_url(url.clone());
        }
        if let Some(user_agent) = &options.user_agent {
            api = api.with_user_agent(user_agent.clone());
        }

        let (errors, _) = broadcast::channel(ERROR_CHANNEL_CAPACITY);

        Ok(Self {
            inner: Arc::new(Inner {
                cache,
                application_token,
                is_watching: options.is_watching,
                serialize_cache_writes: options.serialize_cache_writes,
                poll_invalidates_cache: options.poll_invalidates_cache,
                watch_backend: options
                    .watch_backend
                    .unwrap_or_else(|| Arc::new(NotifyBackend)),
                api: RwLock::new(api),
                index: RwLock::new(Arc::new(FilenameIndex::default())),
                state: Mutex::new(SyncState::Constructed),
                pattern: Mutex::new(resolve_pattern(directory.as_ref())),
                poll_interval: Mutex::new(options.poll_interval),
                watcher: Mutex::new(None),
                poller: Mutex::new(None),
                pending: Mutex::new(Vec::new()),
                key_locks: KeyedLocks::default(),
                errors,
            }),
        })
    }

    fn from_weak(weak: &Weak<Inner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    /// Receives every error the engine reports from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncError> {
        self.inner.errors.subscribe()
    }

    pub fn state(&self) -> SyncState {
        *lock(&self.inner.state)
    }

    fn set_state(&self, state: SyncState) {
        *lock(&self.inner.state) = state;
    }

    pub fn is_polling(&self) -> bool {
        lock(&self.inner.poller)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Whether the watcher currently has a live session.
    pub fn is_watching(&self) -> bool {
        lock(&self.inner.watcher)
            .as_ref()
            .is_some_and(GistsWatcher::is_active)
    }

    /// The absolute directory being mirrored.
    pub fn pattern(&self) -> PathBuf {
        lock(&self.inner.pattern).clone()
    }

    pub fn poll_interval(&self) -> Duration {
        *lock(&self.inner.poll_interval)
    }

    /// Snapshot of the current filename index.
    pub fn index(&self) -> Arc<FilenameIndex> {
        self.inner
            .index
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn replace_index(&self, index: FilenameIndex) {
        *self
            .inner
            .index
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Arc::new(index);
    }

    fn api(&self) -> GistsClient {
        self.inner
            .api
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Loads remote state, attaches the watcher and starts polling.
    ///
    /// Never fails: errors are delivered to subscribers and the engine goes
    /// back to [`SyncState::Constructed`].
    pub async fn initialize(&self) {
        self.set_state(SyncState::Initializing);
        if let Err(err) = self.try_initialize().await {
            self.set_state(SyncState::Constructed);
            self.on_error(err);
        }
    }

    async fn try_initialize(&self) -> Result<(), SyncError> {
        let gists = self.get_all_gist().await?;
        self.replace_index(FilenameIndex::build(&gists));

        self.create_watcher()?;

        if !self.poll_interval().is_zero() {
            self.start_polling();
        }

        self.set_state(SyncState::Ready);
        info!(
            pattern = %self.pattern().display(),
            gists = gists.len(),
            watching = self.inner.is_watching,
            "Gist sync ready"
        );
        Ok(())
    }

    fn create_watcher(&self) -> Result<(), SyncError> {
        let weak = Arc::downgrade(&self.inner);

        let on_added = weak.clone();
        let on_changed = weak.clone();
        let on_removed = weak.clone();
        let on_error = weak;

        let handlers = WatchHandlers {
            on_file_added: Some(Arc::new(move |path: PathBuf, metadata: Option<Metadata>| {
                if let Some(sync) = Self::from_weak(&on_added) {
                    let task = sync.clone();
                    sync.track(tokio::spawn(async move {
                        task.on_file_added(&path, metadata).await
                    }));
                }
            })),
            on_file_changed: Some(Arc::new(move |path: PathBuf, _: Option<Metadata>| {
                if let Some(sync) = Self::from_weak(&on_changed) {
                    let task = sync.clone();
                    sync.track(tokio::spawn(async move { task.on_file_changed(&path).await }));
                }
            })),
            on_file_removed: Some(Arc::new(move |path: PathBuf| {
                if let Some(sync) = Self::from_weak(&on_removed) {
                    tokio::spawn(async move { sync.on_file_removed(&path).await });
                }
            })),
            on_error: Some(Arc::new(move |err: WatchError| {
                if let Some(sync) = Self::from_weak(&on_error) {
                    sync.on_error(err.into());
                }
            })),
        };

        let options = WatcherOptions {
            handlers,
            autostart: self.inner.is_watching,
            ignored: Arc::new(default_ignored),
            ignore_initial: false,
        };

        let watcher =
            GistsWatcher::with_backend(self.pattern(), options, self.inner.watch_backend.clone())?;
        *lock(&self.inner.watcher) = Some(watcher);
        Ok(())
    }

    /// The authenticated user, cached under the application token.
    pub async fn get_user(&self) -> Result<UserProfile, SyncError> {
        let key = &self.inner.application_token;
        if let Some(cached) = self.inner.cache.get(key).await?.filter(|v| !v.is_null()) {
            return Ok(serde_json::from_value(cached)?);
        }

        let response = self.api().get_current_user().await?;
        if response.is_error() {
            return Err(remote_failed("fetch user for", response));
        }
        let user: UserProfile = response.json()?;
        self.inner.cache.set(key, response.body).await?;
        debug!(login = %user.login, "Cached user profile");
        Ok(user)
    }

    /// The user's gist collection, cached under `"<login>:gists"`.
    ///
    /// Only a cache miss rebuilds the filename index.
    pub async fn get_all_gist(&self) -> Result<Vec<GistRecord>, SyncError> {
        let user = self.get_user().await?;
        let key = gists_key(&user.login);
        if let Some(cached) = self.inner.cache.get(&key).await?.filter(|v| !v.is_null()) {
            return Ok(serde_json::from_value(cached)?);
        }

        let response = self.api().list_gists_for_user(&user.login).await?;
        if response.is_error() {
            return Err(remote_failed("list", response));
        }
        let gists: Vec<GistRecord> = response.json()?;
        self.inner.cache.set(&key, response.body).await?;
        self.replace_index(FilenameIndex::build(&gists));
        debug!(login = %user.login, count = gists.len(), "Fetched gist collection");
        Ok(gists)
    }

    /// Writes `record` into the cached collection (replacing the entry with
    /// the same id, else appending) and rebuilds the index from the result.
    ///
    /// Without `serialize_cache_writes` two concurrent calls can interleave
    /// and one of the writes is lost.
    pub async fn update_gist_in_cache(&self, record: GistRecord) -> Result<(), SyncError> {
        let user = self.get_user().await?;
        let key = gists_key(&user.login);
        let _guard = self.serialized(&key).await;

        let mut gists = self.get_all_gist().await?;
        match gists.iter().rposition(|gist| gist.id == record.id) {
            Some(position) => gists[position] = record,
            None => gists.push(record),
        }
        self.inner.cache.set(&key, serde_json::to_value(&gists)?).await?;

        let fresh = self.get_all_gist().await?;
        self.replace_index(FilenameIndex::build(&fresh));
        Ok(())
    }

    async fn serialized(&self, key: &str) -> Option<OwnedMutexGuard<()>> {
        if self.inner.serialize_cache_writes {
            Some(self.inner.key_locks.acquire(key).await)
        } else {
            None
        }
    }

    async fn schedule_cache_update(&self, record: GistRecord) -> Result<(), SyncError> {
        if self.inner.serialize_cache_writes {
            return self.update_gist_in_cache(record).await;
        }

        let sync = self.clone();
        self.track(tokio::spawn(async move {
            if let Err(err) = sync.update_gist_in_cache(record).await {
                sync.on_error(err);
            }
        }));
        Ok(())
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut pending = lock(&self.inner.pending);
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }

    /// Waits for every watcher-driven handler and cache refresh spawned so
    /// far, including the ones they spawn while being awaited.
    pub async fn flush_pending(&self) {
        loop {
            let handles = std::mem::take(&mut *lock(&self.inner.pending));
            if handles.is_empty() {
                break;
            }
            for handle in handles {
                let _ = handle.await;
            }
        }
    }

    /// Pushes a changed file to its gist unless the content is unchanged.
    pub async fn on_file_changed(&self, path: &Path) {
        if let Err(err) = self.try_file_changed(path).await {
            self.on_error(err);
        }
    }

    async fn try_file_changed(&self, path: &Path) -> Result<(), SyncError> {
        let SingleFile { filename, content } = read_file_data(path).await?;
        let existing = self.index().get(&filename).cloned();

        if !has_file_updated(&filename, &content, existing.as_ref()) {
            debug!(%filename, "Content unchanged, skipping update");
            return Ok(());
        }

        let record = serialize_single_file(&filename, &content, existing.as_ref());
        let response = self.api().update_gist(&record).await?;
        if response.is_error() {
            return Err(remote_failed("update", response));
        }

        let updated: GistRecord = response.json()?;
        info!(%filename, id = ?updated.id, "Updated gist");
        self.schedule_cache_update(updated).await
    }

    /// Creates a gist for a new file, or updates it if one already exists.
    pub async fn on_file_added(&self, path: &Path, metadata: Option<Metadata>) {
        if let Err(err) = self.try_file_added(path, metadata).await {
            self.on_error(err);
        }
    }

    async fn try_file_added(&self, path: &Path, _metadata: Option<Metadata>) -> Result<(), SyncError> {
        let SingleFile { filename, content } = read_file_data(path).await?;

        if self.index().contains(&filename) {
            debug!(%filename, "Gist already exists, treating add as change");
            return self.try_file_changed(path).await;
        }

        let record = serialize_single_file(&filename, &content, None);
        let response = self.api().create_gist(&record).await?;
        if response.is_error() {
            return Err(remote_failed("create", response));
        }

        let created: GistRecord = response.json()?;
        info!(%filename, id = ?created.id, "Created gist");
        self.schedule_cache_update(created).await
    }

    /// Removals are not propagated; the gist stays on the remote.
    pub async fn on_file_removed(&self, path: &Path) {
        debug!(path = %path.display(), "File removed, leaving gist in place");
    }

    /// Reports `err` to every subscriber.
    pub fn on_error(&self, err: SyncError) {
        warn!(error = %err, "Gist sync error");
        // No subscribers is fine.
        let _ = self.inner.errors.send(err);
    }

    /// Changes the polling period; zero stops polling. Must be called from
    /// within a tokio runtime.
    pub fn set_poll_interval(&self, interval: Duration) {
        *lock(&self.inner.poll_interval) = interval;
        self.stop_polling();
        if !interval.is_zero() {
            self.start_polling();
        }
    }

    /// Mirrors another directory, restarting the watch session.
    pub fn set_directory(&self, directory: impl AsRef<Path>) {
        let pattern = resolve_pattern(directory.as_ref());
        *lock(&self.inner.pattern) = pattern.clone();

        let result = match lock(&self.inner.watcher).as_mut() {
            Some(watcher) => watcher.set_pattern(pattern),
            None => Ok(()),
        };
        if let Err(err) = result {
            self.on_error(err.into());
        }
    }

    /// Swaps the API client for one using `token`. Requests already in
    /// flight keep the old client. The user profile stays cached under the
    /// original application token.
    pub fn update_token(&self, token: impl Into<String>) {
        let client = self.api().with_token(token);
        *self
            .inner
            .api
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = client;
    }

    pub fn pause_watcher(&self) {
        if let Some(watcher) = lock(&self.inner.watcher).as_mut() {
            watcher.pause();
        }
    }

    pub fn resume_watcher(&self) {
        let result = match lock(&self.inner.watcher).as_mut() {
            Some(watcher) => watcher.resume(),
            None => Ok(()),
        };
        if let Err(err) = result {
            self.on_error(err.into());
        }
    }

    /// Stops watching and polling, then waits for in-flight file handlers
    /// and their cache refreshes.
    pub async fn shutdown(&self) {
        self.pause_watcher();
        self.stop_polling();
        self.flush_pending().await;
        info!("Gist sync stopped");
    }

    /// One polling round.
    ///
    /// With `poll_invalidates_cache` the cached collection is dropped first,
    /// so the round always refetches and rebuilds the index. Otherwise it
    /// only reaches the remote on a cache miss.
    pub async fn poll(&self) -> Result<(), SyncError> {
        if self.inner.poll_invalidates_cache {
            let user = self.get_user().await?;
            let key = gists_key(&user.login);
            let _guard = self.serialized(&key).await;
            self.inner.cache.clear(&key).await?;
            self.get_all_gist().await?;
        } else {
            self.get_all_gist().await?;
        }
        Ok(())
    }

    fn start_polling(&self) {
        self.stop_polling();
        let interval = self.poll_interval();
        if interval.is_zero() {
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(sync) = Self::from_weak(&weak) else {
                    break;
                };
                if let Err(err) = sync.poll().await {
                    sync.on_error(err);
                }
            }
        });

        debug!(?interval, "Polling started");
        *lock(&self.inner.poller) = Some(handle);
    }

    fn stop_polling(&self) {
        if let Some(handle) = lock(&self.inner.poller).take() {
            handle.abort();
        }
    }
}
