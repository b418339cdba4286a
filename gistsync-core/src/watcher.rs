//! Filesystem watcher adapter.
//!
//! Wraps a [`WatchBackend`] (by default `notify`'s recommended watcher) and
//! dispatches typed events to the handlers configured in
//! [`WatcherOptions`].
//!
//! # Sessions
//!
//! Every call to [`GistsWatcher::start`] tears down the running session and
//! opens a new one. Changing the pattern or the options always goes through
//! `start`, so the live session matches the last configuration call. There
//! is a short window between sessions where no events are observed.
//!
//! A session consists of the backend guard (dropping it stops the OS watch)
//! and a dispatch task that forwards backend events to the handlers in the
//! order the backend emitted them. Sessions must be started from within a
//! tokio runtime.
//!
//! # Initial scan
//!
//! Unless `ignore_initial` is set, a new session first reports every
//! existing file under the pattern as added.

use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use walkdir::WalkDir;

/// Errors raised by the watcher or its backend.
#[derive(Error, Debug, Clone)]
pub enum WatchError {
    #[error("Failed to initialize watcher: {0}")]
    Init(String),

    #[error("Failed to watch path {path}: {message}")]
    Watch { path: PathBuf, message: String },

    #[error("Watcher error: {0}")]
    Backend(String),
}

/// Raw event produced by a backend.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    Added(PathBuf),
    Changed(PathBuf),
    Removed(PathBuf),
    Error(WatchError),
}

pub type FileHandler = Arc<dyn Fn(PathBuf, Option<Metadata>) + Send + Sync>;
pub type RemoveHandler = Arc<dyn Fn(PathBuf) + Send + Sync>;
pub type ErrorHandler = Arc<dyn Fn(WatchError) + Send + Sync>;
pub type IgnorePredicate = Arc<dyn Fn(&Path) -> bool + Send + Sync>;

/// Handlers bound to a session. Missing handlers are not attached.
#[derive(Clone, Default)]
pub struct WatchHandlers {
    pub on_error: Option<ErrorHandler>,
    pub on_file_changed: Option<FileHandler>,
    pub on_file_added: Option<FileHandler>,
    pub on_file_removed: Option<RemoveHandler>,
}

#[derive(Clone)]
pub struct WatcherOptions {
    pub handlers: WatchHandlers,
    /// Start a session from the constructor.
    pub autostart: bool,
    /// Paths for which this returns true are never reported. A matching
    /// directory hides everything below it.
    pub ignored: IgnorePredicate,
    /// Skip the initial scan of existing files.
    pub ignore_initial: bool,
}

impl Default for WatcherOptions {
    fn default() -> Self {
        Self {
            handlers: WatchHandlers::default(),
            autostart: false,
            ignored: Arc::new(default_ignored),
            ignore_initial: false,
        }
    }
}

/// Partial options for [`GistsWatcher::set_options`].
#[derive(Clone, Default)]
pub struct WatcherOptionsUpdate {
    pub handlers: Option<WatchHandlers>,
    pub autostart: Option<bool>,
    pub ignored: Option<IgnorePredicate>,
    pub ignore_initial: Option<bool>,
}

impl WatcherOptions {
    fn merge(&mut self, update: WatcherOptionsUpdate) {
        if let Some(handlers) = update.handlers {
            self.handlers = handlers;
        }
        if let Some(autostart) = update.autostart {
            self.autostart = autostart;
        }
        if let Some(ignored) = update.ignored {
            self.ignored = ignored;
        }
        if let Some(ignore_initial) = update.ignore_initial {
            self.ignore_initial = ignore_initial;
        }
    }
}

/// Hides dotfiles, editor lock files (`#foo`) and backups (`foo~`, `foo__`).
pub fn default_ignored(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    name.starts_with('.') || name.starts_with('#') || name.ends_with("__") || name.ends_with('~')
}

/// Source of raw filesystem events.
pub trait WatchBackend: Send + Sync {
    /// Starts watching `pattern` recursively, sending events into `sink`.
    ///
    /// The returned guard keeps the watch alive; dropping it stops it.
    fn open(
        &self,
        pattern: &Path,
        sink: mpsc::UnboundedSender<WatchEvent>,
    ) -> Result<Box<dyn Send>, WatchError>;
}

/// Backend built on `notify`'s platform watcher.
#[derive(Debug, Default, Clone, Copy)]
pub struct NotifyBackend;

impl WatchBackend for NotifyBackend {
    fn open(
        &self,
        pattern: &Path,
        sink: mpsc::UnboundedSender<WatchEvent>,
    ) -> Result<Box<dyn Send>, WatchError> {
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                // Runs on notify's thread. A closed channel means the
                // session is gone, so dropping events is fine.
                match res {
                    Ok(event) => {
                        for translated in translate(event) {
                            let _ = sink.send(translated);
                        }
                    }
                    Err(e) => {
                        let _ = sink.send(WatchEvent::Error(WatchError::Backend(e.to_string())));
                    }
                }
            },
            Config::default(),
        )
        .map_err(|e| WatchError::Init(e.to_string()))?;

        watcher
            .watch(pattern, RecursiveMode::Recursive)
            .map_err(|e| WatchError::Watch {
                path: pattern.to_path_buf(),
                message: e.to_string(),
            })?;

        Ok(Box::new(watcher))
    }
}

/// Maps a notify event onto add/change/remove events.
fn translate(event: Event) -> Vec<WatchEvent> {
    match event.kind {
        EventKind::Create(_) => event.paths.into_iter().map(WatchEvent::Added).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            event.paths.into_iter().map(WatchEvent::Removed).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            event.paths.into_iter().map(WatchEvent::Added).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut paths = event.paths.into_iter();
            let mut events = Vec::new();
            if let Some(from) = paths.next() {
                events.push(WatchEvent::Removed(from));
            }
            if let Some(to) = paths.next() {
                events.push(WatchEvent::Added(to));
            }
            events
        }
        EventKind::Modify(ModifyKind::Name(_)) => event
            .paths
            .into_iter()
            .map(|path| {
                if path.exists() {
                    WatchEvent::Added(path)
                } else {
                    WatchEvent::Removed(path)
                }
            })
            .collect(),
        EventKind::Modify(_) => event.paths.into_iter().map(WatchEvent::Changed).collect(),
        EventKind::Remove(_) => event.paths.into_iter().map(WatchEvent::Removed).collect(),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => {
            trace!(kind = ?event.kind, "Ignoring event");
            Vec::new()
        }
    }
}

struct WatchSession {
    _guard: Box<dyn Send>,
    dispatcher: JoinHandle<()>,
}

impl Drop for WatchSession {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

/// Watches one directory and reports file events to handlers.
pub struct GistsWatcher {
    pattern: PathBuf,
    options: WatcherOptions,
    backend: Arc<dyn WatchBackend>,
    session: Option<WatchSession>,
}

impl std::fmt::Debug for GistsWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GistsWatcher")
            .field("pattern", &self.pattern)
            .field("autostart", &self.options.autostart)
            .field("active", &self.is_active())
            .finish()
    }
}

impl GistsWatcher {
    /// Creates a watcher on the `notify` backend.
    pub fn new(pattern: impl Into<PathBuf>, options: WatcherOptions) -> Result<Self, WatchError> {
        Self::with_backend(pattern, options, Arc::new(NotifyBackend))
    }

    /// Creates a watcher on a custom backend, starting it if `autostart`
    /// is set.
    pub fn with_backend(
        pattern: impl Into<PathBuf>,
        options: WatcherOptions,
        backend: Arc<dyn WatchBackend>,
    ) -> Result<Self, WatchError> {
        let mut watcher = Self {
            pattern: pattern.into(),
            options,
            backend,
            session: None,
        };
        if watcher.options.autostart {
            watcher.start()?;
        }
        Ok(watcher)
    }

    pub fn pattern(&self) -> &Path {
        &self.pattern
    }

    pub fn options(&self) -> &WatcherOptions {
        &self.options
    }

    /// Whether a session is currently running.
    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// Replaces the running session with a fresh one.
    pub fn start(&mut self) -> Result<(), WatchError> {
        self.stop();

        let (tx, rx) = mpsc::unbounded_channel();
        let guard = self.backend.open(&self.pattern, tx)?;

        let initial_scan = (!self.options.ignore_initial).then(|| self.pattern.clone());
        let dispatcher = tokio::spawn(dispatch(
            rx,
            self.pattern.clone(),
            self.options.handlers.clone(),
            self.options.ignored.clone(),
            initial_scan,
        ));

        debug!(pattern = %self.pattern.display(), "Watch session started");
        self.session = Some(WatchSession {
            _guard: guard,
            dispatcher,
        });
        Ok(())
    }

    /// Changes the watched path and restarts the session.
    pub fn set_pattern(&mut self, pattern: impl Into<PathBuf>) -> Result<(), WatchError> {
        self.pattern = pattern.into();
        self.start()
    }

    /// Merges `update` into the current options and restarts the session.
    pub fn set_options(&mut self, update: WatcherOptionsUpdate) -> Result<(), WatchError> {
        self.options.merge(update);
        self.start()
    }

    /// Stops the session, keeping pattern and options.
    pub fn pause(&mut self) {
        self.stop();
    }

    pub fn resume(&mut self) -> Result<(), WatchError> {
        self.start()
    }

    fn stop(&mut self) {
        if self.session.take().is_some() {
            debug!(pattern = %self.pattern.display(), "Watch session stopped");
        }
    }
}

async fn dispatch(
    mut rx: mpsc::UnboundedReceiver<WatchEvent>,
    root: PathBuf,
    handlers: WatchHandlers,
    ignored: IgnorePredicate,
    initial_scan: Option<PathBuf>,
) {
    if let Some(scan_root) = initial_scan {
        let scan_ignored = ignored.clone();
        match tokio::task::spawn_blocking(move || scan(&scan_root, &scan_ignored)).await {
            Ok(existing) => {
                for path in existing {
                    deliver(&handlers, &root, &ignored, WatchEvent::Added(path));
                }
            }
            Err(e) => warn!(error = %e, "Initial scan failed"),
        }
    }

    while let Some(event) = rx.recv().await {
        deliver(&handlers, &root, &ignored, event);
    }
}

/// Lists existing files under `root`, pruning ignored directories.
fn scan(root: &Path, ignored: &IgnorePredicate) -> Vec<PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !ignored(entry.path()))
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect()
}

/// True when `path` or any of its ancestors below `root` is ignored.
fn is_ignored(root: &Path, path: &Path, ignored: &IgnorePredicate) -> bool {
    ignored(path)
        || path
            .ancestors()
            .skip(1)
            .take_while(|ancestor| *ancestor != root && ancestor.starts_with(root))
            .any(|ancestor| ignored(ancestor))
}

fn deliver(handlers: &WatchHandlers, root: &Path, ignored: &IgnorePredicate, event: WatchEvent) {
    match event {
        WatchEvent::Error(err) => {
            if let Some(handler) = &handlers.on_error {
                handler(err);
            }
        }
        WatchEvent::Added(path) | WatchEvent::Changed(path) if path.is_dir() => {
            trace!(path = %path.display(), "Skipping directory event");
        }
        WatchEvent::Added(path) | WatchEvent::Changed(path) | WatchEvent::Removed(path)
            if is_ignored(root, &path, ignored) =>
        {
            trace!(path = %path.display(), "Skipping ignored path");
        }
        WatchEvent::Added(path) => {
            if let Some(handler) = &handlers.on_file_added {
                let metadata = std::fs::metadata(&path).ok();
                handler(path, metadata);
            }
        }
        WatchEvent::Changed(path) => {
            if let Some(handler) = &handlers.on_file_changed {
                let metadata = std::fs::metadata(&path).ok();
                handler(path, metadata);
            }
        }
        WatchEvent::Removed(path) => {
            if let Some(handler) = &handlers.on_file_removed {
                handler(path);
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ManualBackend;
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    type Seen = Arc<Mutex<Vec<String>>>;

    fn recording_handlers(seen: &Seen) -> WatchHandlers {
        let added = seen.clone();
        let changed = seen.clone();
        let removed = seen.clone();
        let errors = seen.clone();
        WatchHandlers {
            on_file_added: Some(Arc::new(move |path: PathBuf, _: Option<Metadata>| {
                added.lock().unwrap().push(format!("add {}", name(&path)));
            })),
            on_file_changed: Some(Arc::new(move |path: PathBuf, _: Option<Metadata>| {
                changed.lock().unwrap().push(format!("change {}", name(&path)));
            })),
            on_file_removed: Some(Arc::new(move |path: PathBuf| {
                removed.lock().unwrap().push(format!("remove {}", name(&path)));
            })),
            on_error: Some(Arc::new(move |err: WatchError| {
                errors.lock().unwrap().push(format!("error {}", err));
            })),
        }
    }

    fn name(path: &Path) -> String {
        path.file_name().unwrap().to_string_lossy().into_owned()
    }

    fn options(seen: &Seen, autostart: bool) -> WatcherOptions {
        WatcherOptions {
            handlers: recording_handlers(seen),
            autostart,
            ..WatcherOptions::default()
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[test]
    fn test_default_ignored() {
        assert!(default_ignored(Path::new("/tmp/.hidden")));
        assert!(default_ignored(Path::new("/tmp/#notes.md#")));
        assert!(default_ignored(Path::new("/tmp/notes.md~")));
        assert!(default_ignored(Path::new("/tmp/build__")));
        assert!(!default_ignored(Path::new("/tmp/notes.md")));
        assert!(!default_ignored(Path::new("/tmp/under_score.txt")));
    }

    #[test]
    fn test_is_ignored_checks_ancestors_below_root() {
        let ignored: IgnorePredicate = Arc::new(default_ignored);
        let root = Path::new("/home/me/.gists");

        assert!(!is_ignored(root, Path::new("/home/me/.gists/a.txt"), &ignored));
        assert!(is_ignored(root, Path::new("/home/me/.gists/.git/index"), &ignored));
        assert!(is_ignored(root, Path::new("/home/me/.gists/a.txt~"), &ignored));
    }

    #[test]
    fn test_translate_rename_both() {
        let event = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(PathBuf::from("/d/old.txt"))
            .add_path(PathBuf::from("/d/new.txt"));

        let events = translate(event);

        assert!(matches!(&events[0], WatchEvent::Removed(p) if p.ends_with("old.txt")));
        assert!(matches!(&events[1], WatchEvent::Added(p) if p.ends_with("new.txt")));
    }

    #[test]
    fn test_translate_access_is_dropped() {
        let event = Event::new(EventKind::Access(notify::event::AccessKind::Any))
            .add_path(PathBuf::from("/d/a.txt"));
        assert!(translate(event).is_empty());
    }

    #[tokio::test]
    async fn test_no_session_without_autostart() {
        let backend = ManualBackend::default();
        let seen = Seen::default();

        let watcher =
            GistsWatcher::with_backend("/srv/gists", options(&seen, false), Arc::new(backend.clone()))
                .unwrap();

        assert!(!watcher.is_active());
        assert_eq!(backend.opened(), 0);
    }

    #[tokio::test]
    async fn test_dispatches_events_in_order() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "x").unwrap();

        let backend = ManualBackend::default();
        let seen = Seen::default();
        let mut opts = options(&seen, true);
        opts.ignore_initial = true;
        let watcher =
            GistsWatcher::with_backend(dir.path(), opts, Arc::new(backend.clone())).unwrap();
        assert!(watcher.is_active());

        backend.emit(WatchEvent::Added(file.clone()));
        backend.emit(WatchEvent::Changed(file.clone()));
        backend.emit(WatchEvent::Removed(file.clone()));
        backend.emit(WatchEvent::Error(WatchError::Backend("boom".to_string())));
        settle().await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                "add a.txt".to_string(),
                "change a.txt".to_string(),
                "remove a.txt".to_string(),
                "error Watcher error: boom".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_handler_is_not_bound() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "x").unwrap();

        let backend = ManualBackend::default();
        let seen = Seen::default();
        let mut handlers = recording_handlers(&seen);
        handlers.on_file_changed = None;
        let opts = WatcherOptions {
            handlers,
            autostart: true,
            ignore_initial: true,
            ..WatcherOptions::default()
        };
        let _watcher =
            GistsWatcher::with_backend(dir.path(), opts, Arc::new(backend.clone())).unwrap();

        backend.emit(WatchEvent::Changed(file.clone()));
        backend.emit(WatchEvent::Added(file));
        settle().await;

        assert_eq!(*seen.lock().unwrap(), vec!["add a.txt".to_string()]);
    }

    #[tokio::test]
    async fn test_ignored_and_directory_events_are_skipped() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join(".hidden"), "x").unwrap();

        let backend = ManualBackend::default();
        let seen = Seen::default();
        let mut opts = options(&seen, true);
        opts.ignore_initial = true;
        let _watcher =
            GistsWatcher::with_backend(dir.path(), opts, Arc::new(backend.clone())).unwrap();

        backend.emit(WatchEvent::Added(dir.path().join(".hidden")));
        backend.emit(WatchEvent::Added(dir.path().join("sub")));
        backend.emit(WatchEvent::Changed(dir.path().join(".git").join("HEAD")));
        settle().await;

        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_initial_scan_reports_existing_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        std::fs::write(dir.path().join(".secret"), "s").unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".git").join("config"), "c").unwrap();

        let backend = ManualBackend::default();
        let seen = Seen::default();
        let _watcher =
            GistsWatcher::with_backend(dir.path(), options(&seen, true), Arc::new(backend))
                .unwrap();
        settle().await;

        assert_eq!(*seen.lock().unwrap(), vec!["add a.txt".to_string()]);
    }

    #[tokio::test]
    async fn test_pause_and_resume() {
        let dir = TempDir::new().unwrap();
        let backend = ManualBackend::default();
        let seen = Seen::default();
        let mut watcher =
            GistsWatcher::with_backend(dir.path(), options(&seen, true), Arc::new(backend.clone()))
                .unwrap();

        watcher.pause();
        assert!(!watcher.is_active());
        watcher.pause();
        assert!(!watcher.is_active());
        assert_eq!(backend.opened(), 1);

        watcher.resume().unwrap();
        assert!(watcher.is_active());
        assert_eq!(backend.opened(), 2);
    }

    #[tokio::test]
    async fn test_paused_session_stops_dispatch() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "x").unwrap();

        let backend = ManualBackend::default();
        let seen = Seen::default();
        let mut opts = options(&seen, true);
        opts.ignore_initial = true;
        let mut watcher =
            GistsWatcher::with_backend(dir.path(), opts, Arc::new(backend.clone())).unwrap();

        watcher.pause();
        settle().await;
        backend.emit(WatchEvent::Changed(file));
        settle().await;

        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_set_pattern_restarts_session() {
        let one = TempDir::new().unwrap();
        let two = TempDir::new().unwrap();
        let backend = ManualBackend::default();
        let seen = Seen::default();
        let mut watcher =
            GistsWatcher::with_backend(one.path(), options(&seen, false), Arc::new(backend.clone()))
                .unwrap();

        watcher.set_pattern(two.path()).unwrap();

        assert!(watcher.is_active());
        assert_eq!(watcher.pattern(), two.path());
        assert_eq!(backend.patterns(), vec![two.path().to_path_buf()]);
    }

    #[tokio::test]
    async fn test_set_options_merges_and_restarts() {
        let dir = TempDir::new().unwrap();
        let backend = ManualBackend::default();
        let seen = Seen::default();
        let mut watcher =
            GistsWatcher::with_backend(dir.path(), options(&seen, true), Arc::new(backend.clone()))
                .unwrap();

        watcher
            .set_options(WatcherOptionsUpdate {
                ignore_initial: Some(true),
                ..WatcherOptionsUpdate::default()
            })
            .unwrap();

        assert_eq!(backend.opened(), 2);
        assert!(watcher.options().ignore_initial);
        assert!(watcher.options().autostart);
        assert!(watcher.options().handlers.on_file_added.is_some());
    }

    #[tokio::test]
    async fn test_notify_backend_rejects_missing_directory() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("does-not-exist");

        let result = GistsWatcher::new(
            missing,
            WatcherOptions {
                autostart: true,
                ..WatcherOptions::default()
            },
        );

        assert!(matches!(result, Err(WatchError::Watch { .. })));
    }
}
