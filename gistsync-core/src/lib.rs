//! gistsync core library
//!
//! Keeps a local directory mirrored to GitHub Gists, one file per gist.

pub mod api;
pub mod cache;
pub mod gist;
pub mod sync;
pub mod watcher;

pub use api::{ApiError, ApiResponse, GistsClient, UserProfile};
pub use cache::{CacheError, CacheStore, MemoryCache};
pub use gist::{
    parse_single_file, serialize_single_file, FilenameIndex, GistFile, GistRecord, SingleFile,
};
pub use sync::{GistsSync, SyncError, SyncOptions, SyncState};
pub use watcher::{
    default_ignored, GistsWatcher, NotifyBackend, WatchBackend, WatchError, WatchEvent,
    WatchHandlers, WatcherOptions, WatcherOptionsUpdate,
};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
