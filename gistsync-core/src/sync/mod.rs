//! Synchronization engine.
//!
//! [`GistsSync`] turns watcher events into gist create/update calls and keeps
//! the cached gist collection and the in-memory filename index consistent
//! with the remote after every successful mutation.
//!
//! ## Lifecycle
//!
//! 1. [`GistsSync::new`] validates [`SyncOptions`]; this is the only place an
//!    error is returned to the caller.
//! 2. [`GistsSync::initialize`] loads the remote collection (through the
//!    cache), builds the index, attaches the watcher and starts polling.
//! 3. From then on every failure is delivered through
//!    [`GistsSync::subscribe`].

mod engine;
mod error;
mod options;

pub use engine::{GistsSync, SyncState, GISTS_KEY_SUFFIX};
pub use error::SyncError;
pub use options::SyncOptions;
