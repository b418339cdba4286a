//! Sync error types.

use serde_json::Value;
use thiserror::Error;

use crate::api::ApiError;
use crate::cache::CacheError;
use crate::watcher::WatchError;

/// Errors produced by the sync engine.
///
/// Cloneable so a single failure can be broadcast to every subscriber.
#[derive(Error, Debug, Clone)]
pub enum SyncError {
    /// A required option is missing. Only returned from `GistsSync::new`.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The remote answered with an error status.
    #[error("Unable to {operation} gist: server returned {status}: {body}")]
    RemoteRequestFailed {
        operation: &'static str,
        status: u16,
        body: Value,
    },

    /// Network failure, or a local file that could not be read.
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Cache error: {0}")]
    Cache(String),

    /// A request body could not be serialized.
    #[error("Encode error: {0}")]
    Encode(String),

    /// A response or cached value did not have the expected shape.
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Watcher error: {0}")]
    Watch(String),
}

impl From<ApiError> for SyncError {
    fn from(e: ApiError) -> Self {
        match e {
            ApiError::Network(msg) => SyncError::Transport(msg),
            ApiError::InvalidArgument(msg) => SyncError::InvalidArgument(msg),
            ApiError::Encode(msg) => SyncError::Encode(msg),
        }
    }
}

impl From<CacheError> for SyncError {
    fn from(e: CacheError) -> Self {
        SyncError::Cache(e.0)
    }
}

impl From<WatchError> for SyncError {
    fn from(e: WatchError) -> Self {
        SyncError::Watch(e.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Decode(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_remote_failure_display_includes_body() {
        let err = SyncError::RemoteRequestFailed {
            operation: "update",
            status: 404,
            body: json!({"message": "Not Found"}),
        };
        assert_eq!(
            err.to_string(),
            r#"Unable to update gist: server returned 404: {"message":"Not Found"}"#
        );
    }

    #[test]
    fn test_api_error_conversion() {
        let err: SyncError = ApiError::Network("refused".to_string()).into();
        assert!(matches!(err, SyncError::Transport(msg) if msg == "refused"));

        let err: SyncError = ApiError::InvalidArgument("no id".to_string()).into();
        assert!(matches!(err, SyncError::InvalidArgument(_)));

        let err: SyncError = ApiError::Encode("bad body".to_string()).into();
        assert!(matches!(err, SyncError::Encode(msg) if msg == "bad body"));
    }
}
