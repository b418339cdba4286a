//! API client error types.

use thiserror::Error;

/// Errors raised by the API client itself.
///
/// Error responses from the server are not errors at this layer; they come
/// back as an [`ApiResponse`](super::ApiResponse) with their status code.
#[derive(Error, Debug, Clone)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Failed to encode request body: {0}")]
    Encode(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        ApiError::Network(e.to_string())
    }
}
