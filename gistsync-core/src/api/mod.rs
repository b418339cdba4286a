//! Authenticated client for the GitHub Gists REST API.
//!
//! The client only moves requests and responses. It never interprets a
//! status code; callers decide what an error response means.

mod client;
mod error;

pub use client::{ApiResponse, GistsClient, UserProfile, DEFAULT_BASE_URL, DEFAULT_USER_AGENT};
pub use error::ApiError;
