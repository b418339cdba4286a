//! HTTP client for the four Gists endpoints gistsync uses.

use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::error::ApiError;
use crate::gist::GistRecord;

pub const DEFAULT_BASE_URL: &str = "https://api.github.com";
pub const DEFAULT_USER_AGENT: &str = "Gist Sync";
const DEFAULT_DESCRIPTION: &str = "Added via gist sync";

/// Raw response from the API: status code plus the decoded JSON body.
///
/// Bodies that are not JSON are carried as a JSON string, empty bodies as
/// `null`.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    /// Returns true for 4xx and 5xx responses.
    pub fn is_error(&self) -> bool {
        self.status >= 400
    }

    /// Deserializes the body into a typed value.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.body)
    }
}

/// The authenticated user, as returned by `GET /user`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub login: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Gists API client bound to one access token.
///
/// Cloning is cheap; the underlying connection pool is shared.
#[derive(Clone)]
pub struct GistsClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    user_agent: String,
}

impl std::fmt::Debug for GistsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GistsClient")
            .field("base_url", &self.base_url)
            .field("user_agent", &self.user_agent)
            .finish_non_exhaustive()
    }
}

impl GistsClient {
    /// Creates a client for api.github.com.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            token: token.into(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }

    /// Points the client at another API root (GitHub Enterprise, tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Returns a client with the same endpoint settings and a new token.
    pub fn with_token(&self, token: impl Into<String>) -> Self {
        Self {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            token: token.into(),
            user_agent: self.user_agent.clone(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET /users/{login}/gists`
    pub async fn list_gists_for_user(&self, login: &str) -> Result<ApiResponse, ApiError> {
        let endpoint = format!("/users/{}/gists", urlencoding::encode(login));
        self.request(Method::GET, &endpoint, None).await
    }

    /// `GET /user`
    pub async fn get_current_user(&self) -> Result<ApiResponse, ApiError> {
        self.request(Method::GET, "/user", None).await
    }

    /// `POST /gists`
    pub async fn create_gist(&self, record: &GistRecord) -> Result<ApiResponse, ApiError> {
        self.request(Method::POST, "/gists", Some(record)).await
    }

    /// `PATCH /gists/{id}`
    ///
    /// The record must already carry the id assigned by the server.
    pub async fn update_gist(&self, record: &GistRecord) -> Result<ApiResponse, ApiError> {
        let id = record.id.as_deref().ok_or_else(|| {
            ApiError::InvalidArgument("cannot update a gist without an id".to_string())
        })?;
        let endpoint = format!("/gists/{}", urlencoding::encode(id));
        self.request(Method::PATCH, &endpoint, Some(record)).await
    }

    async fn request(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&GistRecord>,
    ) -> Result<ApiResponse, ApiError> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), endpoint);

        let mut request = self
            .http
            .request(method, &url)
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .header(USER_AGENT, &self.user_agent)
            .header(ACCEPT, "application/vnd.github+json");

        if let Some(record) = body {
            request = request.json(&with_defaults(record)?);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;

        tracing::debug!(%url, status, "gists api response");

        Ok(ApiResponse {
            status,
            body: decode_body(text),
        })
    }
}

/// Lays the record's own fields over the default gist payload.
fn with_defaults(record: &GistRecord) -> Result<Value, ApiError> {
    let mut payload = json!({
        "public": false,
        "description": DEFAULT_DESCRIPTION,
    });
    let fields = serde_json::to_value(record).map_err(|e| ApiError::Encode(e.to_string()))?;
    if let (Value::Object(target), Value::Object(fields)) = (&mut payload, fields) {
        target.extend(fields);
    }
    Ok(payload)
}

fn decode_body(text: String) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    match serde_json::from_str(&text) {
        Ok(value) => value,
        Err(_) => Value::String(text),
    }
}
