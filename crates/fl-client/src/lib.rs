//! HTTP client for the FocusLens backend.
//!
//! Provides:
//! - Usage records for applications and browser tabs
//! - The productive-key allow-list used by the focus classifier
//! - The todo feed consumed by the alert monitor, including snooze write-back

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use fl_core::{ItemFeed, ItemId, ProductiveKeys, RawAlertableItem, UsageBatch, UsagePayload};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Default request timeout for API calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const TODOS_PATH: &str = "/api/todos";

/// Backend client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The configured base URL is not an absolute http(s) URL.
    #[error("invalid backend URL {url:?}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },
    /// Failed to build HTTP client.
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
    /// HTTP request failed.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// Backend answered with a non-success status.
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },
    /// Failed to parse response.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Which usage endpoint to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UsageSource {
    /// Desktop application usage.
    #[default]
    Apps,
    /// Browser tab visits.
    Tabs,
}

impl UsageSource {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Apps => "apps",
            Self::Tabs => "tabs",
        }
    }

    const fn path(self) -> &'static str {
        match self {
            Self::Apps => "/app-usage",
            Self::Tabs => "/tabs",
        }
    }
}

impl fmt::Display for UsageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for UsageSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "apps" => Ok(Self::Apps),
            "tabs" => Ok(Self::Tabs),
            other => Err(format!("unknown usage source {other:?} (expected apps or tabs)")),
        }
    }
}

/// FocusLens backend client.
///
/// # Thread Safety
///
/// The client is safe to clone and share across threads. Each clone shares
/// the underlying HTTP connection pool.
#[derive(Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    base_url: Url,
    api_token: Option<String>,
}

impl fmt::Debug for BackendClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendClient")
            .field("base_url", &self.base_url.as_str())
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

impl BackendClient {
    /// Creates a client for the backend at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is not absolute http(s), or if the HTTP
    /// client fails to build.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let invalid = |reason: String| ClientError::InvalidBaseUrl {
            url: base_url.to_string(),
            reason,
        };

        let base_url = Url::parse(base_url.trim()).map_err(|err| invalid(err.to_string()))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme {:?}", base_url.scheme())));
        }

        // Build HTTP client with timeout
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ClientError::ClientBuild)?;

        Ok(Self {
            http,
            base_url,
            api_token: None,
        })
    }

    /// Sends `Authorization: Bearer <token>` with every request. Blank tokens are ignored.
    #[must_use]
    pub fn with_api_token(mut self, token: Option<String>) -> Self {
        self.api_token = token.filter(|t| !t.trim().is_empty());
        self
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// Fetches and normalizes usage records.
    ///
    /// Records that fail to normalize are returned in [`UsageBatch::rejected`]
    /// rather than failing the request.
    pub async fn fetch_usage(&self, source: UsageSource) -> Result<UsageBatch, ClientError> {
        let body = self.get(&self.endpoint(source.path(), &[])?).await?;
        let batch = parse_usage(&body)?;
        debug!(
            %source,
            count = batch.records.len(),
            rejected = batch.rejected.len(),
            "fetched usage records"
        );
        Ok(batch)
    }

    /// Fetches the productive-key allow-list from `path` (relative to the base URL).
    pub async fn fetch_productive_keys(&self, path: &str) -> Result<ProductiveKeys, ClientError> {
        let body = self.get(&self.endpoint(path, &[])?).await?;
        let keys = parse_productive_keys(&body)?;
        debug!(count = keys.len(), "fetched productive keys");
        Ok(keys)
    }

    /// Fetches the open todos.
    pub async fn fetch_todos(&self) -> Result<Vec<RawAlertableItem>, ClientError> {
        let mut url = self.endpoint(TODOS_PATH, &[])?;
        url.query_pairs_mut().append_pair("completed", "false");
        let body = self.get(&url).await?;
        let todos = parse_todos(&body)?;
        debug!(count = todos.len(), "fetched todos");
        Ok(todos)
    }

    /// Writes a new due date for a todo.
    pub async fn update_todo_due_date(
        &self,
        item_id: &ItemId,
        due_at: DateTime<Utc>,
    ) -> Result<(), ClientError> {
        let url = self.endpoint(TODOS_PATH, &[item_id.as_str()])?;
        let request = self.authorize(self.http.put(url)).json(&DueDateUpdate {
            due_date: due_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        });
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(api_error(status, &body));
        }
        debug!(%item_id, %due_at, "updated todo due date");
        Ok(())
    }

    /// Joins `path` onto the base URL, then appends each of `segments` percent-encoded.
    fn endpoint(&self, path: &str, segments: &[&str]) -> Result<Url, ClientError> {
        let joined = format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        let mut url = Url::parse(&joined).map_err(|err| ClientError::InvalidBaseUrl {
            url: joined.clone(),
            reason: err.to_string(),
        })?;
        if !segments.is_empty() {
            let mut parts = url
                .path_segments_mut()
                .map_err(|()| ClientError::InvalidBaseUrl {
                    url: joined.clone(),
                    reason: "URL cannot have path segments".to_string(),
                })?;
            parts.pop_if_empty().extend(segments);
        }
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get(&self, url: &Url) -> Result<String, ClientError> {
        let response = self.authorize(self.http.get(url.clone())).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(api_error(status, &body));
        }
        Ok(body)
    }
}

impl ItemFeed for BackendClient {
    type Error = ClientError;

    fn fetch_items(
        &self,
    ) -> impl Future<Output = Result<Vec<RawAlertableItem>, Self::Error>> + Send {
        self.fetch_todos()
    }

    fn update_due_date(
        &self,
        item_id: &ItemId,
        due_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        self.update_todo_due_date(item_id, due_at)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DueDateUpdate {
    due_date: String,
}

/// Parses any usage payload shape into canonical records.
///
/// Only an unrecognizable payload is an error; bad records are collected.
pub fn parse_usage(body: &str) -> Result<UsageBatch, ClientError> {
    let payload: UsagePayload =
        serde_json::from_str(body).map_err(|err| ClientError::InvalidResponse(err.to_string()))?;
    Ok(payload.into_batch())
}

/// Parses the allow-list: a bare array of keys, or `{ "data": [...] }`.
pub fn parse_productive_keys(body: &str) -> Result<ProductiveKeys, ClientError> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Payload {
        List(Vec<String>),
        Wrapped { data: Vec<String> },
    }

    let payload: Payload =
        serde_json::from_str(body).map_err(|err| ClientError::InvalidResponse(err.to_string()))?;
    let (Payload::List(keys) | Payload::Wrapped { data: keys }) = payload;
    Ok(ProductiveKeys::new(
        keys.into_iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty()),
    ))
}

/// Parses the todo feed: `{ "data": [...] }` or a bare array.
pub fn parse_todos(body: &str) -> Result<Vec<RawAlertableItem>, ClientError> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Payload {
        Wrapped { data: Vec<RawAlertableItem> },
        List(Vec<RawAlertableItem>),
    }

    let payload: Payload =
        serde_json::from_str(body).map_err(|err| ClientError::InvalidResponse(err.to_string()))?;
    let (Payload::Wrapped { data: todos } | Payload::List(todos)) = payload;
    Ok(todos)
}

fn api_error(status: reqwest::StatusCode, body: &str) -> ClientError {
    let message = parse_error_message(body).unwrap_or_else(|| {
        if body.trim().is_empty() {
            status.canonical_reason().unwrap_or("no response body").to_string()
        } else {
            body.trim().to_string()
        }
    });
    ClientError::Api {
        status: status.as_u16(),
        message,
    }
}

/// Extracts `message` or `error` from a JSON error body.
fn parse_error_message(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorPayload {
        message: Option<String>,
        error: Option<String>,
    }

    serde_json::from_str::<ErrorPayload>(body)
        .ok()
        .and_then(|payload| payload.message.or(payload.error))
}
