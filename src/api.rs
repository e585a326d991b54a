//! Shop backend API client.
//!
//! Provides HTTP communication with the storefront REST backend over a
//! cookie-based session, used by the catalog, checkout, orders, and admin
//! modules. Every request carries a hard timeout so a hung request surfaces
//! as a failure instead of leaving the caller pending forever.

use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Default timeout for API requests (30 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// URL normalisation
// ---------------------------------------------------------------------------

/// Normalise the shop backend URL:
/// - strip trailing slashes
/// - strip a trailing `/api` segment
/// - ensure a scheme is present (https, or http for localhost)
pub fn normalize_store_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    // Ensure scheme
    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    // Strip trailing slashes
    while url.ends_with('/') {
        url.pop();
    }

    // Strip trailing /api
    if url.ends_with("/api") {
        url.truncate(url.len() - 4);
    }

    // Strip trailing slashes again (in case "/api/" was present)
    while url.ends_with('/') {
        url.pop();
    }

    url
}

// ---------------------------------------------------------------------------
// Error taxonomy
// ---------------------------------------------------------------------------

/// Failure modes of a backend call: transport failure, a non-2xx status, or
/// a success response whose body could not be decoded. Each is terminal for
/// the triggering action; no retry policy exists anywhere in the client.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request never produced a response (connect, DNS, timeout).
    #[error("{0}")]
    Network(String),
    /// The backend answered with a non-success status.
    #[error("{message}")]
    Status { status: u16, message: String },
    /// The backend answered 2xx but the body was not usable JSON.
    #[error("Invalid JSON from the shop backend: {0}")]
    Decode(String),
}

impl ApiError {
    /// HTTP status code, when the backend produced a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True for transport-level failures where cached data is an acceptable
    /// fallback (the backend never saw the request).
    pub fn is_transport(&self) -> bool {
        matches!(self, ApiError::Network(_))
    }
}

/// Convert a `reqwest::Error` into a user-friendly message.
fn friendly_error(url: &str, err: &reqwest::Error) -> String {
    if err.is_connect() {
        return format!("Cannot reach the shop at {url}");
    }
    if err.is_timeout() {
        return format!("Connection to {url} timed out");
    }
    if err.is_builder() {
        return format!("Invalid shop URL: {url}");
    }
    format!("Network error communicating with {url}: {err}")
}

/// Convert an HTTP status code into a user-friendly message.
fn status_message(status: StatusCode) -> String {
    match status.as_u16() {
        401 => "You need to sign in first".to_string(),
        403 => "You do not have permission to do that".to_string(),
        404 => "Not found".to_string(),
        s if s >= 500 => format!("Shop server error (HTTP {s})"),
        s => format!("Unexpected response from the shop (HTTP {s})"),
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// HTTP client bound to one shop backend. Holds the cookie jar that carries
/// the session credential across requests, so one instance must be shared by
/// everything that acts on behalf of the signed-in user.
pub struct ApiClient {
    http: Client,
    base_url: String,
}

impl ApiClient {
    /// Build a client for the given backend URL (normalised on the way in).
    pub fn new(store_url: &str) -> Result<Self, String> {
        if store_url.trim().is_empty() {
            return Err("Missing store URL".into());
        }
        let base_url = normalize_store_url(store_url);
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .cookie_store(true)
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {e}"))?;
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Perform a request against an `/api/...` path.
    ///
    /// Returns the JSON body, or `Value::Null` for empty 204-style responses.
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, ApiError> {
        let full_url = format!("{}{path}", self.base_url);

        let mut req = self
            .http
            .request(method, &full_url)
            .header("Accept", "application/json");
        if let Some(b) = body {
            req = req.json(b);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| ApiError::Network(friendly_error(&self.base_url, &e)))?;
        let status = resp.status();
        let body_text = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                message: extract_error_message(&body_text, status),
            });
        }

        if body_text.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body_text).map_err(|e| ApiError::Decode(e.to_string()))
    }

    pub async fn get(&self, path: &str) -> Result<Value, ApiError> {
        self.request(Method::GET, path, None).await
    }

    pub async fn post(&self, path: &str, body: &Value) -> Result<Value, ApiError> {
        self.request(Method::POST, path, Some(body)).await
    }

    pub async fn put(&self, path: &str, body: &Value) -> Result<Value, ApiError> {
        self.request(Method::PUT, path, Some(body)).await
    }

    pub async fn patch(&self, path: &str, body: Option<&Value>) -> Result<Value, ApiError> {
        self.request(Method::PATCH, path, body).await
    }

    pub async fn delete(&self, path: &str) -> Result<Value, ApiError> {
        self.request(Method::DELETE, path, None).await
    }

    /// Upload a file as multipart form data (used by `POST /api/upload`).
    pub async fn post_multipart(
        &self,
        path: &str,
        file_name: &str,
        bytes: Vec<u8>,
        mime: &str,
    ) -> Result<Value, ApiError> {
        let full_url = format!("{}{path}", self.base_url);

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(mime)
            .map_err(|e| ApiError::Network(format!("Invalid upload mime type: {e}")))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let resp = self
            .http
            .post(&full_url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ApiError::Network(friendly_error(&self.base_url, &e)))?;
        let status = resp.status();
        let body_text = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            warn!(status = status.as_u16(), path, "upload rejected");
            return Err(ApiError::Status {
                status: status.as_u16(),
                message: extract_error_message(&body_text, status),
            });
        }
        if body_text.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body_text).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

/// Pull the most specific error text available out of a failure body.
/// Backends answer with `{"message": ...}`, `{"error": ...}`, or plain text;
/// fall back to the generic status message otherwise.
fn extract_error_message(body_text: &str, status: StatusCode) -> String {
    if let Ok(json) = serde_json::from_str::<Value>(body_text) {
        if let Some(msg) = json
            .get("message")
            .or_else(|| json.get("error"))
            .and_then(Value::as_str)
        {
            let trimmed = msg.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
    }
    let trimmed = body_text.trim();
    if !trimmed.is_empty() && !trimmed.starts_with('{') && !trimmed.starts_with('<') {
        return trimmed.to_string();
    }
    status_message(status)
}

// ===========================================================================
// Tests
// ===========================================================================
