//! Store-owner backend API client.
//!
//! Provides authenticated HTTP communication with the store-owner backend,
//! used for the OTP handshake, store CRUD, inventory writes, and order
//! accept/reject/verification. Responses are read as text and parsed
//! defensively so HTML error pages never crash a caller.

use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Default timeout for API requests (30 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for the lightweight auth endpoints (OTP start/verify).
const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// URL normalisation
// ---------------------------------------------------------------------------

/// Normalise the backend base URL:
/// - strip trailing slashes
/// - strip a trailing `/api` segment
/// - ensure a scheme is present (https, or http for LAN/localhost)
pub fn normalize_base_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    // Ensure scheme
    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost")
            || url.starts_with("127.0.0.1")
            || url.starts_with("192.168.")
        {
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

/// Failure classes for backend calls.
///
/// `Business` is an HTTP success whose body carries `success: false`;
/// `Conflict` is a backend rejection with a machine-readable `error_code`
/// (QR mismatch, order state, role mismatch).
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Network(String),
    #[error("Invalid response from backend: {0}")]
    Malformed(String),
    #[error("{message}")]
    Business { message: String },
    #[error("Session token is invalid or expired")]
    Unauthorized,
    #[error("{message}")]
    Conflict { code: String, message: String },
    #[error("{message}")]
    Http { status: u16, message: String },
}

impl ApiError {
    /// True for transport-level failures that never reached the backend.
    pub fn is_transport(&self) -> bool {
        matches!(self, ApiError::Network(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::Http { status: 404, .. })
    }
}

/// Convert a `reqwest::Error` into a user-friendly message.
fn friendly_error(url: &str, err: &reqwest::Error) -> ApiError {
    if err.is_connect() {
        return ApiError::Network(format!("Cannot reach backend at {url}"));
    }
    if err.is_timeout() {
        return ApiError::Network(format!("Connection to {url} timed out"));
    }
    if err.is_builder() {
        return ApiError::Network(format!("Invalid backend URL: {url}"));
    }
    ApiError::Network(format!("Network error communicating with {url}: {err}"))
}

/// Convert an HTTP status code into a user-friendly message.
fn status_error(status: StatusCode) -> String {
    match status.as_u16() {
        403 => "Account not allowed to manage this store".to_string(),
        404 => "Backend endpoint not found".to_string(),
        s if s >= 500 => format!("Backend server error (HTTP {s})"),
        s => format!("Unexpected response from backend (HTTP {s})"),
    }
}

// ---------------------------------------------------------------------------
// Backend handle
// ---------------------------------------------------------------------------

/// Handle to the store-owner backend. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Backend {
    base_url: String,
}

impl Backend {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: normalize_base_url(base_url),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Perform a request against the backend.
    ///
    /// `path` includes the leading slash, e.g. `/store-owner/stores`.
    /// `token` is the session bearer token; pass `None` for public endpoints.
    /// Extra headers (idempotency keys) go in `headers`.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<&Value>,
        headers: &[(&str, String)],
    ) -> Result<Value, ApiError> {
        let url = reqwest::Url::parse(&format!("{}{path}", self.base_url))
            .map_err(|e| ApiError::Network(format!("Invalid backend URL: {e}")))?;
        self.send(method, url, token, body, headers).await
    }

    async fn send(
        &self,
        method: Method,
        url: reqwest::Url,
        token: Option<&str>,
        body: Option<&Value>,
        headers: &[(&str, String)],
    ) -> Result<Value, ApiError> {
        let timeout = if url.path().starts_with("/auth") || url.path().starts_with("/api/auth") {
            AUTH_TIMEOUT
        } else {
            DEFAULT_TIMEOUT
        };
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Network(format!("Failed to create HTTP client: {e}")))?;

        let mut req = client.request(method, url);
        if let Some(token) = token {
            req = req.header("Authorization", format!("Bearer {token}"));
        }
        for (name, value) in headers {
            req = req.header(*name, value);
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| friendly_error(&self.base_url, &e))?;
        let status = resp.status();
        let raw = resp.text().await.unwrap_or_default();

        parse_response(status, &raw)
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<Value, ApiError> {
        self.request(Method::GET, path, token, None, &[]).await
    }

    /// GET with URL-encoded query parameters.
    pub async fn get_query(
        &self,
        path: &str,
        query: &[(&str, String)],
        token: Option<&str>,
    ) -> Result<Value, ApiError> {
        let mut url = reqwest::Url::parse(&format!("{}{path}", self.base_url))
            .map_err(|e| ApiError::Network(format!("Invalid backend URL: {e}")))?;
        {
            let mut qp = url.query_pairs_mut();
            for (k, v) in query {
                qp.append_pair(k, v);
            }
        }
        self.send(Method::GET, url, token, None, &[]).await
    }

    pub async fn post(
        &self,
        path: &str,
        token: Option<&str>,
        body: &Value,
    ) -> Result<Value, ApiError> {
        self.request(Method::POST, path, token, Some(body), &[])
            .await
    }

    pub async fn patch(
        &self,
        path: &str,
        token: Option<&str>,
        body: &Value,
    ) -> Result<Value, ApiError> {
        self.request(Method::PATCH, path, token, Some(body), &[])
            .await
    }
}

/// Classify a (status, body) pair into a parsed value or an `ApiError`.
///
/// The body is tolerated in three shapes: valid JSON, empty (204-style), or
/// garbage (HTML error page). A 2xx with `success: false` is a business
/// failure; a response carrying an `error_code` field is a domain conflict.
fn parse_response(status: StatusCode, raw: &str) -> Result<Value, ApiError> {
    let json: Option<Value> = if raw.trim().is_empty() {
        None
    } else {
        serde_json::from_str(raw.trim()).ok()
    };

    if status == StatusCode::UNAUTHORIZED {
        return Err(ApiError::Unauthorized);
    }

    if !status.is_success() {
        if let Some(ref body) = json {
            if let Some(err) = conflict_from_body(body) {
                return Err(err);
            }
            let message = body
                .get("error")
                .or_else(|| body.get("message"))
                .and_then(Value::as_str)
                .map(|s| s.to_string())
                .unwrap_or_else(|| status_error(status));
            return Err(ApiError::Http {
                status: status.as_u16(),
                message: format!("{message} (HTTP {})", status.as_u16()),
            });
        }
        return Err(ApiError::Http {
            status: status.as_u16(),
            message: format!("{} (HTTP {})", status_error(status), status.as_u16()),
        });
    }

    let body = match json {
        Some(v) => v,
        None if raw.trim().is_empty() => Value::Null,
        None => {
            let head: String = raw.chars().take(80).collect();
            return Err(ApiError::Malformed(format!("non-JSON body: {head}")));
        }
    };

    if body.get("success").and_then(Value::as_bool) == Some(false) {
        if let Some(err) = conflict_from_body(&body) {
            return Err(err);
        }
        let message = body
            .get("error")
            .or_else(|| body.get("message"))
            .and_then(Value::as_str)
            .unwrap_or("Request rejected by backend")
            .to_string();
        return Err(ApiError::Business { message });
    }

    Ok(body)
}

fn conflict_from_body(body: &Value) -> Option<ApiError> {
    let code = body.get("error_code").and_then(Value::as_str)?;
    let message = body
        .get("error")
        .or_else(|| body.get("message"))
        .and_then(Value::as_str)
        .unwrap_or(code)
        .to_string();
    Some(ApiError::Conflict {
        code: code.to_string(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_adds_scheme_and_strips_api_suffix() {
        assert_eq!(
            normalize_base_url("api.storekeep.app/api/"),
            "https://api.storekeep.app"
        );
        assert_eq!(normalize_base_url("localhost:3000/"), "http://localhost:3000");
        assert_eq!(
            normalize_base_url("192.168.0.111:3000"),
            "http://192.168.0.111:3000"
        );
        assert_eq!(
            normalize_base_url("https://api.storekeep.app"),
            "https://api.storekeep.app"
        );
    }

    #[test]
    fn success_false_is_business_failure() {
        let err = parse_response(
            StatusCode::OK,
            r#"{"success": false, "error": "Store is closed"}"#,
        )
        .expect_err("should be business failure");
        match err {
            ApiError::Business { message } => assert_eq!(message, "Store is closed"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn error_code_maps_to_conflict() {
        let err = parse_response(
            StatusCode::CONFLICT,
            r#"{"success": false, "error_code": "QR_ALREADY_USED", "error": "Token spent"}"#,
        )
        .expect_err("should be conflict");
        match err {
            ApiError::Conflict { code, message } => {
                assert_eq!(code, "QR_ALREADY_USED");
                assert_eq!(message, "Token spent");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn html_error_page_is_malformed_not_panic() {
        let err = parse_response(StatusCode::OK, "<html><body>404</body></html>")
            .expect_err("should be malformed");
        assert!(matches!(err, ApiError::Malformed(_)));
    }

    #[test]
    fn empty_body_on_success_is_null() {
        let v = parse_response(StatusCode::NO_CONTENT, "").expect("empty 204 is fine");
        assert!(v.is_null());
    }

    #[test]
    fn unauthorized_status_wins_over_body() {
        let err = parse_response(StatusCode::UNAUTHORIZED, r#"{"error": "bad token"}"#)
            .expect_err("401 should map to Unauthorized");
        assert!(matches!(err, ApiError::Unauthorized));
    }

    #[test]
    fn not_found_is_detectable_for_path_fallback() {
        let err = parse_response(StatusCode::NOT_FOUND, "").expect_err("404");
        assert!(err.is_not_found());
        assert!(!err.is_transport());
    }
}
