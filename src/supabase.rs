//! Hosted database (PostgREST) client.
//!
//! Thin REST access to the shared `products`, `master_products`, and
//! `stores` tables. Filters use PostgREST operator syntax, e.g.
//! `("store_id", "eq.abc")` or `("quantity", "gt.0")`, which also gives the
//! offline reset a single-request batch update across matching rows.

use reqwest::{Method, Url};
use serde_json::Value;
use std::time::Duration;

use crate::config::SupabaseConfig;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Handle to the hosted database REST endpoint. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SupabaseClient {
    url: String,
    anon_key: String,
}

impl SupabaseClient {
    pub fn new(config: &SupabaseConfig) -> Self {
        Self {
            url: config.url.trim_end_matches('/').to_string(),
            anon_key: config.anon_key.clone(),
        }
    }

    async fn request(
        &self,
        method: Method,
        table: &str,
        params: &[(&str, String)],
        body: Option<&Value>,
        prefer: Option<&str>,
    ) -> Result<Value, String> {
        let mut url = Url::parse(&format!("{}/rest/v1/{table}", self.url))
            .map_err(|e| format!("Invalid Supabase URL: {e}"))?;
        {
            let mut qp = url.query_pairs_mut();
            for (k, v) in params {
                qp.append_pair(k, v);
            }
        }

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| format!("HTTP client error: {e}"))?;

        let mut req = client
            .request(method, url)
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", self.anon_key))
            .header("Content-Type", "application/json");
        if let Some(prefer) = prefer {
            req = req.header("Prefer", prefer);
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| format!("Supabase request failed: {e}"))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(format!("Supabase error ({status}): {body}"));
        }
        let raw = resp.text().await.unwrap_or_default();
        if raw.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&raw).map_err(|e| format!("Supabase JSON parse error: {e}"))
    }

    /// `GET /rest/v1/{table}?{params}` - returns the row array.
    pub async fn select(&self, table: &str, params: &[(&str, String)]) -> Result<Value, String> {
        self.request(Method::GET, table, params, None, None).await
    }

    /// `PATCH /rest/v1/{table}?{filters}` - updates every matching row and
    /// returns the updated rows (`Prefer: return=representation`).
    pub async fn update(
        &self,
        table: &str,
        filters: &[(&str, String)],
        body: &Value,
    ) -> Result<Value, String> {
        self.request(
            Method::PATCH,
            table,
            filters,
            Some(body),
            Some("return=representation"),
        )
        .await
    }

    /// `POST /rest/v1/{table}` - inserts and returns the created rows.
    pub async fn insert(&self, table: &str, body: &Value) -> Result<Value, String> {
        self.request(
            Method::POST,
            table,
            &[],
            Some(body),
            Some("return=representation"),
        )
        .await
    }
}
