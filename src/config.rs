//! Configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `STOREKEEP_API_BASE_URL` - store-owner backend base URL
//!
//! ## Optional
//! - `STOREKEEP_SUPABASE_URL` - hosted database project URL
//! - `STOREKEEP_SUPABASE_ANON_KEY` - hosted database anon key
//! - `STOREKEEP_DATA_DIR` - local cache directory (default: `./.storekeep`)
//!
//! The Supabase pair enables the direct database read/write path; without
//! it every read falls through to the backend REST API.

use std::path::PathBuf;

use thiserror::Error;

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Hosted database (PostgREST) connection details.
#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    pub url: String,
    pub anon_key: String,
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Store-owner backend base URL (normalised, no trailing `/api`).
    pub api_base_url: String,
    /// Hosted database access; `None` disables the direct database path.
    pub supabase: Option<SupabaseConfig>,
    /// Directory for the local cache database and log files.
    pub data_dir: PathBuf,
}

impl Config {
    /// Load configuration from environment variables, reading a `.env` file
    /// first if one is present.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let api_base_url = get_required_env("STOREKEEP_API_BASE_URL")?;
        let api_base_url = crate::api::normalize_base_url(&api_base_url);
        if api_base_url.is_empty() {
            return Err(ConfigError::InvalidEnvVar(
                "STOREKEEP_API_BASE_URL".to_string(),
                "empty after normalisation".to_string(),
            ));
        }

        let supabase = match (
            get_optional_env("STOREKEEP_SUPABASE_URL"),
            get_optional_env("STOREKEEP_SUPABASE_ANON_KEY"),
        ) {
            (Some(url), Some(anon_key)) => Some(SupabaseConfig { url, anon_key }),
            (None, None) => None,
            // Half-configured pairs are a setup mistake, not a degraded mode
            (Some(_), None) => {
                return Err(ConfigError::MissingEnvVar(
                    "STOREKEEP_SUPABASE_ANON_KEY".to_string(),
                ))
            }
            (None, Some(_)) => {
                return Err(ConfigError::MissingEnvVar(
                    "STOREKEEP_SUPABASE_URL".to_string(),
                ))
            }
        };

        let data_dir = PathBuf::from(get_env_or_default("STOREKEEP_DATA_DIR", ".storekeep"));

        Ok(Self {
            api_base_url,
            supabase,
            data_dir,
        })
    }
}

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get an optional environment variable (empty counts as unset).
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    get_optional_env(key).unwrap_or_else(|| default.to_string())
}
