//! Storekeep - headless store-owner client.
//!
//! Library core behind the store dashboard app: phone/OTP authentication,
//! store availability, inventory reconciliation, and the incoming-order
//! accept/reject flow. UI shells drive the modules below and render the
//! intake event stream; nothing in this crate draws or blocks on a user.

use std::path::Path;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod intake;
pub mod inventory;
pub mod orders;
pub mod session;
pub mod stores;
pub mod supabase;

pub use config::Config;

/// Read the first present, non-empty string under any of `keys`.
/// Backend responses spell the same concept several ways; every lookup that
/// tolerates that goes through here.
pub(crate) fn value_str(v: &serde_json::Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(s) = v.get(*key).and_then(|x| x.as_str()) {
            let trimmed = s.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

pub(crate) fn value_f64(v: &serde_json::Value, keys: &[&str]) -> Option<f64> {
    for key in keys {
        if let Some(n) = v.get(*key).and_then(|x| x.as_f64()) {
            return Some(n);
        }
    }
    None
}

pub(crate) fn value_i64(v: &serde_json::Value, keys: &[&str]) -> Option<i64> {
    for key in keys {
        if let Some(n) = v.get(*key).and_then(|x| x.as_i64()) {
            return Some(n);
        }
    }
    None
}

/// Initialize structured logging (console + rolling daily file).
///
/// Call once from the embedding shell. The appender guard is intentionally
/// leaked; the subscriber lives until process exit.
pub fn init_logging(log_dir: &Path) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,storekeep=debug"));

    std::fs::create_dir_all(log_dir).ok();
    let file_appender = tracing_appender::rolling::daily(log_dir, "storekeep");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer().with_target(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    std::mem::forget(guard);

    info!("Storekeep v{} logging initialized", env!("CARGO_PKG_VERSION"));
}

/// Everything a signed-in screen needs: the backend, the optional direct
/// database path, and the local cache. Built once at startup and shared.
#[derive(Clone)]
pub struct Client {
    pub backend: api::Backend,
    pub supabase: Option<supabase::SupabaseClient>,
    pub db: Arc<db::DbState>,
}

impl Client {
    /// Build a client from configuration, opening the local cache database
    /// under `config.data_dir`.
    pub fn new(config: &Config) -> Result<Self, String> {
        let db = db::init(&config.data_dir)?;
        Ok(Self {
            backend: api::Backend::new(&config.api_base_url),
            supabase: config.supabase.as_ref().map(supabase::SupabaseClient::new),
            db: Arc::new(db),
        })
    }

    /// Log out: drop the persisted session and every cached inventory row.
    pub fn logout(&self) -> Result<(), String> {
        session::clear_session(&self.db)
    }
}
