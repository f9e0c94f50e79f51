//! Store records and the online/offline availability toggle.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::inventory::{self, OfflineResetReport};
use crate::Client;

/// A store as returned by `GET /store-owner/stores`. Owners currently
/// operate a single store; callers take the first row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Store {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub delivery_radius_km: f64,
    #[serde(default)]
    pub is_active: bool,
}

/// Fetch the caller's stores. `user_id` narrows the query on deployments
/// where one login can own several stores.
pub async fn fetch_stores(
    client: &Client,
    token: &str,
    user_id: Option<&str>,
) -> Result<Vec<Store>, String> {
    let path = match user_id {
        Some(uid) => format!("/store-owner/stores?userId={uid}"),
        None => "/store-owner/stores".to_string(),
    };
    let resp = client
        .backend
        .get(&path, Some(token))
        .await
        .map_err(|e| e.to_string())?;

    let rows = resp
        .get("stores")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let stores = rows
        .into_iter()
        .filter_map(|row| serde_json::from_value::<Store>(row).ok())
        .collect();
    Ok(stores)
}

/// Flip the store's online flag.
///
/// Going offline also zeroes every stock row that still has quantity, so
/// customers never see orderable items from a closed store. That bulk reset
/// is a compensating pass, not a silent loop: the returned report says
/// exactly which rows were reset and which failed, and `retry_failed`
/// reconciles the stragglers. Local caches are cleared in all cases.
pub async fn set_store_online(
    client: &Client,
    token: &str,
    store_id: &str,
    active: bool,
) -> Result<Option<OfflineResetReport>, String> {
    client
        .backend
        .patch(
            &format!("/store-owner/stores/{store_id}/online"),
            Some(token),
            &json!({ "is_active": active }),
        )
        .await
        .map_err(|e| e.to_string())?;

    info!(store_id, active, "store availability updated");

    if active {
        return Ok(None);
    }

    let report = inventory::reset_store_stock(client, token, store_id).await;
    if !report.failed.is_empty() {
        warn!(
            store_id,
            failed = report.failed.len(),
            "offline stock reset left rows unreset"
        );
    }
    Ok(Some(report))
}
