//! Inventory reconciliation: one authoritative product list per store.
//!
//! The merged view joins the shared master catalog with the store's stock
//! rows, keyed by master product id. Reads walk a priority chain - local
//! cache, hosted database, backend REST - and quantity writes invalidate
//! the cache so the next read re-fetches. The cache handle travels in the
//! `Client`; there is no module-level snapshot shared between screens.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::db;
use crate::Client;

/// Cache key for the full merged-inventory snapshot (`{ "products": [...] }`).
pub const INVENTORY_SNAPSHOT_KEY: &str = "inventory_persisted_state";
/// Cache key for the plain stock-list array.
pub const INVENTORY_LIST_KEY: &str = "inventory_products_cache";

const FALLBACK_PRODUCT_NAME: &str = "Product";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A shared catalog entry. Read-only from this client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MasterProduct {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub subcategory: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub base_price: f64,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

/// A store's stock row for one catalog entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreProductRow {
    pub id: String,
    pub store_id: String,
    pub master_product_id: String,
    pub quantity: i64,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub in_stock: bool,
}

impl StoreProductRow {
    /// Parse a stock row from any of the shapes the backend and the hosted
    /// database return. The master product id alone appears under four
    /// spellings; a row without one is dropped by callers.
    pub fn from_json(v: &Value) -> Option<Self> {
        let id = crate::value_str(v, &["id"])?;
        let master_product_id = crate::value_str(v, &["master_product_id", "masterProductId", "product_id"])
            .or_else(|| {
                v.get("master_product")
                    .and_then(|mp| crate::value_str(mp, &["id"]))
            })?;
        let quantity = crate::value_i64(v, &["quantity"]).unwrap_or(0).max(0);
        Some(Self {
            id,
            store_id: crate::value_str(v, &["store_id", "storeId"]).unwrap_or_default(),
            master_product_id,
            quantity,
            is_active: v.get("is_active").and_then(Value::as_bool).unwrap_or(true),
            in_stock: quantity > 0,
        })
    }

    /// Display name, when the source embeds one (backend rows do, database
    /// rows don't).
    fn name_hint(v: &Value) -> Option<String> {
        crate::value_str(v, &["name", "product_name"]).or_else(|| {
            v.get("master_product")
                .and_then(|mp| crate::value_str(mp, &["name"]))
        })
    }
}

/// One row of the merged inventory view: exactly one per master product id,
/// quantity ≥ 0, `store_product_id` present only when a stock row exists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MergedProduct {
    /// Master product id (orphan stock keeps its master reference here).
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub image_url: Option<String>,
    pub quantity: i64,
    #[serde(default)]
    pub store_product_id: Option<String>,
}

/// One row of the "your stock" list: only catalog entries the store carries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StockItem {
    /// Master product id.
    pub id: String,
    /// Stock row id in the `products` table.
    pub store_product_id: String,
    pub name: String,
    pub quantity: i64,
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Merge the catalog with a store's stock rows.
///
/// Every catalog entry yields exactly one merged row (quantity from its
/// stock row or 0). Stock rows whose master id is absent from the catalog
/// are appended after the catalog rows as catalog-less entries.
pub fn merge_catalog_with_stock(
    catalog: &[MasterProduct],
    stock: &[StoreProductRow],
) -> Vec<MergedProduct> {
    let mut by_master_id: HashMap<&str, &StoreProductRow> = HashMap::new();
    for row in stock {
        by_master_id.insert(row.master_product_id.as_str(), row);
    }

    let mut merged: Vec<MergedProduct> = catalog
        .iter()
        .map(|mp| {
            let row = by_master_id.remove(mp.id.as_str());
            MergedProduct {
                id: mp.id.clone(),
                name: mp.name.clone(),
                brand: mp.brand.clone(),
                category: mp.category.clone(),
                unit: mp.unit.clone(),
                price: mp.base_price,
                image_url: mp.image_url.clone(),
                quantity: row.map(|r| r.quantity.max(0)).unwrap_or(0),
                store_product_id: row.map(|r| r.id.clone()),
            }
        })
        .collect();

    // Orphan stock: rows the catalog no longer lists (custom or retired
    // products) stay visible so their quantity can still be managed.
    let mut orphans: Vec<&StoreProductRow> = by_master_id.into_values().collect();
    orphans.sort_by(|a, b| a.id.cmp(&b.id));
    for row in orphans {
        merged.push(MergedProduct {
            id: row.master_product_id.clone(),
            name: FALLBACK_PRODUCT_NAME.to_string(),
            brand: None,
            category: None,
            unit: None,
            price: 0.0,
            image_url: None,
            quantity: row.quantity.max(0),
            store_product_id: Some(row.id.clone()),
        });
    }

    merged
}

// ---------------------------------------------------------------------------
// Read path
// ---------------------------------------------------------------------------

/// Load the merged inventory for a store.
///
/// Priority order: local cache, hosted database, backend REST, empty list.
/// A successful live read refreshes the cache snapshot. Failures along the
/// chain degrade silently (logged) - the caller always gets a list.
pub async fn load_inventory(client: &Client, token: &str, store_id: &str) -> Vec<MergedProduct> {
    if let Some(cached) = read_snapshot_cache(client, store_id) {
        debug!(store_id, rows = cached.len(), "inventory served from cache");
        return cached;
    }

    match load_inventory_live(client, token, store_id).await {
        Ok(merged) => {
            let snapshot = json!({ "products": merged });
            if let Err(e) =
                db::write_inventory_cache(&client.db, INVENTORY_SNAPSHOT_KEY, store_id, &snapshot)
            {
                warn!(store_id, error = %e, "failed to cache inventory snapshot");
            }
            merged
        }
        Err(e) => {
            warn!(store_id, error = %e, "inventory load failed on every source");
            Vec::new()
        }
    }
}

fn read_snapshot_cache(client: &Client, store_id: &str) -> Option<Vec<MergedProduct>> {
    let raw = db::read_inventory_cache(&client.db, INVENTORY_SNAPSHOT_KEY, store_id)?;
    let products = raw.get("products")?.as_array()?.clone();
    let parsed: Vec<MergedProduct> = products
        .into_iter()
        .filter_map(|p| serde_json::from_value(p).ok())
        .collect();
    if parsed.is_empty() {
        return None;
    }
    Some(parsed)
}

async fn load_inventory_live(
    client: &Client,
    token: &str,
    store_id: &str,
) -> Result<Vec<MergedProduct>, String> {
    if let Some(supabase) = &client.supabase {
        match load_inventory_from_db(supabase, store_id).await {
            Ok(merged) => return Ok(merged),
            Err(e) => warn!(store_id, error = %e, "database inventory read failed, trying REST"),
        }
    }
    load_inventory_from_rest(client, token, store_id).await
}

async fn load_inventory_from_db(
    supabase: &crate::supabase::SupabaseClient,
    store_id: &str,
) -> Result<Vec<MergedProduct>, String> {
    let catalog_raw = supabase
        .select("master_products", &[("select", "*".to_string())])
        .await?;
    let stock_raw = supabase
        .select(
            "products",
            &[
                (
                    "select",
                    "id,store_id,master_product_id,quantity,is_active,in_stock".to_string(),
                ),
                ("store_id", format!("eq.{store_id}")),
                ("order", "created_at.asc".to_string()),
            ],
        )
        .await?;

    let catalog = parse_master_products(&catalog_raw);
    let stock = parse_stock_rows(&stock_raw);
    Ok(merge_catalog_with_stock(&catalog, &stock))
}

async fn load_inventory_from_rest(
    client: &Client,
    token: &str,
    store_id: &str,
) -> Result<Vec<MergedProduct>, String> {
    let catalog_raw = client
        .backend
        .get("/api/products/master-products?isActive=true", None)
        .await
        .map_err(|e| e.to_string())?;
    let stock_raw = client
        .backend
        .get(
            &format!("/store-owner/stores/{store_id}/products"),
            Some(token),
        )
        .await
        .map_err(|e| e.to_string())?;

    let catalog = parse_master_products(&catalog_raw);
    let stock = parse_stock_rows(&stock_raw);
    Ok(merge_catalog_with_stock(&catalog, &stock))
}

/// Catalog responses arrive as a bare array or wrapped under `products`.
fn parse_master_products(raw: &Value) -> Vec<MasterProduct> {
    let rows = raw
        .as_array()
        .cloned()
        .or_else(|| raw.get("products").and_then(Value::as_array).cloned())
        .unwrap_or_default();
    rows.into_iter()
        .filter_map(|row| serde_json::from_value(row).ok())
        .collect()
}

/// Stock responses arrive as `{ products: [...] }`, `{ data: [...] }`, or a
/// bare array.
fn parse_stock_rows(raw: &Value) -> Vec<StoreProductRow> {
    let rows = raw
        .get("products")
        .and_then(Value::as_array)
        .or_else(|| raw.get("data").and_then(Value::as_array))
        .or_else(|| raw.as_array())
        .cloned()
        .unwrap_or_default();
    rows.iter().filter_map(StoreProductRow::from_json).collect()
}

// ---------------------------------------------------------------------------
// Stock list ("your stock" view)
// ---------------------------------------------------------------------------

/// Load the store's stock list: only rows the store carries, master names
/// joined in, sorted by quantity descending. Same source chain as
/// `load_inventory`.
pub async fn stock_list(client: &Client, token: &str, store_id: &str) -> Vec<StockItem> {
    if let Some(cached) = read_list_cache(client, store_id) {
        return cached;
    }

    let result = match &client.supabase {
        Some(supabase) => stock_list_from_db(supabase, store_id).await,
        None => Err("no database configured".to_string()),
    };
    let mut items = match result {
        Ok(items) => items,
        Err(db_err) => {
            debug!(store_id, error = %db_err, "stock list database read failed, trying REST");
            match stock_list_from_rest(client, token, store_id).await {
                Ok(items) => items,
                Err(e) => {
                    warn!(store_id, error = %e, "stock list load failed on every source");
                    return Vec::new();
                }
            }
        }
    };

    items.sort_by(|a, b| b.quantity.cmp(&a.quantity));
    if let Err(e) = db::write_inventory_cache(
        &client.db,
        INVENTORY_LIST_KEY,
        store_id,
        &serde_json::to_value(&items).unwrap_or(Value::Null),
    ) {
        warn!(store_id, error = %e, "failed to cache stock list");
    }
    items
}

fn read_list_cache(client: &Client, store_id: &str) -> Option<Vec<StockItem>> {
    let raw = db::read_inventory_cache(&client.db, INVENTORY_LIST_KEY, store_id)?;
    let items: Vec<StockItem> = serde_json::from_value(raw).ok()?;
    if items.is_empty() {
        return None;
    }
    Some(items)
}

async fn stock_list_from_db(
    supabase: &crate::supabase::SupabaseClient,
    store_id: &str,
) -> Result<Vec<StockItem>, String> {
    let stock_raw = supabase
        .select(
            "products",
            &[
                (
                    "select",
                    "id,store_id,master_product_id,quantity,is_active,in_stock".to_string(),
                ),
                ("store_id", format!("eq.{store_id}")),
                ("order", "created_at.asc".to_string()),
            ],
        )
        .await?;
    let names_raw = supabase
        .select("master_products", &[("select", "id,name".to_string())])
        .await?;

    let mut name_by_id: HashMap<String, String> = HashMap::new();
    for row in names_raw.as_array().map(Vec::as_slice).unwrap_or(&[]) {
        if let (Some(id), Some(name)) = (
            crate::value_str(row, &["id"]),
            crate::value_str(row, &["name"]),
        ) {
            name_by_id.insert(id, name);
        }
    }

    Ok(parse_stock_rows(&stock_raw)
        .into_iter()
        .map(|row| {
            let name = name_by_id
                .get(&row.master_product_id)
                .cloned()
                .unwrap_or_else(|| FALLBACK_PRODUCT_NAME.to_string());
            StockItem {
                id: row.master_product_id,
                store_product_id: row.id,
                name,
                quantity: row.quantity,
            }
        })
        .collect())
}

async fn stock_list_from_rest(
    client: &Client,
    token: &str,
    store_id: &str,
) -> Result<Vec<StockItem>, String> {
    let stock_raw = client
        .backend
        .get(
            &format!("/store-owner/stores/{store_id}/products"),
            Some(token),
        )
        .await
        .map_err(|e| e.to_string())?;

    let rows = stock_raw
        .get("products")
        .and_then(Value::as_array)
        .or_else(|| stock_raw.get("data").and_then(Value::as_array))
        .or_else(|| stock_raw.as_array())
        .cloned()
        .unwrap_or_default();

    Ok(rows
        .iter()
        .filter_map(|raw| {
            let row = StoreProductRow::from_json(raw)?;
            let name = StoreProductRow::name_hint(raw)
                .unwrap_or_else(|| FALLBACK_PRODUCT_NAME.to_string());
            Some(StockItem {
                id: row.master_product_id,
                store_product_id: row.id,
                name,
                quantity: row.quantity,
            })
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Write path
// ---------------------------------------------------------------------------

/// Outcome of a successful quantity write.
#[derive(Debug, Clone, PartialEq)]
pub enum QuantityOutcome {
    /// Existing stock row updated.
    Updated { quantity: i64 },
    /// First stock for this catalog entry - a row now exists.
    Created {
        quantity: i64,
        store_product_id: Option<String>,
    },
    /// No stock row and target quantity 0: nothing to do.
    Noop,
}

/// A failed quantity write. Carries the pre-write quantity so the caller
/// can revert its optimistic display (rollback invariant).
#[derive(Debug, Clone, PartialEq)]
pub struct QuantityError {
    pub previous_quantity: i64,
    pub message: String,
}

impl std::fmt::Display for QuantityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.message.fmt(f)
    }
}

fn clamp_quantity(quantity: i64) -> i64 {
    quantity.max(0)
}

/// Apply a quantity edit for one merged row.
///
/// The caller applies the optimistic display update before calling; on
/// `Err` it reverts to `previous_quantity`. Routing: existing row → PATCH,
/// no row and quantity > 0 → insert-or-create, no row and quantity 0 →
/// no-op. Every successful write invalidates the store's cache keys. No
/// automatic retry.
pub async fn set_quantity(
    client: &Client,
    token: &str,
    store_id: &str,
    row: &MergedProduct,
    new_quantity: i64,
) -> Result<QuantityOutcome, QuantityError> {
    let quantity = clamp_quantity(new_quantity);
    let previous_quantity = clamp_quantity(row.quantity);
    let fail = |message: String| QuantityError {
        previous_quantity,
        message,
    };

    if let Some(store_product_id) = &row.store_product_id {
        client
            .backend
            .patch(
                &format!("/store-owner/products/{store_product_id}"),
                Some(token),
                &json!({ "quantity": quantity }),
            )
            .await
            .map_err(|e| fail(e.to_string()))?;

        invalidate_after_write(client, store_id);
        info!(store_id, store_product_id = %store_product_id, quantity, "quantity updated");
        return Ok(QuantityOutcome::Updated { quantity });
    }

    if quantity == 0 {
        return Ok(QuantityOutcome::Noop);
    }

    let store_product_id = if let Some(supabase) = &client.supabase {
        upsert_store_product(supabase, store_id, &row.id, quantity)
            .await
            .map(Some)
            .map_err(fail)?
    } else {
        let body = json!({
            "items": [{
                "masterProductId": row.id,
                "price": row.price,
                "quantity": quantity,
            }]
        });
        client
            .backend
            .post(
                &format!("/store-owner/stores/{store_id}/products/bulk-from-master"),
                Some(token),
                &body,
            )
            .await
            .map_err(|e| fail(e.to_string()))?;
        None
    };

    invalidate_after_write(client, store_id);
    info!(store_id, master_product_id = %row.id, quantity, "stock row created");
    Ok(QuantityOutcome::Created {
        quantity,
        store_product_id,
    })
}

/// Insert or update one stock row in the hosted database. Returns the row id.
pub async fn upsert_store_product(
    supabase: &crate::supabase::SupabaseClient,
    store_id: &str,
    master_product_id: &str,
    quantity: i64,
) -> Result<String, String> {
    if store_id.is_empty() || master_product_id.is_empty() {
        return Err("Missing store_id or master_product_id".into());
    }
    let quantity = clamp_quantity(quantity);

    let existing = supabase
        .select(
            "products",
            &[
                ("select", "id".to_string()),
                ("store_id", format!("eq.{store_id}")),
                ("master_product_id", format!("eq.{master_product_id}")),
            ],
        )
        .await?;
    let existing_id = existing
        .as_array()
        .and_then(|rows| rows.first())
        .and_then(|row| crate::value_str(row, &["id"]));

    if let Some(id) = existing_id {
        supabase
            .update(
                "products",
                &[("id", format!("eq.{id}"))],
                &json!({
                    "quantity": quantity,
                    "in_stock": quantity > 0,
                    "updated_at": chrono::Utc::now().to_rfc3339(),
                }),
            )
            .await?;
        return Ok(id);
    }

    let created = supabase
        .insert(
            "products",
            &json!({
                "store_id": store_id,
                "master_product_id": master_product_id,
                "quantity": quantity,
                "is_active": true,
                "in_stock": quantity > 0,
            }),
        )
        .await?;
    created
        .as_array()
        .and_then(|rows| rows.first())
        .and_then(|row| crate::value_str(row, &["id"]))
        .ok_or_else(|| "No id returned after insert".to_string())
}

/// Drop both cache keys for the store so the next read re-fetches.
fn invalidate_after_write(client: &Client, store_id: &str) {
    if let Err(e) = db::clear_inventory_cache_for_store(&client.db, store_id) {
        warn!(store_id, error = %e, "cache invalidation failed after write");
    }
}

// ---------------------------------------------------------------------------
// Adding products
// ---------------------------------------------------------------------------

/// One catalog entry to add to the store.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogAddition {
    pub master_product_id: String,
    pub price: f64,
    pub quantity: i64,
}

/// Search the master catalog by name/brand/category.
pub async fn search_catalog(client: &Client, query: &str) -> Result<Vec<MasterProduct>, String> {
    let resp = client
        .backend
        .get_query(
            "/master-products/search",
            &[("q", query.to_string())],
            None,
        )
        .await
        .map_err(|e| e.to_string())?;
    Ok(parse_master_products(&resp))
}

/// Add catalog entries to the store in one call. Quantities may be 0 (the
/// owner sets stock later from the inventory screen).
pub async fn add_from_catalog(
    client: &Client,
    token: &str,
    store_id: &str,
    items: &[CatalogAddition],
) -> Result<(), String> {
    if items.is_empty() {
        return Ok(());
    }
    let body = json!({
        "items": items
            .iter()
            .map(|item| {
                json!({
                    "masterProductId": item.master_product_id,
                    "price": item.price,
                    "quantity": clamp_quantity(item.quantity),
                })
            })
            .collect::<Vec<_>>()
    });
    client
        .backend
        .post(
            &format!("/store-owner/stores/{store_id}/products/bulk-from-master"),
            Some(token),
            &body,
        )
        .await
        .map_err(|e| e.to_string())?;
    invalidate_after_write(client, store_id);
    Ok(())
}

/// A store-specific product that has no catalog entry.
#[derive(Debug, Clone)]
pub struct CustomProduct {
    pub name: String,
    pub brand: Option<String>,
    pub category: String,
    pub subcategory: String,
    pub unit: String,
    pub price: f64,
    pub quantity: i64,
    /// `data:image/jpeg;base64,...` payload captured by the shell.
    pub image_data_url: String,
}

/// Create a custom product for the store.
pub async fn add_custom_product(
    client: &Client,
    token: &str,
    store_id: &str,
    product: &CustomProduct,
) -> Result<(), String> {
    let body = json!({
        "name": product.name,
        "brand": product.brand,
        "category": product.category,
        "subcategory": product.subcategory,
        "unit": product.unit,
        "image_url": product.image_data_url,
        "price": product.price,
        "quantity": clamp_quantity(product.quantity),
    });
    client
        .backend
        .post(
            &format!("/store-owner/stores/{store_id}/products/custom"),
            Some(token),
            &body,
        )
        .await
        .map_err(|e| e.to_string())?;
    invalidate_after_write(client, store_id);
    Ok(())
}

// ---------------------------------------------------------------------------
// Offline reset
// ---------------------------------------------------------------------------

/// One row the offline reset could not zero.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedReset {
    pub store_product_id: String,
    pub error: String,
}

/// Result of the offline stock reset. `reset` lists the zeroed row ids;
/// `failed` is input to the reconciliation pass (`retry_failed`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OfflineResetReport {
    pub reset: Vec<String>,
    pub failed: Vec<FailedReset>,
}

/// Zero every stock row with quantity > 0 for the store.
///
/// Preferred path is a single batch update against the hosted database
/// (`store_id=eq.X&quantity=gt.0`), which is atomic per request. Without a
/// database the rows are walked one by one through the backend, collecting
/// per-row outcomes instead of silently stopping mid-loop. Caches are
/// cleared afterwards in both paths.
pub async fn reset_store_stock(client: &Client, token: &str, store_id: &str) -> OfflineResetReport {
    let report = if let Some(supabase) = &client.supabase {
        match batch_reset(supabase, store_id).await {
            Ok(report) => report,
            Err(e) => {
                warn!(store_id, error = %e, "batch stock reset failed, walking rows");
                per_row_reset(client, token, store_id).await
            }
        }
    } else {
        per_row_reset(client, token, store_id).await
    };

    invalidate_after_write(client, store_id);
    info!(
        store_id,
        reset = report.reset.len(),
        failed = report.failed.len(),
        "offline stock reset finished"
    );
    report
}

async fn batch_reset(
    supabase: &crate::supabase::SupabaseClient,
    store_id: &str,
) -> Result<OfflineResetReport, String> {
    let updated = supabase
        .update(
            "products",
            &[
                ("store_id", format!("eq.{store_id}")),
                ("quantity", "gt.0".to_string()),
            ],
            &json!({
                "quantity": 0,
                "in_stock": false,
                "updated_at": chrono::Utc::now().to_rfc3339(),
            }),
        )
        .await?;

    let reset = updated
        .as_array()
        .map(|rows| {
            rows.iter()
                .filter_map(|row| crate::value_str(row, &["id"]))
                .collect()
        })
        .unwrap_or_default();
    Ok(OfflineResetReport {
        reset,
        failed: Vec::new(),
    })
}

/// Rows already at 0 are untouched by the reset.
fn rows_needing_reset(items: Vec<StockItem>) -> Vec<StockItem> {
    items.into_iter().filter(|item| item.quantity > 0).collect()
}

async fn per_row_reset(client: &Client, token: &str, store_id: &str) -> OfflineResetReport {
    let rows = match stock_list_from_rest(client, token, store_id).await {
        Ok(rows) => rows,
        Err(e) => {
            warn!(store_id, error = %e, "could not list stock rows for reset");
            return OfflineResetReport::default();
        }
    };

    let mut report = OfflineResetReport::default();
    for item in rows_needing_reset(rows) {
        let result = client
            .backend
            .patch(
                &format!("/store-owner/products/{}", item.store_product_id),
                Some(token),
                &json!({ "quantity": 0 }),
            )
            .await;
        match result {
            Ok(_) => report.reset.push(item.store_product_id),
            Err(e) => report.failed.push(FailedReset {
                store_product_id: item.store_product_id,
                error: e.to_string(),
            }),
        }
    }
    report
}

/// Reconciliation pass: retry just the rows a previous reset failed on.
/// Returns a fresh report; rows that fail again stay in `failed`.
pub async fn retry_failed(
    client: &Client,
    token: &str,
    store_id: &str,
    previous: &OfflineResetReport,
) -> OfflineResetReport {
    let mut report = OfflineResetReport {
        reset: previous.reset.clone(),
        failed: Vec::new(),
    };
    for failure in &previous.failed {
        let result = client
            .backend
            .patch(
                &format!("/store-owner/products/{}", failure.store_product_id),
                Some(token),
                &json!({ "quantity": 0 }),
            )
            .await;
        match result {
            Ok(_) => report.reset.push(failure.store_product_id.clone()),
            Err(e) => report.failed.push(FailedReset {
                store_product_id: failure.store_product_id.clone(),
                error: e.to_string(),
            }),
        }
    }
    if !report.failed.is_empty() {
        warn!(
            store_id,
            failed = report.failed.len(),
            "offline reset reconciliation still has failures"
        );
    }
    invalidate_after_write(client, store_id);
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Backend;
    use std::sync::Arc;

    fn master(id: &str, name: &str, price: f64) -> MasterProduct {
        MasterProduct {
            id: id.to_string(),
            name: name.to_string(),
            brand: None,
            category: None,
            subcategory: None,
            unit: Some("pcs".to_string()),
            base_price: price,
            image_url: None,
            is_active: true,
        }
    }

    fn stock(id: &str, master_id: &str, quantity: i64) -> StoreProductRow {
        StoreProductRow {
            id: id.to_string(),
            store_id: "store-1".to_string(),
            master_product_id: master_id.to_string(),
            quantity,
            is_active: true,
            in_stock: quantity > 0,
        }
    }

    /// Client wired to a dead port: any network call fails fast, which is
    /// exactly what the offline-behaviour tests need.
    fn offline_client() -> Client {
        Client {
            backend: Backend::new("http://127.0.0.1:9"),
            supabase: None,
            db: Arc::new(db::test_db()),
        }
    }

    #[test]
    fn every_catalog_entry_appears_exactly_once() {
        let catalog = vec![master("p1", "Rice", 10.0), master("p2", "Salt", 5.0)];
        let stock_rows = vec![stock("s1", "p1", 4)];

        let merged = merge_catalog_with_stock(&catalog, &stock_rows);

        assert_eq!(merged.len(), 2);
        let ids: Vec<&str> = merged.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["p1", "p2"]);
        assert!(merged.iter().all(|m| m.quantity >= 0));
    }

    #[test]
    fn missing_stock_row_defaults_to_zero_and_no_row_id() {
        let catalog = vec![master("p1", "Rice", 10.0)];
        let merged = merge_catalog_with_stock(&catalog, &[]);

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].quantity, 0);
        assert_eq!(merged[0].store_product_id, None);
        assert!((merged[0].price - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn stock_row_roundtrips_into_merged_quantity() {
        let catalog = vec![master("p1", "Rice", 10.0)];
        let stock_rows = vec![stock("s1", "p1", 5)];

        let merged = merge_catalog_with_stock(&catalog, &stock_rows);

        assert_eq!(merged[0].quantity, 5);
        assert_eq!(merged[0].store_product_id.as_deref(), Some("s1"));
    }

    #[test]
    fn orphan_stock_is_appended_after_catalog() {
        let catalog = vec![master("p1", "Rice", 10.0)];
        let stock_rows = vec![stock("s1", "p1", 2), stock("s2", "gone", 7)];

        let merged = merge_catalog_with_stock(&catalog, &stock_rows);

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[1].id, "gone");
        assert_eq!(merged[1].quantity, 7);
        assert_eq!(merged[1].name, FALLBACK_PRODUCT_NAME);
        assert_eq!(merged[1].store_product_id.as_deref(), Some("s2"));
    }

    #[test]
    fn negative_quantities_are_clamped() {
        let catalog = vec![master("p1", "Rice", 10.0)];
        let mut row = stock("s1", "p1", 0);
        row.quantity = -3;
        let merged = merge_catalog_with_stock(&catalog, &[row]);
        assert_eq!(merged[0].quantity, 0);

        assert_eq!(clamp_quantity(-5), 0);
        assert_eq!(clamp_quantity(5), 5);
    }

    #[test]
    fn stock_row_parses_backend_and_database_spellings() {
        let db_shape = serde_json::json!({
            "id": "s1", "store_id": "store-1", "master_product_id": "p1", "quantity": 3
        });
        let backend_shape = serde_json::json!({
            "id": "s1", "masterProductId": "p1", "quantity": 3, "name": "Rice"
        });
        let nested_shape = serde_json::json!({
            "id": "s1", "master_product": { "id": "p1", "name": "Rice" }, "quantity": 3
        });

        for shape in [&db_shape, &backend_shape, &nested_shape] {
            let row = StoreProductRow::from_json(shape).expect("row should parse");
            assert_eq!(row.master_product_id, "p1");
            assert_eq!(row.quantity, 3);
        }

        let no_master = serde_json::json!({ "id": "s1", "quantity": 3 });
        assert!(StoreProductRow::from_json(&no_master).is_none());
    }

    #[tokio::test]
    async fn set_quantity_without_row_and_zero_target_is_noop() {
        let client = offline_client();
        let row = MergedProduct {
            id: "p1".to_string(),
            name: "Rice".to_string(),
            brand: None,
            category: None,
            unit: None,
            price: 10.0,
            image_url: None,
            quantity: 0,
            store_product_id: None,
        };

        let outcome = set_quantity(&client, "jwt", "store-1", &row, 0)
            .await
            .expect("no-op must not touch the network");
        assert_eq!(outcome, QuantityOutcome::Noop);
    }

    #[tokio::test]
    async fn failed_write_reports_previous_quantity_for_rollback() {
        let client = offline_client();
        let row = MergedProduct {
            id: "p1".to_string(),
            name: "Rice".to_string(),
            brand: None,
            category: None,
            unit: None,
            price: 10.0,
            image_url: None,
            quantity: 4,
            store_product_id: Some("s1".to_string()),
        };

        let err = set_quantity(&client, "jwt", "store-1", &row, 9)
            .await
            .expect_err("dead backend must fail the write");
        assert_eq!(err.previous_quantity, 4);
    }

    #[tokio::test]
    async fn cached_snapshot_short_circuits_the_network() {
        let client = offline_client();
        let snapshot = serde_json::json!({
            "products": [{
                "id": "p1", "name": "Rice", "price": 10.0,
                "quantity": 5, "store_product_id": "s1"
            }]
        });
        db::write_inventory_cache(&client.db, INVENTORY_SNAPSHOT_KEY, "store-1", &snapshot)
            .unwrap();

        // Backend is unreachable, so a non-empty result proves the cache hit.
        let merged = load_inventory(&client, "jwt", "store-1").await;
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].quantity, 5);

        // Unknown store falls through the chain and degrades to empty.
        let merged = load_inventory(&client, "jwt", "store-2").await;
        assert!(merged.is_empty());
    }

    #[test]
    fn offline_reset_skips_rows_already_at_zero() {
        let items = vec![
            StockItem {
                id: "pA".to_string(),
                store_product_id: "sA".to_string(),
                name: "A".to_string(),
                quantity: 3,
            },
            StockItem {
                id: "pB".to_string(),
                store_product_id: "sB".to_string(),
                name: "B".to_string(),
                quantity: 0,
            },
            StockItem {
                id: "pC".to_string(),
                store_product_id: "sC".to_string(),
                name: "C".to_string(),
                quantity: 7,
            },
        ];

        let targets = rows_needing_reset(items);
        let ids: Vec<&str> = targets.iter().map(|i| i.store_product_id.as_str()).collect();
        assert_eq!(ids, vec!["sA", "sC"]);
    }

    #[tokio::test]
    async fn offline_reset_on_dead_backend_reports_not_panics() {
        let client = offline_client();
        let report = reset_store_stock(&client, "jwt", "store-1").await;
        // Listing failed, so nothing was reset and nothing is pending retry.
        assert!(report.reset.is_empty());
        assert!(report.failed.is_empty());
    }

    #[tokio::test]
    async fn retry_failed_keeps_unreachable_rows_in_failed() {
        let client = offline_client();
        let previous = OfflineResetReport {
            reset: vec!["s1".to_string()],
            failed: vec![FailedReset {
                store_product_id: "s2".to_string(),
                error: "boom".to_string(),
            }],
        };

        let report = retry_failed(&client, "jwt", "store-1", &previous).await;
        assert_eq!(report.reset, vec!["s1".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].store_product_id, "s2");
    }
}
