//! Order records, accept/reject actions, and QR handover verification.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::api::ApiError;
use crate::Client;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Order lifecycle status. Unknown strings are preserved, not dropped - the
/// backend grows statuses faster than clients ship.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OrderStatus {
    PendingStore,
    Accepted,
    Rejected,
    Delivered,
    Other(String),
}

impl From<String> for OrderStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "pending_store" => Self::PendingStore,
            "accepted" => Self::Accepted,
            "rejected" => Self::Rejected,
            "delivered" => Self::Delivered,
            _ => Self::Other(s),
        }
    }
}

impl From<OrderStatus> for String {
    fn from(status: OrderStatus) -> Self {
        status.as_str().to_string()
    }
}

impl OrderStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::PendingStore => "pending_store",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Delivered => "delivered",
            Self::Other(s) => s,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderItem {
    pub product_name: String,
    pub quantity: f64,
    pub unit: String,
    #[serde(default)]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: String,
    pub order_code: String,
    pub status: OrderStatus,
    #[serde(default)]
    pub order_items: Vec<OrderItem>,
    #[serde(default)]
    pub delivery_address: Option<String>,
    #[serde(default)]
    pub total_amount: f64,
    #[serde(default)]
    pub placed_at: Option<String>,
}

impl Order {
    /// Parse an order from a backend response row. Rows without an id are
    /// dropped by callers; everything else degrades to defaults.
    pub fn from_json(v: &Value) -> Option<Self> {
        let id = crate::value_str(v, &["id", "orderId", "order_id"])?;
        let status = crate::value_str(v, &["status"]).unwrap_or_default();
        let order_items = v
            .get("order_items")
            .or_else(|| v.get("items"))
            .and_then(Value::as_array)
            .map(|items| items.iter().map(OrderItem::from_json).collect())
            .unwrap_or_default();
        Some(Self {
            id,
            order_code: crate::value_str(v, &["order_code", "orderCode"]).unwrap_or_default(),
            status: OrderStatus::from(status),
            order_items,
            delivery_address: crate::value_str(v, &["delivery_address", "deliveryAddress"]),
            total_amount: crate::value_f64(v, &["total_amount", "totalAmount"]).unwrap_or(0.0),
            placed_at: crate::value_str(v, &["placed_at", "placedAt", "created_at"]),
        })
    }
}

impl OrderItem {
    fn from_json(v: &Value) -> Self {
        // Item images sometimes hang off an embedded product row
        let image_url = crate::value_str(v, &["image_url", "imageUrl"]).or_else(|| {
            v.get("products")
                .and_then(|p| crate::value_str(p, &["image_url"]))
        });
        Self {
            product_name: crate::value_str(v, &["product_name", "productName", "name"])
                .unwrap_or_else(|| "Product".to_string()),
            quantity: crate::value_f64(v, &["quantity"]).unwrap_or(0.0),
            unit: crate::value_str(v, &["unit"]).unwrap_or_default(),
            image_url,
        }
    }
}

// ---------------------------------------------------------------------------
// Fetching
// ---------------------------------------------------------------------------

/// List the store's orders, newest backend ordering preserved.
pub async fn fetch_store_orders(
    client: &Client,
    token: &str,
    store_id: &str,
) -> Result<Vec<Order>, String> {
    let resp = client
        .backend
        .get(
            &format!("/store-owner/stores/{store_id}/orders"),
            Some(token),
        )
        .await
        .map_err(|e| e.to_string())?;

    let orders = resp
        .get("orders")
        .and_then(Value::as_array)
        .map(|rows| rows.iter().filter_map(Order::from_json).collect())
        .unwrap_or_default();
    Ok(orders)
}

/// Fetch one order with full line items and delivery address.
pub async fn fetch_order(client: &Client, token: &str, order_id: &str) -> Result<Order, String> {
    let resp = client
        .backend
        .get(&format!("/store-owner/orders/{order_id}"), Some(token))
        .await
        .map_err(|e| e.to_string())?;

    resp.get("order")
        .and_then(Order::from_json)
        .ok_or_else(|| "Malformed order response".to_string())
}

// ---------------------------------------------------------------------------
// Accept / reject
// ---------------------------------------------------------------------------

async fn resolve_order(
    client: &Client,
    token: &str,
    order_id: &str,
    action: &str,
) -> Result<(), String> {
    let path = format!("/store-owner/orders/{order_id}/{action}");
    // One idempotency key across the retry pair: the backend can dedupe if
    // the first attempt landed and only the response was lost.
    let idempotency_key = format!("order:{action}:{order_id}:{}", Uuid::new_v4());
    let headers = [("Idempotency-Key", idempotency_key.clone())];

    let first = client
        .backend
        .request(Method::POST, &path, Some(token), Some(&json!({})), &headers)
        .await;

    match first {
        Ok(_) => {
            info!(order_id, action, "order resolved");
            Ok(())
        }
        Err(e) if e.is_transport() => {
            warn!(order_id, action, error = %e, "transport failure, retrying once");
            client
                .backend
                .request(Method::POST, &path, Some(token), Some(&json!({})), &headers)
                .await
                .map(|_| info!(order_id, action, "order resolved on retry"))
                .map_err(|e| e.to_string())
        }
        Err(e) => Err(e.to_string()),
    }
}

/// Accept a pending order.
pub async fn accept_order(client: &Client, token: &str, order_id: &str) -> Result<(), String> {
    resolve_order(client, token, order_id, "accept").await
}

/// Reject a pending order (user action or countdown timeout).
pub async fn reject_order(client: &Client, token: &str, order_id: &str) -> Result<(), String> {
    resolve_order(client, token, order_id, "reject").await
}

// ---------------------------------------------------------------------------
// QR verification
// ---------------------------------------------------------------------------

/// Extract the verification token from a scanned QR payload.
///
/// Scanners hand over whatever was encoded: a bare token, a JSON object
/// `{"token": ...}`, or that JSON base64/base64url-encoded. Unrecognisable
/// payloads pass through raw and let the backend reject them.
pub fn decode_scanned_token(raw: &str) -> String {
    let trimmed = raw.trim();

    if let Some(token) = token_from_json_str(trimmed) {
        return token;
    }

    let compact: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.len() >= 20 {
        let base64 = compact.replace('-', "+").replace('_', "/");
        let padded = format!(
            "{}{}",
            base64,
            "=".repeat((4usize.wrapping_sub(base64.len() % 4)) % 4)
        );
        if let Ok(decoded) = BASE64_STANDARD.decode(padded) {
            if let Ok(text) = String::from_utf8(decoded) {
                if let Some(token) = token_from_json_str(&text) {
                    return token;
                }
            }
        }
    }

    trimmed.to_string()
}

fn token_from_json_str(raw: &str) -> Option<String> {
    if !raw.starts_with('{') {
        return None;
    }
    let value: Value = serde_json::from_str(raw).ok()?;
    crate::value_str(&value, &["token", "qr_token", "qrToken"])
}

/// Map backend QR error codes to user-readable messages.
fn qr_error_message(code: &str) -> Option<&'static str> {
    match code {
        "MISSING_TOKEN" => Some("Invalid QR code."),
        "ORDER_NOT_FOUND" => Some("Order not found."),
        "INVALID_ORDER_STATE" => Some("Order is not ready for verification."),
        "QR_ALREADY_USED" => Some("This QR code has already been used."),
        "QR_MISMATCH" => Some("This QR does not belong to the selected order."),
        "ORDER_FETCH_FAILED" => Some("Could not verify order. Please try again."),
        "UPDATE_FAILED" => Some("Verification failed. Please retry."),
        _ => None,
    }
}

/// Verify a scanned QR against an order (customer handover).
pub async fn verify_qr(
    client: &Client,
    token: &str,
    order_id: &str,
    scanned: &str,
) -> Result<(), String> {
    let qr_token = decode_scanned_token(scanned);
    let result = client
        .backend
        .post(
            &format!("/store-owner/orders/{order_id}/verify-qr"),
            Some(token),
            &json!({ "token": qr_token }),
        )
        .await;

    match result {
        Ok(_) => {
            info!(order_id, "QR verified, order handed over");
            Ok(())
        }
        Err(ApiError::Conflict { code, message }) => {
            Err(qr_error_message(&code).map(str::to_string).unwrap_or(message))
        }
        Err(e) => Err(format!(
            "Something went wrong while verifying the QR: {e}"
        )),
    }
}

// ---------------------------------------------------------------------------
// Payments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Payment {
    pub id: String,
    #[serde(default)]
    pub order_code: String,
    #[serde(default)]
    pub items_total: f64,
    #[serde(default)]
    pub delivery_bonus: f64,
    #[serde(default)]
    pub total_amount: f64,
}

/// A day's delivered-order payments plus the running total.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaymentsDay {
    pub payments: Vec<Payment>,
    pub day_total: f64,
}

/// Fetch the payments recorded for a store on `date` (`YYYY-MM-DD`).
pub async fn fetch_payments(
    client: &Client,
    token: &str,
    store_id: &str,
    date: &str,
) -> Result<PaymentsDay, String> {
    let resp = client
        .backend
        .get_query(
            &format!("/store-owner/stores/{store_id}/payments"),
            &[("date", date.to_string())],
            Some(token),
        )
        .await
        .map_err(|e| e.to_string())?;

    let payments = resp
        .get("payments")
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .filter_map(|row| serde_json::from_value(row.clone()).ok())
                .collect()
        })
        .unwrap_or_default();
    let day_total = crate::value_f64(&resp, &["day_total", "dayTotal"]).unwrap_or(0.0);

    Ok(PaymentsDay {
        payments,
        day_total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrips_and_preserves_unknowns() {
        assert_eq!(OrderStatus::from("pending_store".to_string()), OrderStatus::PendingStore);
        assert_eq!(OrderStatus::PendingStore.as_str(), "pending_store");
        let custom = OrderStatus::from("out_for_delivery".to_string());
        assert_eq!(custom, OrderStatus::Other("out_for_delivery".to_string()));
        assert_eq!(custom.as_str(), "out_for_delivery");
    }

    #[test]
    fn order_parses_with_nested_item_image() {
        let raw = serde_json::json!({
            "id": "O1",
            "order_code": "A1B2",
            "status": "pending_store",
            "total_amount": 120.5,
            "delivery_address": "12 Hill Road",
            "order_items": [
                { "product_name": "Rice", "quantity": 2, "unit": "kg", "image_url": "https://img/rice.png" },
                { "product_name": "Milk", "quantity": 1, "unit": "l", "products": { "image_url": "https://img/milk.png" } }
            ]
        });
        let order = Order::from_json(&raw).expect("order should parse");
        assert_eq!(order.status, OrderStatus::PendingStore);
        assert_eq!(order.order_items.len(), 2);
        assert_eq!(
            order.order_items[1].image_url.as_deref(),
            Some("https://img/milk.png")
        );
        assert!((order.total_amount - 120.5).abs() < f64::EPSILON);
    }

    #[test]
    fn order_without_id_is_rejected() {
        let raw = serde_json::json!({ "order_code": "A1B2", "status": "pending_store" });
        assert!(Order::from_json(&raw).is_none());
    }

    #[test]
    fn scanned_token_accepted_raw_json_and_base64() {
        assert_eq!(decode_scanned_token("  plain-token-123  "), "plain-token-123");

        assert_eq!(
            decode_scanned_token(r#"{"token": "json-token-456"}"#),
            "json-token-456"
        );

        let encoded = BASE64_STANDARD.encode(r#"{"token": "b64-token-789"}"#);
        assert_eq!(decode_scanned_token(&encoded), "b64-token-789");

        // Unrecognisable payloads pass through for the backend to reject
        assert_eq!(decode_scanned_token("short"), "short");
    }

    #[test]
    fn qr_error_codes_map_to_readable_messages() {
        assert_eq!(
            qr_error_message("QR_ALREADY_USED"),
            Some("This QR code has already been used.")
        );
        assert_eq!(
            qr_error_message("QR_MISMATCH"),
            Some("This QR does not belong to the selected order.")
        );
        assert_eq!(qr_error_message("SOMETHING_NEW"), None);
    }
}
