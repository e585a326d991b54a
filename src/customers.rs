//! Admin customer management.
//!
//! Customer shapes drift between backend versions (`fullName` vs
//! `firstName`/`lastName` vs `name`), so records stay `serde_json::Value`
//! and readers go through tolerant accessors instead of a rigid struct.

use serde_json::Value;
use tracing::info;

use crate::api::ApiClient;
use crate::data_helpers::{read_local_json_array, write_local_json};
use crate::db::DbState;
use crate::pricing;
use crate::{value_f64, value_str};

/// Settings-cache key holding the last fetched customer list.
const USERS_CACHE_KEY: &str = "users";

// ---------------------------------------------------------------------------
// Fetch & cache
// ---------------------------------------------------------------------------

/// Fetch every customer (`GET /api/customers`) and cache the raw list so the
/// detail modal can open without another round trip.
pub async fn fetch_customers(api: &ApiClient, db: &DbState) -> Result<Vec<Value>, String> {
    let raw = api.get("/api/customers").await.map_err(|e| e.to_string())?;
    let customers = raw
        .as_array()
        .cloned()
        .ok_or("Customer list response is not an array")?;

    write_local_json(db, USERS_CACHE_KEY, &Value::Array(customers.clone()))?;
    Ok(customers)
}

/// The cached customer list from the last fetch.
pub fn cached_customers(db: &DbState) -> Vec<Value> {
    read_local_json_array(db, USERS_CACHE_KEY).unwrap_or_default()
}

/// Find one cached customer by id (the detail modal's lookup).
pub fn cached_customer(db: &DbState, customer_id: i64) -> Option<Value> {
    cached_customers(db)
        .into_iter()
        .find(|u| u.get("id").and_then(Value::as_i64) == Some(customer_id))
}

// ---------------------------------------------------------------------------
// Row accessors
// ---------------------------------------------------------------------------

/// Display name: `fullName`, else `firstName lastName`, else `name`, else
/// "N/A".
pub fn display_name(user: &Value) -> String {
    if let Some(full) = value_str(user, &["fullName"]) {
        return full;
    }
    if let (Some(first), Some(last)) = (
        value_str(user, &["firstName"]),
        value_str(user, &["lastName"]),
    ) {
        return format!("{first} {last}");
    }
    value_str(user, &["name"]).unwrap_or_else(|| "N/A".to_string())
}

/// Whether the customer is blocked from signing in.
pub fn is_blocked(user: &Value) -> bool {
    user.get("blocked").and_then(Value::as_bool).unwrap_or(false)
}

/// Count of completed orders. Orders without a status count too — legacy
/// records predate the status field.
pub fn completed_order_count(user: &Value) -> usize {
    user.get("orders")
        .and_then(Value::as_array)
        .map(|orders| {
            orders
                .iter()
                .filter(|order| match order.get("status").and_then(Value::as_str) {
                    Some(status) => status.eq_ignore_ascii_case("completed"),
                    None => true,
                })
                .count()
        })
        .unwrap_or(0)
}

/// Lifetime spend across all orders, in centavos.
pub fn total_spent_cents(user: &Value) -> i64 {
    user.get("orders")
        .and_then(Value::as_array)
        .map(|orders| {
            orders
                .iter()
                .map(|order| {
                    value_f64(order, &["total"])
                        .map(pricing::cents_from_pesos)
                        .unwrap_or(0)
                })
                .sum()
        })
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Moderation
// ---------------------------------------------------------------------------

/// Block a customer (`PATCH /api/customers/{id}/block`).
pub async fn block_customer(api: &ApiClient, customer_id: i64) -> Result<(), String> {
    api.patch(&format!("/api/customers/{customer_id}/block"), None)
        .await
        .map_err(|_| "Failed to block customer".to_string())?;
    info!(customer_id, "customer blocked");
    Ok(())
}

/// Unblock a customer (`PATCH /api/customers/{id}/unblock`).
pub async fn unblock_customer(api: &ApiClient, customer_id: i64) -> Result<(), String> {
    api.patch(&format!("/api/customers/{customer_id}/unblock"), None)
        .await
        .map_err(|_| "Failed to unblock customer".to_string())?;
    info!(customer_id, "customer unblocked");
    Ok(())
}

/// Permanently delete a customer (`DELETE /api/customers/{id}`).
///
/// The backend differentiates here and so does the message: 204 success,
/// 403 no permission, 404 unknown customer, anything else generic.
pub async fn delete_customer(api: &ApiClient, customer_id: i64) -> Result<(), String> {
    match api.delete(&format!("/api/customers/{customer_id}")).await {
        Ok(_) => {
            info!(customer_id, "customer deleted");
            Ok(())
        }
        Err(e) => Err(match e.status() {
            Some(403) => "You do not have permission to delete this customer".to_string(),
            Some(404) => "Customer not found".to_string(),
            _ => "Failed to delete customer".to_string(),
        }),
    }
}

// ===========================================================================
// Tests
// ===========================================================================
