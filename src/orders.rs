//! Customer order history.
//!
//! The backend is the system of record; the `order_history` table is a
//! read-through cache of server-confirmed orders. It is refreshed from every
//! successful fetch and consulted only when the backend is unreachable, so
//! the history page still renders something useful offline.

use chrono::{DateTime, Months, Utc};
use rusqlite::params;
use serde_json::Value;
use tracing::{info, warn};

use crate::api::ApiClient;
use crate::db::DbState;
use crate::pricing;
use crate::{value_f64, value_str};

/// Statuses the admin order modal may assign.
const ASSIGNABLE_STATUSES: &[&str] = &["processing", "shipping", "delivered"];

// ---------------------------------------------------------------------------
// Local cache
// ---------------------------------------------------------------------------

/// Upsert one server-confirmed order into the history cache.
pub fn cache_order(db: &DbState, order: &Value) -> Result<(), String> {
    let order_id = value_str(order, &["orderId", "id"]).ok_or("order payload missing orderId")?;
    let customer_id = order
        .get("customerId")
        .and_then(Value::as_i64)
        .ok_or("order payload missing customerId")?;
    let status = value_str(order, &["status"]).unwrap_or_else(|| "PENDING".to_string());
    let total_cents = value_f64(order, &["total"])
        .map(pricing::cents_from_pesos)
        .unwrap_or(0);
    let placed_at =
        value_str(order, &["orderDate", "date"]).unwrap_or_else(|| Utc::now().to_rfc3339());
    let payload =
        serde_json::to_string(order).map_err(|e| format!("serialize order payload: {e}"))?;

    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    conn.execute(
        "INSERT INTO order_history (order_id, customer_id, status, total_cents, payload, placed_at, cached_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, datetime('now'))
         ON CONFLICT(order_id) DO UPDATE SET
            status = excluded.status,
            total_cents = excluded.total_cents,
            payload = excluded.payload,
            placed_at = excluded.placed_at,
            cached_at = excluded.cached_at",
        params![order_id, customer_id, status, total_cents, payload, placed_at],
    )
    .map_err(|e| format!("cache order: {e}"))?;
    Ok(())
}

/// Refresh the cache from a fetched order list. Entries without the fields
/// the cache needs are skipped, not fatal.
pub fn cache_orders(db: &DbState, orders: &[Value]) {
    for order in orders {
        if let Err(e) = cache_order(db, order) {
            warn!("skipping uncacheable order: {e}");
        }
    }
}

/// Cached orders for one customer, newest first. Unparseable payloads are
/// skipped with a warning.
pub fn cached_orders(db: &DbState, customer_id: i64) -> Vec<Value> {
    let conn = match db.conn.lock() {
        Ok(c) => c,
        Err(e) => {
            warn!("order cache lock failed: {e}");
            return vec![];
        }
    };

    let mut stmt = match conn.prepare(
        "SELECT payload FROM order_history WHERE customer_id = ?1 ORDER BY placed_at DESC",
    ) {
        Ok(s) => s,
        Err(e) => {
            warn!("order cache prepare failed: {e}");
            return vec![];
        }
    };

    let rows = match stmt.query_map(params![customer_id], |row| row.get::<_, String>(0)) {
        Ok(r) => r,
        Err(e) => {
            warn!("order cache query failed: {e}");
            return vec![];
        }
    };

    let mut orders = Vec::new();
    for row in rows {
        match row {
            Ok(raw) => match serde_json::from_str::<Value>(&raw) {
                Ok(order) => orders.push(order),
                Err(e) => warn!("skipping malformed cached order: {e}"),
            },
            Err(e) => warn!("skipping unreadable order row: {e}"),
        }
    }
    orders
}

// ---------------------------------------------------------------------------
// Fetch
// ---------------------------------------------------------------------------

/// Fetch a customer's orders (`GET /api/orders/customer/{id}`), refreshing
/// the local cache on success. When the backend cannot be reached at all the
/// cached copy is returned instead; a non-2xx answer is surfaced as an error
/// (the backend saw the request and said no).
pub async fn orders_for_customer(
    api: &ApiClient,
    db: &DbState,
    customer_id: i64,
) -> Result<Vec<Value>, String> {
    match api
        .get(&format!("/api/orders/customer/{customer_id}"))
        .await
    {
        Ok(raw) => {
            let orders = raw.as_array().cloned().unwrap_or_default();
            cache_orders(db, &orders);
            Ok(orders)
        }
        Err(e) if e.is_transport() => {
            warn!(customer_id, error = %e, "order fetch unreachable, serving cached history");
            Ok(cached_orders(db, customer_id))
        }
        Err(e) => Err(e.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

/// Relative date windows offered by the history page's date filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateWindow {
    LastMonth,
    LastThreeMonths,
    LastSixMonths,
    LastYear,
}

impl DateWindow {
    fn months(self) -> u32 {
        match self {
            DateWindow::LastMonth => 1,
            DateWindow::LastThreeMonths => 3,
            DateWindow::LastSixMonths => 6,
            DateWindow::LastYear => 12,
        }
    }

    /// Parse the filter-select value (`last-month`, `last-3-months`, ...).
    pub fn parse(raw: &str) -> Option<DateWindow> {
        match raw {
            "last-month" => Some(DateWindow::LastMonth),
            "last-3-months" => Some(DateWindow::LastThreeMonths),
            "last-6-months" => Some(DateWindow::LastSixMonths),
            "last-year" => Some(DateWindow::LastYear),
            _ => None,
        }
    }
}

/// Search / status / date filter state for the history page.
#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    /// Case-insensitive match against item names and the order id.
    pub search: Option<String>,
    /// Case-insensitive status equality.
    pub status: Option<String>,
    pub placed_within: Option<DateWindow>,
}

fn order_matches_search(order: &Value, term: &str) -> bool {
    if let Some(id) = value_str(order, &["orderId", "id"]) {
        if id.to_lowercase().contains(term) {
            return true;
        }
    }
    order
        .get("items")
        .and_then(Value::as_array)
        .map(|items| {
            items.iter().any(|item| {
                value_str(item, &["name"])
                    .map(|n| n.to_lowercase().contains(term))
                    .unwrap_or(false)
            })
        })
        .unwrap_or(false)
}

fn order_placed_at(order: &Value) -> Option<DateTime<Utc>> {
    value_str(order, &["orderDate", "date"])
        .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Apply the page filters to a fetched order list.
pub fn filter_orders(orders: &[Value], filter: &OrderFilter, now: DateTime<Utc>) -> Vec<Value> {
    let term = filter
        .search
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase);
    let status = filter
        .status
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase);
    let cutoff = filter
        .placed_within
        .map(|w| now.checked_sub_months(Months::new(w.months())).unwrap_or(now));

    orders
        .iter()
        .filter(|order| {
            if let Some(ref term) = term {
                if !order_matches_search(order, term) {
                    return false;
                }
            }
            if let Some(ref wanted) = status {
                let actual = value_str(order, &["status"])
                    .map(|s| s.to_lowercase())
                    .unwrap_or_default();
                if actual != *wanted {
                    return false;
                }
            }
            if let Some(cutoff) = cutoff {
                match order_placed_at(order) {
                    Some(placed) => {
                        if placed < cutoff || placed > now {
                            return false;
                        }
                    }
                    None => return false,
                }
            }
            true
        })
        .cloned()
        .collect()
}

/// Total item quantity across an order's lines (the header row count).
pub fn total_items(order: &Value) -> i64 {
    order
        .get("items")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|item| item.get("quantity").and_then(Value::as_i64).unwrap_or(1))
                .sum()
        })
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Admin status update
// ---------------------------------------------------------------------------

/// Update an order's status from the admin customer modal
/// (`PATCH /api/orders/{orderId}/status`).
pub async fn update_order_status(
    api: &ApiClient,
    order_id: &str,
    status: &str,
) -> Result<(), String> {
    let normalized = status.trim().to_lowercase();
    if !ASSIGNABLE_STATUSES.contains(&normalized.as_str()) {
        return Err(format!(
            "Invalid status: {status}. Must be processing, shipping, or delivered"
        ));
    }
    if order_id.trim().is_empty() {
        return Err("Missing order id".into());
    }

    api.patch(
        &format!("/api/orders/{}/status", order_id.trim()),
        Some(&serde_json::json!({ "status": normalized })),
    )
    .await
    .map_err(|e| e.to_string())?;

    info!(order_id, status = %normalized, "order status updated");
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rusqlite::Connection;

    fn test_db() -> DbState {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        crate::db::run_migrations_for_test(&conn);
        DbState {
            conn: std::sync::Mutex::new(conn),
            db_path: std::path::PathBuf::from(":memory:"),
        }
    }

    fn order(order_id: &str, customer_id: i64, status: &str, date: &str) -> Value {
        serde_json::json!({
            "orderId": order_id,
            "customerId": customer_id,
            "status": status,
            "total": 2390.0,
            "orderDate": date,
            "items": [
                {"id": 1, "name": "Kettlebell", "quantity": 2, "price": 1000.0},
                {"id": 2, "name": "Jump Rope", "quantity": 1, "price": 249.0},
            ],
        })
    }

    #[test]
    fn cache_roundtrip_scoped_by_customer() {
        let db = test_db();
        cache_order(&db, &order("ORD1", 42, "PENDING", "2026-08-01T10:00:00Z")).expect("cache 1");
        cache_order(&db, &order("ORD2", 42, "PENDING", "2026-08-03T10:00:00Z")).expect("cache 2");
        cache_order(&db, &order("ORD3", 7, "PENDING", "2026-08-02T10:00:00Z")).expect("cache 3");

        let mine = cached_orders(&db, 42);
        assert_eq!(mine.len(), 2);
        // Newest first
        assert_eq!(mine[0]["orderId"], "ORD2");
        assert!(cached_orders(&db, 99).is_empty());
    }

    #[test]
    fn cache_upserts_status_changes() {
        let db = test_db();
        cache_order(&db, &order("ORD1", 42, "PENDING", "2026-08-01T10:00:00Z")).expect("cache");
        cache_order(&db, &order("ORD1", 42, "delivered", "2026-08-01T10:00:00Z"))
            .expect("recache");

        let mine = cached_orders(&db, 42);
        assert_eq!(mine.len(), 1, "same order id upserts");
        assert_eq!(mine[0]["status"], "delivered");
    }

    #[test]
    fn cache_rejects_orders_missing_identity() {
        let db = test_db();
        let bad = serde_json::json!({ "status": "PENDING" });
        assert!(cache_order(&db, &bad).is_err());
        cache_orders(&db, &[bad]); // must not panic
    }

    #[test]
    fn search_matches_item_names_and_order_ids() {
        let orders = vec![
            order("ORD1", 1, "PENDING", "2026-08-01T10:00:00Z"),
            order("XYZ9", 1, "PENDING", "2026-08-01T10:00:00Z"),
        ];

        let by_name = filter_orders(
            &orders,
            &OrderFilter {
                search: Some("kettle".into()),
                ..OrderFilter::default()
            },
            Utc::now(),
        );
        assert_eq!(by_name.len(), 2, "both orders carry a Kettlebell");

        let by_id = filter_orders(
            &orders,
            &OrderFilter {
                search: Some("xyz".into()),
                ..OrderFilter::default()
            },
            Utc::now(),
        );
        assert_eq!(by_id.len(), 1);
        assert_eq!(by_id[0]["orderId"], "XYZ9");
    }

    #[test]
    fn status_filter_is_case_insensitive() {
        let orders = vec![
            order("ORD1", 1, "PENDING", "2026-08-01T10:00:00Z"),
            order("ORD2", 1, "delivered", "2026-08-01T10:00:00Z"),
        ];
        let filtered = filter_orders(
            &orders,
            &OrderFilter {
                status: Some("pending".into()),
                ..OrderFilter::default()
            },
            Utc::now(),
        );
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0]["orderId"], "ORD1");
    }

    #[test]
    fn date_window_filters_by_calendar_months() {
        let now = Utc.with_ymd_and_hms(2026, 8, 8, 12, 0, 0).unwrap();
        let orders = vec![
            order("RECENT", 1, "PENDING", "2026-07-20T10:00:00Z"),
            order("OLD", 1, "PENDING", "2026-05-01T10:00:00Z"),
            order("UNDATED", 1, "PENDING", "not-a-date"),
        ];

        let last_month = filter_orders(
            &orders,
            &OrderFilter {
                placed_within: Some(DateWindow::LastMonth),
                ..OrderFilter::default()
            },
            now,
        );
        assert_eq!(last_month.len(), 1);
        assert_eq!(last_month[0]["orderId"], "RECENT");

        let last_half_year = filter_orders(
            &orders,
            &OrderFilter {
                placed_within: Some(DateWindow::LastSixMonths),
                ..OrderFilter::default()
            },
            now,
        );
        assert_eq!(last_half_year.len(), 2, "undated orders never match a window");
    }

    #[test]
    fn date_window_parse() {
        assert_eq!(DateWindow::parse("last-month"), Some(DateWindow::LastMonth));
        assert_eq!(
            DateWindow::parse("last-3-months"),
            Some(DateWindow::LastThreeMonths)
        );
        assert_eq!(DateWindow::parse("last-year"), Some(DateWindow::LastYear));
        assert_eq!(DateWindow::parse(""), None);
    }

    #[test]
    fn total_items_sums_quantities() {
        assert_eq!(
            total_items(&order("ORD1", 1, "PENDING", "2026-08-01T10:00:00Z")),
            3
        );
        assert_eq!(total_items(&serde_json::json!({})), 0);
    }

    #[tokio::test]
    async fn status_update_validates_before_any_request() {
        let api = ApiClient::new("http://localhost:1").expect("client");
        let err = update_order_status(&api, "ORD1", "cancelled")
            .await
            .expect_err("invalid status");
        assert!(err.contains("Invalid status"), "got {err}");

        let err = update_order_status(&api, "  ", "shipping")
            .await
            .expect_err("missing id");
        assert_eq!(err, "Missing order id");
    }
}
