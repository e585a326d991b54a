//! Product catalog: backend fetches, the local cache, and the storefront's
//! filter/sort rules.
//!
//! Reads hit the `catalog_cache` table so the storefront can render without
//! a round trip; a sync pass fetches fresh data from the backend and only
//! rewrites the cache when the payload digest actually changed.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::{error, info, trace, warn};

use crate::api::ApiClient;
use crate::db::DbState;
use crate::pricing;

const PRODUCTS_CACHE_KEY: &str = "products";

// ---------------------------------------------------------------------------
// Product model
// ---------------------------------------------------------------------------

/// A catalog product as served by `GET /api/products`. Prices arrive as
/// decimal pesos; convert with `unit_price_cents` before doing arithmetic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub price: f64,
    pub stock: i64,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub specifications: serde_json::Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
}

impl Product {
    pub fn in_stock(&self) -> bool {
        self.stock > 0
    }

    /// Unit price in centavos.
    pub fn unit_price_cents(&self) -> i64 {
        pricing::cents_from_pesos(self.price)
    }
}

// ---------------------------------------------------------------------------
// Backend fetches
// ---------------------------------------------------------------------------

/// Fetch the full product list from the backend.
pub async fn fetch_products(api: &ApiClient) -> Result<Vec<Product>, String> {
    let raw = api
        .get("/api/products")
        .await
        .map_err(|e| e.to_string())?;
    parse_products(&raw)
}

/// Fetch a single product by id.
pub async fn fetch_product(api: &ApiClient, product_id: i64) -> Result<Product, String> {
    let raw = api
        .get(&format!("/api/products/{product_id}"))
        .await
        .map_err(|e| e.to_string())?;
    serde_json::from_value(raw).map_err(|e| format!("parse product {product_id}: {e}"))
}

/// Decode a product array, skipping entries that fail to parse so one bad
/// record cannot blank the whole catalog.
fn parse_products(raw: &Value) -> Result<Vec<Product>, String> {
    let entries = raw
        .as_array()
        .ok_or("Product list response is not an array")?;
    let mut products = Vec::with_capacity(entries.len());
    for entry in entries {
        match serde_json::from_value::<Product>(entry.clone()) {
            Ok(p) => products.push(p),
            Err(e) => warn!("skipping malformed product entry: {e}"),
        }
    }
    Ok(products)
}

// ---------------------------------------------------------------------------
// Local cache
// ---------------------------------------------------------------------------

/// Compute a stable version digest from the product payload itself, so
/// response timestamps never read as catalog changes.
fn compute_catalog_version(data: &Value) -> String {
    let serialized = serde_json::to_string(data).unwrap_or_else(|_| "[]".to_string());
    let mut hasher = DefaultHasher::new();
    serialized.hash(&mut hasher);
    format!("digest:{:016x}", hasher.finish())
}

/// Upsert the product payload into the cache unless the version already
/// matches. Returns whether a write happened.
fn write_catalog_cache(db: &DbState, data: &Value, version: &str) -> Result<bool, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    let cached_version: Option<String> = conn
        .query_row(
            "SELECT version FROM catalog_cache WHERE cache_key = ?1",
            rusqlite::params![PRODUCTS_CACHE_KEY],
            |row| row.get(0),
        )
        .ok()
        .flatten();

    if cached_version.as_deref() == Some(version) {
        trace!(version, "catalog cache already at latest version");
        return Ok(false);
    }

    let json_str = serde_json::to_string(data).map_err(|e| format!("serialize catalog: {e}"))?;
    conn.execute(
        "INSERT INTO catalog_cache (id, cache_key, data, version, updated_at)
         VALUES (lower(hex(randomblob(16))), ?1, ?2, ?3, datetime('now'))
         ON CONFLICT(cache_key) DO UPDATE SET
            data = excluded.data,
            version = excluded.version,
            updated_at = excluded.updated_at",
        rusqlite::params![PRODUCTS_CACHE_KEY, json_str, version],
    )
    .map_err(|e| format!("upsert catalog_cache: {e}"))?;
    Ok(true)
}

/// Fetch products from the backend and refresh the local cache.
pub async fn sync_catalog(api: &ApiClient, db: &DbState) -> Result<Value, String> {
    let raw = api
        .get("/api/products")
        .await
        .map_err(|e| e.to_string())?;
    if !raw.is_array() {
        return Err("Product list response is not an array".to_string());
    }

    let count = raw.as_array().map(|a| a.len()).unwrap_or(0);
    let version = compute_catalog_version(&raw);
    let updated = write_catalog_cache(db, &raw, &version)?;

    if updated {
        info!(count, version = %version, "catalog cache updated");
    }

    Ok(serde_json::json!({
        "success": true,
        "updated": updated,
        "version": version,
        "count": count,
    }))
}

/// Read the cached product list. Returns an empty list on miss or error.
pub fn cached_products(db: &DbState) -> Vec<Product> {
    let conn = match db.conn.lock() {
        Ok(c) => c,
        Err(e) => {
            error!("catalog cache lock failed: {e}");
            return vec![];
        }
    };

    let json_str: Option<String> = conn
        .query_row(
            "SELECT data FROM catalog_cache WHERE cache_key = ?1",
            rusqlite::params![PRODUCTS_CACHE_KEY],
            |row| row.get(0),
        )
        .ok();

    match json_str {
        Some(s) => match serde_json::from_str::<Value>(&s) {
            Ok(value) => parse_products(&value).unwrap_or_default(),
            Err(e) => {
                error!("catalog cache JSON parse error: {e}");
                vec![]
            }
        },
        None => vec![],
    }
}

/// Spawn the background catalog refresh loop. Failures are logged and the
/// loop keeps going; a dead backend must not kill the task.
pub fn start_catalog_refresh_loop(
    db: Arc<DbState>,
    api: Arc<ApiClient>,
    interval_secs: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match sync_catalog(&api, &db).await {
                Ok(result) => {
                    let updated = result
                        .get("updated")
                        .and_then(Value::as_bool)
                        .unwrap_or(false);
                    if updated {
                        trace!("catalog refresh applied new payload");
                    }
                }
                Err(error) => warn!(error = %error, "catalog refresh failed"),
            }
        }
    })
}

// ---------------------------------------------------------------------------
// Storefront filter & sort
// ---------------------------------------------------------------------------

/// Price ceiling applied when the shopper has not set one, in centavos.
pub const DEFAULT_MAX_PRICE_CENTS: i64 = 5000_00;

/// Category + price-range filter from the storefront sidebar.
#[derive(Debug, Clone)]
pub struct CatalogFilter {
    /// Empty means every category passes.
    pub categories: Vec<String>,
    pub min_price_cents: i64,
    pub max_price_cents: i64,
}

impl Default for CatalogFilter {
    fn default() -> Self {
        CatalogFilter {
            categories: vec![],
            min_price_cents: 0,
            max_price_cents: DEFAULT_MAX_PRICE_CENTS,
        }
    }
}

/// Apply the sidebar filter to a product list.
pub fn filter_products(products: &[Product], filter: &CatalogFilter) -> Vec<Product> {
    products
        .iter()
        .filter(|p| {
            filter.categories.is_empty() || filter.categories.iter().any(|c| *c == p.category)
        })
        .filter(|p| {
            let cents = p.unit_price_cents();
            cents >= filter.min_price_cents && cents <= filter.max_price_cents
        })
        .cloned()
        .collect()
}

/// Storefront sort orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    PriceLowToHigh,
    PriceHighToLow,
    /// Descending id; newest products have the highest ids.
    Newest,
}

impl SortKey {
    /// Parse the sort-select value (`price-low`, `price-high`, `newest`).
    pub fn parse(raw: &str) -> Option<SortKey> {
        match raw {
            "price-low" => Some(SortKey::PriceLowToHigh),
            "price-high" => Some(SortKey::PriceHighToLow),
            "newest" => Some(SortKey::Newest),
            _ => None,
        }
    }
}

/// Sort a product list by the given key.
pub fn sort_products(mut products: Vec<Product>, key: SortKey) -> Vec<Product> {
    match key {
        SortKey::PriceLowToHigh => {
            products.sort_by_key(Product::unit_price_cents);
        }
        SortKey::PriceHighToLow => {
            products.sort_by_key(|p| std::cmp::Reverse(p.unit_price_cents()));
        }
        SortKey::Newest => {
            products.sort_by_key(|p| std::cmp::Reverse(p.id));
        }
    }
    products
}

// ===========================================================================
// Tests
// ===========================================================================
