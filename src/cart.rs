//! Local cart store.
//!
//! One row per product id in the `cart_lines` table — the id is the key, so
//! stale-position bugs from the old index-addressed array cannot occur.
//! Writes are last-write-wins with no cross-process coordination: two
//! instances sharing a profile can silently overwrite each other, a known
//! and accepted consistency gap carried over from the browser build.

use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::{debug, info, warn};

use crate::api::ApiClient;
use crate::catalog::Product;
use crate::db::DbState;
use crate::pricing::{OrderTotals, ShippingMethod};

/// One product-and-quantity entry in the shopping cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: i64,
    pub name: String,
    pub unit_price_cents: i64,
    pub image_url: String,
    pub quantity: i64,
}

impl CartLine {
    pub fn line_total_cents(&self) -> i64 {
        self.unit_price_cents * self.quantity
    }

    /// Build a line from a catalog product and a quantity.
    pub fn from_product(product: &Product, quantity: i64) -> CartLine {
        CartLine {
            product_id: product.id,
            name: product.name.clone(),
            unit_price_cents: product.unit_price_cents(),
            image_url: product.image.clone(),
            quantity,
        }
    }
}

// ---------------------------------------------------------------------------
// Mutations
// ---------------------------------------------------------------------------

/// Add `quantity` of a product to the cart. If a line for the product already
/// exists its quantity is incremented, otherwise a new line is appended.
///
/// A quantity ≤ 0 is a silent no-op — callers validate upstream. Out-of-stock
/// products are rejected.
pub fn add_item(db: &DbState, product: &Product, quantity: i64) -> Result<(), String> {
    if quantity <= 0 {
        debug!(product_id = product.id, quantity, "ignoring non-positive add");
        return Ok(());
    }
    if product.stock <= 0 {
        return Err("Product is out of stock".into());
    }

    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    conn.execute(
        "INSERT INTO cart_lines (product_id, name, unit_price_cents, image_url, quantity)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(product_id) DO UPDATE SET
            quantity = quantity + excluded.quantity,
            name = excluded.name,
            unit_price_cents = excluded.unit_price_cents,
            image_url = excluded.image_url,
            updated_at = datetime('now')",
        params![
            product.id,
            product.name,
            product.unit_price_cents(),
            product.image,
            quantity,
        ],
    )
    .map_err(|e| format!("add cart line: {e}"))?;

    info!(product_id = product.id, quantity, "added to cart");
    Ok(())
}

/// Overwrite the quantity of a cart line. A quantity ≤ 0 is a no-op (the UI
/// removes lines through `remove_item`, never by zeroing them); an unknown
/// product id is also a no-op.
pub fn set_quantity(db: &DbState, product_id: i64, quantity: i64) -> Result<(), String> {
    if quantity <= 0 {
        debug!(product_id, quantity, "ignoring non-positive quantity set");
        return Ok(());
    }

    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    conn.execute(
        "UPDATE cart_lines SET quantity = ?1, updated_at = datetime('now')
         WHERE product_id = ?2",
        params![quantity, product_id],
    )
    .map_err(|e| format!("set cart quantity: {e}"))?;
    Ok(())
}

/// Change a line's quantity with backend confirmation: `PUT
/// /api/cart/update/{productId}` first, local overwrite only once the
/// backend accepts. On failure the local line is untouched and the error is
/// returned for the page to show.
pub async fn update_quantity(
    api: &ApiClient,
    db: &DbState,
    product_id: i64,
    quantity: i64,
) -> Result<(), String> {
    if quantity <= 0 {
        debug!(product_id, quantity, "ignoring non-positive quantity update");
        return Ok(());
    }

    api.put(
        &format!("/api/cart/update/{product_id}"),
        &serde_json::json!({ "quantity": quantity }),
    )
    .await
    .map_err(|_| "Failed to update cart".to_string())?;

    set_quantity(db, product_id, quantity)
}

/// Remove the line for a product. Removing an absent product is a no-op.
pub fn remove_item(db: &DbState, product_id: i64) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    conn.execute(
        "DELETE FROM cart_lines WHERE product_id = ?1",
        params![product_id],
    )
    .map_err(|e| format!("remove cart line: {e}"))?;
    Ok(())
}

/// Empty the cart (used after a successful order).
pub fn clear(db: &DbState) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    conn.execute("DELETE FROM cart_lines", [])
        .map_err(|e| format!("clear cart: {e}"))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

/// The persisted cart in insertion order. Unreadable rows are skipped with a
/// warning and a failed load returns an empty cart — a broken local store
/// must never take the page down.
pub fn load(db: &DbState) -> Vec<CartLine> {
    let conn = match db.conn.lock() {
        Ok(c) => c,
        Err(e) => {
            warn!("cart lock failed: {e}");
            return vec![];
        }
    };

    let mut stmt = match conn.prepare(
        "SELECT product_id, name, unit_price_cents, image_url, quantity
         FROM cart_lines ORDER BY added_at, product_id",
    ) {
        Ok(s) => s,
        Err(e) => {
            warn!("cart query prepare failed: {e}");
            return vec![];
        }
    };

    let rows = match stmt.query_map([], |row| {
        Ok(CartLine {
            product_id: row.get(0)?,
            name: row.get(1)?,
            unit_price_cents: row.get(2)?,
            image_url: row.get(3)?,
            quantity: row.get(4)?,
        })
    }) {
        Ok(r) => r,
        Err(e) => {
            warn!("cart query failed: {e}");
            return vec![];
        }
    };

    let mut lines = Vec::new();
    for row in rows {
        match row {
            Ok(line) => lines.push(line),
            Err(e) => warn!("skipping malformed cart row: {e}"),
        }
    }
    lines
}

/// Total quantity across all lines (the header badge count).
pub fn item_count(db: &DbState) -> i64 {
    let conn = match db.conn.lock() {
        Ok(c) => c,
        Err(_) => return 0,
    };
    conn.query_row(
        "SELECT COALESCE(SUM(quantity), 0) FROM cart_lines",
        [],
        |row| row.get(0),
    )
    .unwrap_or(0)
}

/// Totals for the current cart under the given shipping method.
pub fn summary(db: &DbState, method: ShippingMethod) -> OrderTotals {
    OrderTotals::compute(&load(db), method)
}

// ---------------------------------------------------------------------------
// Buy-now slot
// ---------------------------------------------------------------------------

/// Session-scoped single-item slot for the express "buy now" path. Lives in
/// process memory only, so an abandoned slot dies with the session instead
/// of leaking into the persistent cart.
#[derive(Default)]
pub struct BuyNowState {
    slot: Mutex<Option<CartLine>>,
}

impl BuyNowState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a product for immediate checkout, replacing any previous slot.
    /// The same guards as `add_item` apply.
    pub fn stage(&self, product: &Product, quantity: i64) -> Result<(), String> {
        if quantity <= 0 {
            return Err("Quantity must be at least 1".into());
        }
        if product.stock <= 0 {
            return Err("Product is out of stock".into());
        }
        let mut slot = self.slot.lock().map_err(|e| e.to_string())?;
        *slot = Some(CartLine::from_product(product, quantity));
        Ok(())
    }

    /// The staged line, if any, without consuming it.
    pub fn peek(&self) -> Option<CartLine> {
        self.slot.lock().ok().and_then(|s| s.clone())
    }

    /// Consume the staged line (called when the order is accepted).
    pub fn take(&self) -> Option<CartLine> {
        self.slot.lock().ok().and_then(|mut s| s.take())
    }

    pub fn clear(&self) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = None;
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use rusqlite::Connection;

    fn test_db() -> DbState {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        db::run_migrations_for_test(&conn);
        DbState {
            conn: std::sync::Mutex::new(conn),
            db_path: std::path::PathBuf::from(":memory:"),
        }
    }

    fn product(id: i64, price: f64, stock: i64) -> Product {
        Product {
            id,
            name: format!("Product {id}"),
            price,
            stock,
            category: "weights".into(),
            ..Product::default()
        }
    }

    #[test]
    fn add_merges_quantities_for_same_product() {
        let db = test_db();
        let p = product(7, 1000.0, 50);

        add_item(&db, &p, 2).expect("first add");
        add_item(&db, &p, 3).expect("second add");

        let cart = load(&db);
        assert_eq!(cart.len(), 1);
        assert_eq!(cart[0].quantity, 5);
        assert_eq!(cart[0].unit_price_cents, 1000_00);
        assert_eq!(item_count(&db), 5);
    }

    #[test]
    fn add_with_non_positive_quantity_is_noop() {
        let db = test_db();
        let p = product(1, 500.0, 10);

        add_item(&db, &p, 0).expect("zero add");
        add_item(&db, &p, -4).expect("negative add");
        assert!(load(&db).is_empty());
    }

    #[test]
    fn add_rejects_out_of_stock() {
        let db = test_db();
        let p = product(1, 500.0, 0);
        let err = add_item(&db, &p, 1).expect_err("out of stock");
        assert_eq!(err, "Product is out of stock");
        assert!(load(&db).is_empty());
    }

    #[test]
    fn set_quantity_overwrites_but_rejects_non_positive() {
        let db = test_db();
        let p = product(3, 250.0, 10);
        add_item(&db, &p, 2).expect("add");

        set_quantity(&db, 3, 7).expect("set");
        assert_eq!(load(&db)[0].quantity, 7);

        // Non-positive leaves the cart unchanged
        set_quantity(&db, 3, 0).expect("zero set");
        set_quantity(&db, 3, -1).expect("negative set");
        assert_eq!(load(&db)[0].quantity, 7);

        // Unknown product is a no-op
        set_quantity(&db, 99, 4).expect("unknown set");
        assert_eq!(load(&db).len(), 1);
    }

    #[test]
    fn remove_targets_the_right_product() {
        let db = test_db();
        add_item(&db, &product(1, 100.0, 5), 1).expect("add 1");
        add_item(&db, &product(2, 200.0, 5), 1).expect("add 2");
        add_item(&db, &product(3, 300.0, 5), 1).expect("add 3");

        remove_item(&db, 2).expect("remove");

        let ids: Vec<i64> = load(&db).iter().map(|l| l.product_id).collect();
        assert_eq!(ids, vec![1, 3]);

        remove_item(&db, 42).expect("remove absent is a no-op");
        assert_eq!(load(&db).len(), 2);
    }

    #[test]
    fn clear_empties_the_cart() {
        let db = test_db();
        add_item(&db, &product(1, 100.0, 5), 2).expect("add");
        clear(&db).expect("clear");
        assert!(load(&db).is_empty());
        assert_eq!(item_count(&db), 0);
    }

    #[test]
    fn summary_uses_the_order_total_calculator() {
        let db = test_db();
        add_item(&db, &product(1, 1000.0, 5), 2).expect("add");

        let totals = summary(&db, ShippingMethod::Standard);
        assert_eq!(totals.subtotal_cents, 2000_00);
        assert_eq!(totals.vat_cents, 240_00);
        assert_eq!(totals.shipping_cents, 150_00);
        assert_eq!(totals.total_cents, 2390_00);
    }

    #[test]
    fn buy_now_slot_is_replace_and_take() {
        let buy_now = BuyNowState::new();
        assert!(buy_now.peek().is_none());

        buy_now.stage(&product(5, 750.0, 3), 1).expect("stage");
        buy_now.stage(&product(6, 800.0, 3), 2).expect("restage");

        let staged = buy_now.peek().expect("peek");
        assert_eq!(staged.product_id, 6);
        assert_eq!(staged.quantity, 2);

        let taken = buy_now.take().expect("take");
        assert_eq!(taken.product_id, 6);
        assert!(buy_now.peek().is_none(), "take consumes the slot");
    }

    #[tokio::test]
    async fn remote_update_skips_the_backend_for_non_positive_quantities() {
        let db = test_db();
        let p = product(3, 250.0, 10);
        add_item(&db, &p, 2).expect("add");

        // Unreachable backend: a no-op quantity never even sends
        let api = ApiClient::new("http://localhost:1").expect("client");
        update_quantity(&api, &db, 3, 0).await.expect("no-op");
        assert_eq!(load(&db)[0].quantity, 2);

        // A real update against a dead backend fails and leaves the line alone
        let err = update_quantity(&api, &db, 3, 5).await.expect_err("dead backend");
        assert_eq!(err, "Failed to update cart");
        assert_eq!(load(&db)[0].quantity, 2);
    }

    #[test]
    fn buy_now_rejects_bad_input() {
        let buy_now = BuyNowState::new();
        assert!(buy_now.stage(&product(1, 100.0, 5), 0).is_err());
        assert!(buy_now.stage(&product(1, 100.0, 0), 1).is_err());
        assert!(buy_now.peek().is_none());
    }
}
