//! Checkout: shipping form validation, order draft assembly, submission.
//!
//! Submission holds a per-process in-flight lock so a double-activated
//! "Place Order" cannot create two orders, and the local order-history cache
//! is written only after the backend accepts the order — a failed POST
//! leaves the cart and the buy-now slot exactly as they were.

use chrono::{DateTime, Datelike, Duration, NaiveDate, SecondsFormat, Utc};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};
use uuid::Uuid;

use crate::api::ApiClient;
use crate::cart::{self, BuyNowState, CartLine};
use crate::db::DbState;
use crate::orders;
use crate::pricing::{self, OrderTotals, ShippingMethod};
use crate::storage;

const DEFAULT_COUNTRY: &str = "Philippines";

// ---------------------------------------------------------------------------
// Shipping form
// ---------------------------------------------------------------------------

/// The checkout form fields. All are required.
#[derive(Debug, Clone, Default)]
pub struct ShippingForm {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    /// Free-form address line; may pack street/city/province/zip/country
    /// comma-separated, in which case the parts win over the other fields.
    pub address: String,
    pub city: String,
    pub province: String,
    pub postal_code: String,
}

/// Structured shipping destination derived from the form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShippingAddress {
    pub street: Option<String>,
    pub city: Option<String>,
    pub province: Option<String>,
    pub zip_code: Option<String>,
    pub country: String,
}

impl ShippingForm {
    /// Reject the submission when any required field is blank.
    pub fn validate(&self) -> Result<(), String> {
        let required = [
            &self.first_name,
            &self.last_name,
            &self.email,
            &self.phone,
            &self.address,
            &self.city,
            &self.province,
            &self.postal_code,
        ];
        if required.iter().any(|f| f.trim().is_empty()) {
            return Err("Please fill in all required fields".into());
        }
        Ok(())
    }

    /// Split the free-form address on commas into structured fields, falling
    /// back to the dedicated form fields for the parts it does not cover.
    pub fn split_address(&self) -> ShippingAddress {
        let field = |s: &str| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        };

        let raw = self.address.trim();
        if raw.is_empty() {
            return ShippingAddress {
                street: None,
                city: field(&self.city),
                province: field(&self.province),
                zip_code: field(&self.postal_code),
                country: DEFAULT_COUNTRY.to_string(),
            };
        }

        let mut parts = raw.split(',').map(str::trim);
        let street = parts.next().and_then(|p| field(p));
        let city = parts.next().and_then(|p| field(p)).or_else(|| field(&self.city));
        let province = parts
            .next()
            .and_then(|p| field(p))
            .or_else(|| field(&self.province));
        let zip_code = parts
            .next()
            .and_then(|p| field(p))
            .or_else(|| field(&self.postal_code));
        let country = parts
            .next()
            .and_then(|p| field(p))
            .unwrap_or_else(|| DEFAULT_COUNTRY.to_string());

        ShippingAddress {
            street,
            city,
            province,
            zip_code,
            country,
        }
    }
}

// ---------------------------------------------------------------------------
// Order id & delivery window
// ---------------------------------------------------------------------------

/// Client-generated order id: `ORD` + the last six digits of epoch millis +
/// four uppercase hex characters of entropy.
pub fn generate_order_id() -> String {
    let millis = Utc::now().timestamp_millis().max(0).to_string();
    let tail = if millis.len() > 6 {
        &millis[millis.len() - 6..]
    } else {
        &millis
    };
    let entropy = Uuid::new_v4().simple().to_string();
    let suffix: String = entropy.chars().take(4).collect::<String>().to_uppercase();
    format!("ORD{tail}{suffix}")
}

/// Estimated delivery window: 3 to 5 days after the order date, each bound
/// computed independently from the order date.
pub fn delivery_window(placed_at: DateTime<Utc>) -> (NaiveDate, NaiveDate) {
    let order_date = placed_at.date_naive();
    (order_date + Duration::days(3), order_date + Duration::days(5))
}

/// Render the window the way the confirmation page shows it, e.g.
/// `August 11 - August 13, 2026`.
pub fn format_delivery_window(placed_at: DateTime<Utc>) -> String {
    let (start, end) = delivery_window(placed_at);
    format!(
        "{} {} - {} {}, {}",
        start.format("%B"),
        start.day(),
        end.format("%B"),
        end.day(),
        end.year(),
    )
}

// ---------------------------------------------------------------------------
// Submission lock
// ---------------------------------------------------------------------------

/// Per-process submission state: at most one order POST in flight.
#[derive(Default)]
pub struct CheckoutState {
    in_flight: AtomicBool,
}

impl CheckoutState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the in-flight slot; fails when a submission is already running.
    /// The returned guard releases the slot on drop, whatever path the
    /// submission takes out of scope.
    fn begin(&self) -> Result<SubmitGuard<'_>, String> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err("An order is already being placed".into());
        }
        Ok(SubmitGuard { state: self })
    }
}

struct SubmitGuard<'a> {
    state: &'a CheckoutState,
}

impl Drop for SubmitGuard<'_> {
    fn drop(&mut self) {
        self.state.in_flight.store(false, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Order submission
// ---------------------------------------------------------------------------

/// Which line source this checkout drains.
#[derive(Clone, Copy)]
pub enum CheckoutSource<'a> {
    /// The persistent cart.
    Cart,
    /// The session-scoped buy-now slot.
    BuyNow(&'a BuyNowState),
}

/// Build the order JSON the backend expects (camelCase, decimal pesos,
/// structured shipping fields alongside the flat ones).
fn order_payload(
    order_id: &str,
    customer_id: i64,
    placed_at: DateTime<Utc>,
    lines: &[CartLine],
    totals: OrderTotals,
    form: &ShippingForm,
    method: ShippingMethod,
) -> Value {
    let address = form.split_address();
    let items: Vec<Value> = lines
        .iter()
        .map(|line| {
            serde_json::json!({
                "id": line.product_id,
                "quantity": line.quantity,
                "price": pricing::pesos(line.unit_price_cents),
                "name": line.name,
                "image": line.image_url,
            })
        })
        .collect();

    serde_json::json!({
        "orderId": order_id,
        "customerId": customer_id,
        "orderDate": placed_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        "status": "PENDING",
        "total": pricing::pesos(totals.total_cents),
        "subtotal": pricing::pesos(totals.subtotal_cents),
        "vat": pricing::pesos(totals.vat_cents),
        "shippingCost": pricing::pesos(totals.shipping_cents),
        "items": items,
        "firstName": form.first_name.trim(),
        "lastName": form.last_name.trim(),
        "email": form.email.trim(),
        "phone": form.phone.trim(),
        "shippingAddress": form.address.trim(),
        "city": form.city.trim(),
        "state": form.province.trim(),
        "zip": form.postal_code.trim(),
        "country": DEFAULT_COUNTRY,
        "shippingMethod": method.as_str(),
        "paymentMethod": "COD",
        "shippingStreet": address.street,
        "shippingCity": address.city,
        "shippingProvince": address.province,
        "shippingZipCode": address.zip_code,
        "shippingCountry": address.country,
    })
}

/// Place an order from the cart or the buy-now slot.
///
/// On success the drained source is cleared and the confirmed order lands in
/// the local history cache. On any failure the source is left untouched and
/// the error is returned for the page to show.
pub async fn place_order(
    api: &ApiClient,
    db: &DbState,
    state: &CheckoutState,
    form: &ShippingForm,
    method: ShippingMethod,
    source: CheckoutSource<'_>,
) -> Result<Value, String> {
    let _guard = state.begin()?;

    form.validate()?;

    let lines: Vec<CartLine> = match source {
        CheckoutSource::Cart => cart::load(db),
        CheckoutSource::BuyNow(slot) => slot.peek().into_iter().collect(),
    };
    if lines.is_empty() {
        return Err("Your cart is empty".into());
    }

    let user = storage::cached_user().ok_or("Please sign in to place an order")?;
    let customer_id = user
        .get("id")
        .and_then(Value::as_i64)
        .ok_or("Please sign in to place an order")?;

    let order_id = generate_order_id();
    let placed_at = Utc::now();
    let totals = OrderTotals::compute(&lines, method);
    let payload = order_payload(
        &order_id,
        customer_id,
        placed_at,
        &lines,
        totals,
        form,
        method,
    );

    api.post("/api/orders", &payload)
        .await
        .map_err(|e| e.to_string())?;

    // The backend accepted the order: cache it locally and drain the source.
    if let Err(e) = orders::cache_order(db, &payload) {
        warn!(order_id = %order_id, "failed to cache confirmed order: {e}");
    }
    match source {
        CheckoutSource::Cart => cart::clear(db)?,
        CheckoutSource::BuyNow(slot) => {
            slot.take();
        }
    }

    info!(
        order_id = %order_id,
        customer_id,
        total = %pricing::format_pesos(totals.total_cents),
        "order placed"
    );

    Ok(serde_json::json!({
        "success": true,
        "orderId": order_id,
        "total": pricing::pesos(totals.total_cents),
        "estimatedDelivery": format_delivery_window(placed_at),
    }))
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn form() -> ShippingForm {
        ShippingForm {
            first_name: "Dan".into(),
            last_name: "Reyes".into(),
            email: "dan@example.com".into(),
            phone: "09175550123".into(),
            address: "12 Mabini St, Quezon City, Metro Manila, 1100".into(),
            city: "Quezon City".into(),
            province: "Metro Manila".into(),
            postal_code: "1100".into(),
        }
    }

    #[test]
    fn form_requires_every_field() {
        assert!(form().validate().is_ok());
        let mut missing = form();
        missing.phone = "   ".into();
        assert!(missing.validate().is_err());
    }

    #[test]
    fn address_splitting_prefers_comma_parts() {
        let address = form().split_address();
        assert_eq!(address.street.as_deref(), Some("12 Mabini St"));
        assert_eq!(address.city.as_deref(), Some("Quezon City"));
        assert_eq!(address.province.as_deref(), Some("Metro Manila"));
        assert_eq!(address.zip_code.as_deref(), Some("1100"));
        assert_eq!(address.country, "Philippines");
    }

    #[test]
    fn address_splitting_falls_back_to_form_fields() {
        let mut f = form();
        f.address = "12 Mabini St".into();
        let address = f.split_address();
        assert_eq!(address.street.as_deref(), Some("12 Mabini St"));
        assert_eq!(address.city.as_deref(), Some("Quezon City"));
        assert_eq!(address.province.as_deref(), Some("Metro Manila"));
        assert_eq!(address.zip_code.as_deref(), Some("1100"));

        f.address = String::new();
        let address = f.split_address();
        assert_eq!(address.street, None);
        assert_eq!(address.city.as_deref(), Some("Quezon City"));
        assert_eq!(address.country, "Philippines");
    }

    #[test]
    fn address_splitting_honors_explicit_country() {
        let mut f = form();
        f.address = "1 A St, Cebu City, Cebu, 6000, Singapore".into();
        assert_eq!(f.split_address().country, "Singapore");
    }

    #[test]
    fn order_id_shape() {
        let id = generate_order_id();
        assert!(id.starts_with("ORD"), "got {id}");
        assert_eq!(id.len(), 13, "got {id}");
        assert!(id[3..9].chars().all(|c| c.is_ascii_digit()));
        assert!(id[9..]
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    #[test]
    fn delivery_window_is_three_to_five_days() {
        let placed = Utc.with_ymd_and_hms(2026, 8, 8, 10, 30, 0).unwrap();
        let (start, end) = delivery_window(placed);
        assert_eq!(start, NaiveDate::from_ymd_opt(2026, 8, 11).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2026, 8, 13).unwrap());
        assert_eq!(
            format_delivery_window(placed),
            "August 11 - August 13, 2026"
        );
    }

    #[test]
    fn delivery_window_crosses_month_boundaries() {
        let placed = Utc.with_ymd_and_hms(2026, 1, 30, 23, 0, 0).unwrap();
        let (start, end) = delivery_window(placed);
        assert_eq!(start, NaiveDate::from_ymd_opt(2026, 2, 2).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2026, 2, 4).unwrap());
        assert_eq!(
            format_delivery_window(placed),
            "February 2 - February 4, 2026"
        );
    }

    #[test]
    fn payload_carries_totals_items_and_shipping_fields() {
        let placed = Utc.with_ymd_and_hms(2026, 8, 8, 10, 30, 0).unwrap();
        let lines = vec![CartLine {
            product_id: 7,
            name: "Kettlebell".into(),
            unit_price_cents: 1000_00,
            image_url: "placeholders/kettlebell.jpg".into(),
            quantity: 2,
        }];
        let totals = OrderTotals::compute(&lines, ShippingMethod::Standard);
        let payload = order_payload(
            "ORD123456ABCD",
            42,
            placed,
            &lines,
            totals,
            &form(),
            ShippingMethod::Standard,
        );

        assert_eq!(payload["orderId"], "ORD123456ABCD");
        assert_eq!(payload["customerId"], 42);
        assert_eq!(payload["status"], "PENDING");
        assert_eq!(payload["paymentMethod"], "COD");
        assert_eq!(payload["shippingMethod"], "standard");
        assert_eq!(payload["subtotal"], 2000.0);
        assert_eq!(payload["vat"], 240.0);
        assert_eq!(payload["shippingCost"], 150.0);
        assert_eq!(payload["total"], 2390.0);
        assert_eq!(payload["items"][0]["id"], 7);
        assert_eq!(payload["items"][0]["quantity"], 2);
        assert_eq!(payload["items"][0]["price"], 1000.0);
        assert_eq!(payload["shippingStreet"], "12 Mabini St");
        assert_eq!(payload["shippingCountry"], "Philippines");
    }

    #[tokio::test]
    async fn empty_cart_checkout_is_rejected_before_any_request() {
        let conn = rusqlite::Connection::open_in_memory().expect("open in-memory db");
        crate::db::run_migrations_for_test(&conn);
        let db = DbState {
            conn: std::sync::Mutex::new(conn),
            db_path: std::path::PathBuf::from(":memory:"),
        };
        let api = ApiClient::new("http://localhost:1").expect("client");
        let state = CheckoutState::new();

        let err = place_order(
            &api,
            &db,
            &state,
            &form(),
            ShippingMethod::Standard,
            CheckoutSource::Cart,
        )
        .await
        .expect_err("empty cart");
        assert_eq!(err, "Your cart is empty");

        // The buy-now path with an empty slot behaves the same
        let buy_now = BuyNowState::new();
        let err = place_order(
            &api,
            &db,
            &state,
            &form(),
            ShippingMethod::Standard,
            CheckoutSource::BuyNow(&buy_now),
        )
        .await
        .expect_err("empty slot");
        assert_eq!(err, "Your cart is empty");
    }

    #[test]
    fn submission_lock_rejects_a_second_claim() {
        let state = CheckoutState::new();
        let guard = state.begin().expect("first claim");
        assert!(state.begin().is_err(), "second claim must fail");
        drop(guard);
        assert!(state.begin().is_ok(), "released on drop");
    }
}
