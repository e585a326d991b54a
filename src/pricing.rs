//! Order-total computation.
//!
//! The single place VAT, shipping, and totals are computed — every page
//! (cart, checkout, order display, admin modals) goes through here instead
//! of repeating the arithmetic. Money is carried in integer centavos so
//! repeated recomputation cannot drift the way floating-point accumulation
//! does; conversion to decimal pesos happens only at the wire/display edge.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cart::CartLine;

/// Fixed VAT rate, percent. A jurisdiction constant, not runtime config.
pub const VAT_RATE_PERCENT: i64 = 12;

/// Flat shipping fees in centavos.
pub const STANDARD_SHIPPING_CENTS: i64 = 150_00;
pub const EXPRESS_SHIPPING_CENTS: i64 = 300_00;

// ---------------------------------------------------------------------------
// Shipping method
// ---------------------------------------------------------------------------

/// Shipping options offered at checkout. Flat rates, not weight or distance
/// based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShippingMethod {
    Standard,
    Express,
}

impl ShippingMethod {
    /// Flat shipping fee for this method, in centavos.
    pub fn fee_cents(self) -> i64 {
        match self {
            ShippingMethod::Standard => STANDARD_SHIPPING_CENTS,
            ShippingMethod::Express => EXPRESS_SHIPPING_CENTS,
        }
    }

    /// Wire form used in order payloads (`"standard"` / `"express"`).
    pub fn as_str(self) -> &'static str {
        match self {
            ShippingMethod::Standard => "standard",
            ShippingMethod::Express => "express",
        }
    }

    /// Parse the wire form. Anything unrecognised reads as standard, which
    /// matches how the pages treated a missing selection.
    pub fn parse(raw: &str) -> ShippingMethod {
        match raw.trim().to_lowercase().as_str() {
            "express" => ShippingMethod::Express,
            _ => ShippingMethod::Standard,
        }
    }
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

/// Decimal pesos (wire format) to centavos, rounding to the nearest centavo.
pub fn cents_from_pesos(pesos: f64) -> i64 {
    (pesos * 100.0).round() as i64
}

/// Centavos to decimal pesos for wire payloads.
pub fn pesos(cents: i64) -> f64 {
    cents as f64 / 100.0
}

/// Display form with the peso sign and two decimals, e.g. `₱2390.00`.
pub fn format_pesos(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.abs();
    format!("{sign}₱{}.{:02}", abs / 100, abs % 100)
}

/// VAT due on a subtotal, half-up rounded to the centavo.
pub fn vat_cents(subtotal_cents: i64) -> i64 {
    (subtotal_cents * VAT_RATE_PERCENT + 50) / 100
}

// ---------------------------------------------------------------------------
// Order totals
// ---------------------------------------------------------------------------

/// Derived totals for a cart and shipping selection. Never persisted —
/// always recomputed from the lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OrderTotals {
    pub subtotal_cents: i64,
    pub vat_cents: i64,
    pub shipping_cents: i64,
    pub total_cents: i64,
}

impl OrderTotals {
    /// Compute totals for the given lines. Shipping is allocated once per
    /// order regardless of line count.
    pub fn compute(lines: &[CartLine], method: ShippingMethod) -> OrderTotals {
        let subtotal_cents: i64 = lines.iter().map(CartLine::line_total_cents).sum();
        let vat = vat_cents(subtotal_cents);
        let shipping = method.fee_cents();
        OrderTotals {
            subtotal_cents,
            vat_cents: vat,
            shipping_cents: shipping,
            total_cents: subtotal_cents + vat + shipping,
        }
    }

    /// Wire shape in decimal pesos, matching the backend's order fields.
    pub fn to_json(self) -> Value {
        serde_json::json!({
            "subtotal": pesos(self.subtotal_cents),
            "vat": pesos(self.vat_cents),
            "shippingCost": pesos(self.shipping_cents),
            "total": pesos(self.total_cents),
        })
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn line(product_id: i64, unit_price_cents: i64, quantity: i64) -> CartLine {
        CartLine {
            product_id,
            name: format!("Product {product_id}"),
            unit_price_cents,
            image_url: String::new(),
            quantity,
        }
    }

    #[test]
    fn standard_shipping_scenario() {
        // cart = [{price:1000, qty:2}], shipping=standard
        let totals = OrderTotals::compute(&[line(1, 1000_00, 2)], ShippingMethod::Standard);
        assert_eq!(totals.subtotal_cents, 2000_00);
        assert_eq!(totals.vat_cents, 240_00);
        assert_eq!(totals.shipping_cents, 150_00);
        assert_eq!(totals.total_cents, 2390_00);
    }

    #[test]
    fn express_shipping_scenario() {
        // cart = [{price:500, qty:1}], shipping=express
        let totals = OrderTotals::compute(&[line(1, 500_00, 1)], ShippingMethod::Express);
        assert_eq!(totals.subtotal_cents, 500_00);
        assert_eq!(totals.vat_cents, 60_00);
        assert_eq!(totals.shipping_cents, 300_00);
        assert_eq!(totals.total_cents, 860_00);
    }

    #[test]
    fn recomputation_is_deterministic() {
        let lines = vec![line(1, 129_50, 3), line(2, 899_99, 1)];
        let first = OrderTotals::compute(&lines, ShippingMethod::Standard);
        let second = OrderTotals::compute(&lines, ShippingMethod::Standard);
        assert_eq!(first, second);
    }

    #[test]
    fn vat_rounds_half_up() {
        // 12% of 1.04 = 0.1248 → 0.12
        assert_eq!(vat_cents(104), 12);
        // 12% of 1.21 = 0.1452 → 0.15
        assert_eq!(vat_cents(121), 15);
        // 12% of 0.37 = 0.0444 → 0.04
        assert_eq!(vat_cents(37), 4);
        assert_eq!(vat_cents(0), 0);
    }

    #[test]
    fn empty_cart_totals_are_shipping_only() {
        let totals = OrderTotals::compute(&[], ShippingMethod::Standard);
        assert_eq!(totals.subtotal_cents, 0);
        assert_eq!(totals.vat_cents, 0);
        assert_eq!(totals.total_cents, STANDARD_SHIPPING_CENTS);
    }

    #[test]
    fn peso_conversions() {
        assert_eq!(cents_from_pesos(1234.56), 123456);
        assert_eq!(cents_from_pesos(0.1), 10);
        // Binary-float prices land on the right centavo
        assert_eq!(cents_from_pesos(19.99), 1999);
        assert_eq!(pesos(2390_00), 2390.0);
        assert_eq!(format_pesos(2390_00), "₱2390.00");
        assert_eq!(format_pesos(5), "₱0.05");
        assert_eq!(format_pesos(-150_00), "-₱150.00");
    }

    #[test]
    fn shipping_method_parse_defaults_to_standard() {
        assert_eq!(ShippingMethod::parse("express"), ShippingMethod::Express);
        assert_eq!(ShippingMethod::parse("EXPRESS"), ShippingMethod::Express);
        assert_eq!(ShippingMethod::parse("standard"), ShippingMethod::Standard);
        assert_eq!(ShippingMethod::parse(""), ShippingMethod::Standard);
        assert_eq!(ShippingMethod::parse("pickup"), ShippingMethod::Standard);
    }

    #[test]
    fn totals_wire_shape_uses_decimal_pesos() {
        let totals = OrderTotals::compute(&[line(1, 1000_00, 2)], ShippingMethod::Standard);
        let json = totals.to_json();
        assert_eq!(json["subtotal"], 2000.0);
        assert_eq!(json["vat"], 240.0);
        assert_eq!(json["shippingCost"], 150.0);
        assert_eq!(json["total"], 2390.0);
    }
}
