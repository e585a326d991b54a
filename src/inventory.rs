//! Admin inventory operations.
//!
//! Product create/update/delete against the backend, image upload, and the
//! stock-status / stats / CSV-export helpers the inventory page renders from.

use serde_json::Value;
use tracing::info;

use crate::api::ApiClient;
use crate::catalog::Product;
use crate::pricing;

/// Stock below this count shows as "Low Stock".
pub const LOW_STOCK_THRESHOLD: i64 = 10;

// ---------------------------------------------------------------------------
// Product form
// ---------------------------------------------------------------------------

/// The admin product form as submitted. `id` never travels in the body:
/// creates omit it, updates carry it in the URL.
#[derive(Debug, Clone, Default)]
pub struct ProductForm {
    pub name: String,
    pub category: String,
    pub price: f64,
    pub stock: i64,
    pub description: String,
    pub sku: String,
    pub status: String,
    pub image: String,
    pub brand: String,
    pub features: Vec<String>,
    pub specifications: serde_json::Map<String, Value>,
}

impl ProductForm {
    /// Validate the required fields the way the form did: name and category
    /// present, price strictly positive, stock non-negative.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() || self.category.trim().is_empty() {
            return Err("Please fill all required fields correctly".into());
        }
        if !self.price.is_finite() || self.price <= 0.0 {
            return Err("Price must be greater than zero".into());
        }
        if self.stock < 0 {
            return Err("Stock cannot be negative".into());
        }
        Ok(())
    }

    fn to_body(&self) -> Value {
        serde_json::json!({
            "name": self.name.trim(),
            "category": self.category,
            "price": self.price,
            "stock": self.stock,
            "description": self.description.trim(),
            "sku": self.sku,
            "status": self.status,
            "image": self.image,
            "brand": self.brand,
            "features": self.features,
            "specifications": self.specifications,
        })
    }
}

// ---------------------------------------------------------------------------
// CRUD
// ---------------------------------------------------------------------------

/// Create a product (`POST /api/products`).
pub async fn create_product(api: &ApiClient, form: &ProductForm) -> Result<Product, String> {
    form.validate()?;
    let created = api
        .post("/api/products", &form.to_body())
        .await
        .map_err(|e| e.to_string())?;
    let product: Product =
        serde_json::from_value(created).map_err(|e| format!("parse created product: {e}"))?;
    info!(product_id = product.id, name = %product.name, "product created");
    Ok(product)
}

/// Update a product (`PUT /api/products/{id}`).
pub async fn update_product(
    api: &ApiClient,
    product_id: i64,
    form: &ProductForm,
) -> Result<Product, String> {
    form.validate()?;
    let updated = api
        .put(&format!("/api/products/{product_id}"), &form.to_body())
        .await
        .map_err(|e| e.to_string())?;
    let product: Product =
        serde_json::from_value(updated).map_err(|e| format!("parse updated product: {e}"))?;
    info!(product_id, name = %product.name, "product updated");
    Ok(product)
}

/// Delete a product (`DELETE /api/products/{id}`).
pub async fn delete_product(api: &ApiClient, product_id: i64) -> Result<(), String> {
    api.delete(&format!("/api/products/{product_id}"))
        .await
        .map_err(|e| e.to_string())?;
    info!(product_id, "product deleted");
    Ok(())
}

/// Upload a product image (`POST /api/upload`), returning the served URL.
pub async fn upload_image(
    api: &ApiClient,
    file_name: &str,
    bytes: Vec<u8>,
    mime: &str,
) -> Result<String, String> {
    let resp = api
        .post_multipart("/api/upload", file_name, bytes, mime)
        .await
        .map_err(|e| e.to_string())?;
    resp.get("url")
        .and_then(Value::as_str)
        .map(|s| s.to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| "Upload response is missing the image URL".to_string())
}

// ---------------------------------------------------------------------------
// Stock status & stats
// ---------------------------------------------------------------------------

/// Stock badge shown per row. One threshold everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockStatus {
    InStock,
    LowStock,
    OutOfStock,
}

impl StockStatus {
    pub fn of(stock: i64) -> StockStatus {
        if stock <= 0 {
            StockStatus::OutOfStock
        } else if stock < LOW_STOCK_THRESHOLD {
            StockStatus::LowStock
        } else {
            StockStatus::InStock
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            StockStatus::InStock => "In Stock",
            StockStatus::LowStock => "Low Stock",
            StockStatus::OutOfStock => "Out of Stock",
        }
    }
}

/// Header stat tiles for the inventory page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InventoryStats {
    pub total: usize,
    pub low_stock: usize,
    pub out_of_stock: usize,
    /// Σ(price × stock) in centavos.
    pub value_cents: i64,
}

impl InventoryStats {
    pub fn compute(products: &[Product]) -> InventoryStats {
        let mut stats = InventoryStats {
            total: products.len(),
            ..InventoryStats::default()
        };
        for p in products {
            stats.value_cents += p.unit_price_cents() * p.stock;
            match StockStatus::of(p.stock) {
                StockStatus::LowStock => stats.low_stock += 1,
                StockStatus::OutOfStock => stats.out_of_stock += 1,
                StockStatus::InStock => {}
            }
        }
        stats
    }
}

// ---------------------------------------------------------------------------
// CSV export
// ---------------------------------------------------------------------------

/// Render the inventory as CSV: ID, Name, Category, Price, Stock, Status.
/// Name, category, and status are quoted like the original export.
pub fn export_csv(products: &[Product]) -> String {
    let mut lines = Vec::with_capacity(products.len() + 1);
    lines.push("ID,Name,Category,Price,Stock,Status".to_string());
    for p in products {
        lines.push(format!(
            "{},\"{}\",\"{}\",{:.2},{},\"{}\"",
            p.id,
            csv_escape(&p.name),
            csv_escape(&p.category),
            pricing::pesos(p.unit_price_cents()),
            p.stock,
            StockStatus::of(p.stock).label(),
        ));
    }
    lines.join("\n")
}

fn csv_escape(field: &str) -> String {
    field.replace('"', "\"\"")
}

// ===========================================================================
// Tests
// ===========================================================================
