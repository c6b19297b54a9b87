use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Active SKU, keyed by barcode
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SkuRecord {
    pub id: i64,
    pub product_id: i64,
    pub barcode: String,
    pub product_code: String,
}

/// Vendor-SKU map row joined with the barcode of its SKU (if any)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct VendorMapRecord {
    pub id: i64,
    pub supplier_id: i64,
    pub vendor_code: String,
    pub sku_id: Option<i64>,
    pub sku_barcode: Option<String>,
    pub product_id: Option<i64>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SupplierRecord {
    pub id: i64,
    pub name: String,
    pub tax_id: String,
}
