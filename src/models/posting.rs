use super::{FulfillmentTarget, InvoiceStatus, LineOverride, LineRef, MatchOrigin};
use bigdecimal::BigDecimal;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Cost split for one matched line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineAllocation {
    pub alloc_discount: BigDecimal,
    pub alloc_freight: BigDecimal,
    pub alloc_other: BigDecimal,
    /// (gross - discount + freight + other) / quantity, 6 decimals
    pub landed_unit_cost: BigDecimal,
}

impl LineAllocation {
    /// gross - discount + freight + other
    pub fn net_value(&self, gross: &BigDecimal) -> BigDecimal {
        gross - &self.alloc_discount + &self.alloc_freight + &self.alloc_other
    }
}

/// One purchase line to be written on posting.
#[derive(Debug, Clone)]
pub struct PlannedLine {
    pub line_id: i64,
    pub ordinal: i32,
    pub target: FulfillmentTarget,
    pub origin: MatchOrigin,
    pub quantity: BigDecimal,
    pub unit_price: BigDecimal,
    pub gross_value: BigDecimal,
    pub allocation: LineAllocation,
}

/// Override to be remembered as a vendor-SKU map row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorMapInsert {
    pub supplier_id: i64,
    pub vendor_code: String,
    pub description: String,
    pub target: FulfillmentTarget,
}

/// Everything Confirm writes, computed before the first write.
#[derive(Debug, Clone)]
pub struct PostingPlan {
    pub lines: Vec<PlannedLine>,
    pub skipped: Vec<LineRef>,
    pub vendor_maps: Vec<VendorMapInsert>,
}

impl PostingPlan {
    /// Distinct SKUs receiving stock, in line order.
    pub fn sku_ids(&self) -> Vec<i64> {
        let mut seen = indexmap::IndexSet::new();
        for line in &self.lines {
            if let Some(sku_id) = line.target.sku_id() {
                seen.insert(sku_id);
            }
        }
        seen.into_iter().collect()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfirmOptions {
    #[serde(default)]
    pub allow_partial: bool,
    /// line id -> manual target
    #[serde(default)]
    pub overrides: IndexMap<i64, LineOverride>,
    #[serde(default)]
    pub save_vendor_map: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfirmOutcome {
    pub entry_id: i64,
    pub status: InvoiceStatus,
    pub purchase_id: i64,
    pub lines_created: usize,
    pub skus_updated: usize,
    pub vendor_maps_saved: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped_lines: Option<Vec<LineRef>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreviewLine {
    pub line_id: i64,
    pub ordinal: i32,
    pub vendor_code: String,
    pub description: String,
    pub barcode: Option<String>,
    pub quantity: BigDecimal,
    pub unit_price: BigDecimal,
    pub total: BigDecimal,
    pub target: Option<FulfillmentTarget>,
    pub origin: Option<MatchOrigin>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreviewReport {
    pub entry_id: i64,
    pub status: InvoiceStatus,
    pub resolved_lines: usize,
    pub total_lines: usize,
    pub lines: Vec<PreviewLine>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelOutcome {
    pub entry_id: i64,
    pub status: InvoiceStatus,
}
