use super::InvoiceStatus;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Invoice-level totals (the `ICMSTot` block).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceTotals {
    pub products: BigDecimal,
    pub discount: BigDecimal,
    pub freight: BigDecimal,
    pub other: BigDecimal,
    pub ipi: BigDecimal,
    pub icms_st: BigDecimal,
    pub invoice: BigDecimal,
}

/// Parsed document, before persistence.
#[derive(Debug, Clone)]
pub struct ParsedInvoice {
    pub access_key: String,
    pub number: String,
    pub series: String,
    pub issued_at: DateTime<Utc>,
    /// true when neither `dhEmi` nor `dEmi` was usable
    pub issued_at_fallback: bool,
    pub issuer_tax_id: String,
    pub issuer_name: String,
    pub totals: InvoiceTotals,
    pub lines: Vec<ParsedLine>,
}

#[derive(Debug, Clone)]
pub struct ParsedLine {
    pub ordinal: i32,
    pub vendor_code: String,
    pub description: String,
    pub ncm: Option<String>,
    pub cfop: Option<String>,
    pub unit: String,
    pub quantity: BigDecimal,
    pub unit_price: BigDecimal,
    pub gross_value: BigDecimal,
    pub barcode: Option<String>,
    pub discount: Option<BigDecimal>,
    pub freight: Option<BigDecimal>,
    pub other: Option<BigDecimal>,
}

/// Invoice draft (nfe_entry)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct NfeEntry {
    pub id: i64,
    pub access_key: String,
    pub number: String,
    pub series: String,
    pub issued_at: DateTime<Utc>,
    pub issuer_tax_id: String,
    pub issuer_name: String,
    pub supplier_id: Option<i64>,
    pub store_id: i64,
    pub total_products: BigDecimal,
    pub total_discount: BigDecimal,
    pub total_freight: BigDecimal,
    pub total_other: BigDecimal,
    pub total_ipi: BigDecimal,
    pub total_icms_st: BigDecimal,
    pub total_invoice: BigDecimal,
    pub status: InvoiceStatus,
    pub created_at: DateTime<Utc>,
    pub posted_at: Option<DateTime<Utc>>,
}

impl NfeEntry {
    pub fn totals(&self) -> InvoiceTotals {
        InvoiceTotals {
            products: self.total_products.clone(),
            discount: self.total_discount.clone(),
            freight: self.total_freight.clone(),
            other: self.total_other.clone(),
            ipi: self.total_ipi.clone(),
            icms_st: self.total_icms_st.clone(),
            invoice: self.total_invoice.clone(),
        }
    }
}

/// Invoice line (nfe_entry_line)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct NfeEntryLine {
    pub id: i64,
    pub nfe_entry_id: i64,
    pub ordinal: i32,
    pub vendor_code: String,
    pub description: String,
    pub ncm: Option<String>,
    pub cfop: Option<String>,
    pub unit: String,
    pub quantity: BigDecimal,
    pub unit_price: BigDecimal,
    pub gross_value: BigDecimal,
    pub barcode: Option<String>,
    pub discount: Option<BigDecimal>,
    pub freight: Option<BigDecimal>,
    pub other: Option<BigDecimal>,
}

impl NfeEntryLine {
    pub fn to_ref(&self) -> LineRef {
        LineRef {
            line_id: self.id,
            ordinal: self.ordinal,
            vendor_code: self.vendor_code.clone(),
            description: self.description.clone(),
        }
    }
}

/// Identifies a line in error payloads and skipped-line reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRef {
    pub line_id: i64,
    pub ordinal: i32,
    pub vendor_code: String,
    pub description: String,
}

/// Draft with its ordered lines, as returned by Upload and Get.
#[derive(Debug, Clone, Serialize)]
pub struct NfeEntryDetail {
    #[serde(flatten)]
    pub entry: NfeEntry,
    pub lines: Vec<NfeEntryLine>,
}
