use crate::models::{
    InvoiceStatus, NfeEntry, NfeEntryLine, ParsedInvoice, SkuRecord, SupplierRecord,
    VendorMapRecord,
};
use sqlx::postgres::PgExecutor;
use sqlx::{PgConnection, Postgres, QueryBuilder};
use std::time::{Duration, Instant};

pub(crate) const ENTRY_COLUMNS: &str = r#"
    id, access_key, number, series, issued_at, issuer_tax_id, issuer_name,
    supplier_id, store_id,
    total_products, total_discount, total_freight, total_other,
    total_ipi, total_icms_st, total_invoice,
    status, created_at, posted_at
"#;

const BATCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Draft by id
pub async fn get_entry<'e, E: PgExecutor<'e>>(
    executor: E,
    entry_id: i64,
) -> Result<Option<NfeEntry>, sqlx::Error> {
    sqlx::query_as::<_, NfeEntry>(&format!(
        "SELECT {} FROM nfe_entry WHERE id = $1",
        ENTRY_COLUMNS
    ))
    .bind(entry_id)
    .fetch_optional(executor)
    .await
}

/// Duplicate guard lookup
pub async fn find_entry_id_by_key<'e, E: PgExecutor<'e>>(
    executor: E,
    access_key: &str,
) -> Result<Option<i64>, sqlx::Error> {
    sqlx::query_scalar::<_, i64>("SELECT id FROM nfe_entry WHERE access_key = $1")
        .bind(access_key)
        .fetch_optional(executor)
        .await
}

/// Drafts, newest first; `store_id = None` lists every store.
pub async fn list_entries<'e, E: PgExecutor<'e>>(
    executor: E,
    store_id: Option<i64>,
) -> Result<Vec<NfeEntry>, sqlx::Error> {
    sqlx::query_as::<_, NfeEntry>(&format!(
        r#"
        SELECT {}
        FROM nfe_entry
        WHERE ($1::bigint IS NULL OR store_id = $1)
        ORDER BY id DESC
        "#,
        ENTRY_COLUMNS
    ))
    .bind(store_id)
    .fetch_all(executor)
    .await
}

/// Lines in document order
pub async fn list_lines<'e, E: PgExecutor<'e>>(
    executor: E,
    entry_id: i64,
) -> Result<Vec<NfeEntryLine>, sqlx::Error> {
    sqlx::query_as::<_, NfeEntryLine>(
        r#"
        SELECT id, nfe_entry_id, ordinal, vendor_code, description, ncm, cfop, unit,
               quantity, unit_price, gross_value, barcode, discount, freight, other
        FROM nfe_entry_line
        WHERE nfe_entry_id = $1
        ORDER BY ordinal
        "#,
    )
    .bind(entry_id)
    .fetch_all(executor)
    .await
}

pub async fn store_exists<'e, E: PgExecutor<'e>>(
    executor: E,
    store_id: i64,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM store WHERE id = $1)")
        .bind(store_id)
        .fetch_one(executor)
        .await
}

pub async fn get_supplier<'e, E: PgExecutor<'e>>(
    executor: E,
    supplier_id: i64,
) -> Result<Option<SupplierRecord>, sqlx::Error> {
    sqlx::query_as::<_, SupplierRecord>("SELECT id, name, tax_id FROM supplier WHERE id = $1")
        .bind(supplier_id)
        .fetch_optional(executor)
        .await
}

/// Suppliers whose tax id (punctuation stripped) equals `tax_id_digits`, oldest first.
pub async fn find_suppliers_by_tax_id<'e, E: PgExecutor<'e>>(
    executor: E,
    tax_id_digits: &str,
) -> Result<Vec<SupplierRecord>, sqlx::Error> {
    sqlx::query_as::<_, SupplierRecord>(
        r#"
        SELECT id, name, tax_id
        FROM supplier
        WHERE regexp_replace(tax_id, '\D', '', 'g') = $1
        ORDER BY id
        "#,
    )
    .bind(tax_id_digits)
    .fetch_all(executor)
    .await
}

pub async fn find_active_sku<'e, E: PgExecutor<'e>>(
    executor: E,
    sku_id: i64,
) -> Result<Option<SkuRecord>, sqlx::Error> {
    sqlx::query_as::<_, SkuRecord>(
        "SELECT id, product_id, barcode, product_code FROM sku WHERE id = $1 AND active",
    )
    .bind(sku_id)
    .fetch_optional(executor)
    .await
}

pub async fn product_exists<'e, E: PgExecutor<'e>>(
    executor: E,
    product_id: i64,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM product WHERE id = $1)")
        .bind(product_id)
        .fetch_one(executor)
        .await
}

/// Active SKUs for every barcode on a draft
pub async fn skus_by_barcodes<'e, E: PgExecutor<'e>>(
    executor: E,
    barcodes: &[String],
) -> Result<Vec<SkuRecord>, sqlx::Error> {
    sqlx::query_as::<_, SkuRecord>(
        r#"
        SELECT id, product_id, barcode, product_code
        FROM sku
        WHERE barcode = ANY($1)
          AND active
        "#,
    )
    .bind(barcodes)
    .fetch_all(executor)
    .await
}

/// Active vendor maps of one supplier for every vendor code on a draft.
/// Maps pointing at an inactive SKU come back without `sku_barcode`.
pub async fn vendor_maps_for<'e, E: PgExecutor<'e>>(
    executor: E,
    supplier_id: i64,
    vendor_codes: &[String],
) -> Result<Vec<VendorMapRecord>, sqlx::Error> {
    sqlx::query_as::<_, VendorMapRecord>(
        r#"
        SELECT m.id, m.supplier_id, m.vendor_code, m.sku_id,
               s.barcode AS sku_barcode, m.product_id
        FROM vendor_sku_map m
        LEFT JOIN sku s ON s.id = m.sku_id AND s.active
        WHERE m.supplier_id = $1
          AND m.vendor_code = ANY($2)
          AND m.active
        "#,
    )
    .bind(supplier_id)
    .bind(vendor_codes)
    .fetch_all(executor)
    .await
}

/// Inserts the draft header; returns the new id.
pub async fn insert_entry(
    conn: &mut PgConnection,
    parsed: &ParsedInvoice,
    store_id: i64,
    supplier_id: Option<i64>,
    raw_document: &str,
) -> Result<i64, sqlx::Error> {
    let t = &parsed.totals;
    sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO nfe_entry (
            access_key, number, series, issued_at, issuer_tax_id, issuer_name,
            supplier_id, store_id, raw_document,
            total_products, total_discount, total_freight, total_other,
            total_ipi, total_icms_st, total_invoice, status
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
        RETURNING id
        "#,
    )
    .bind(&parsed.access_key)
    .bind(&parsed.number)
    .bind(&parsed.series)
    .bind(parsed.issued_at)
    .bind(&parsed.issuer_tax_id)
    .bind(&parsed.issuer_name)
    .bind(supplier_id)
    .bind(store_id)
    .bind(raw_document)
    .bind(&t.products)
    .bind(&t.discount)
    .bind(&t.freight)
    .bind(&t.other)
    .bind(&t.ipi)
    .bind(&t.icms_st)
    .bind(&t.invoice)
    .bind(InvoiceStatus::Imported)
    .fetch_one(conn)
    .await
}

/// Batch insert of the draft lines
pub async fn insert_lines(
    conn: &mut PgConnection,
    entry_id: i64,
    parsed: &ParsedInvoice,
) -> Result<u64, sqlx::Error> {
    if parsed.lines.is_empty() {
        return Ok(0);
    }

    let mut query_builder = QueryBuilder::<Postgres>::new(
        "INSERT INTO nfe_entry_line (
            nfe_entry_id, ordinal, vendor_code, description, ncm, cfop, unit,
            quantity, unit_price, gross_value, barcode, discount, freight, other
        ) ",
    );

    query_builder.push_values(&parsed.lines, |mut b, line| {
        b.push_bind(entry_id)
            .push_bind(line.ordinal)
            .push_bind(&line.vendor_code)
            .push_bind(&line.description)
            .push_bind(&line.ncm)
            .push_bind(&line.cfop)
            .push_bind(&line.unit)
            .push_bind(&line.quantity)
            .push_bind(&line.unit_price)
            .push_bind(&line.gross_value)
            .push_bind(&line.barcode)
            .push_bind(&line.discount)
            .push_bind(&line.freight)
            .push_bind(&line.other);
    });

    execute_batch(conn, query_builder, "nfe_entry_line").await
}

/// Runs a batch insert with the service's 30 s ceiling.
pub(crate) async fn execute_batch(
    conn: &mut PgConnection,
    mut query_builder: QueryBuilder<'_, Postgres>,
    table: &str,
) -> Result<u64, sqlx::Error> {
    let execute_start = Instant::now();
    let execute_result =
        tokio::time::timeout(BATCH_TIMEOUT, query_builder.build().execute(conn)).await;

    match execute_result {
        Ok(Ok(result)) => {
            tracing::debug!(
                table,
                rows = result.rows_affected(),
                elapsed = ?execute_start.elapsed(),
                "batch insert done"
            );
            Ok(result.rows_affected())
        }
        Ok(Err(e)) => {
            tracing::error!(table, elapsed = ?execute_start.elapsed(), error = ?e, "batch insert failed");
            Err(e)
        }
        Err(_) => {
            tracing::error!(table, "batch insert timed out (>{:?})", BATCH_TIMEOUT);
            Err(sqlx::Error::PoolTimedOut)
        }
    }
}

pub async fn set_supplier<'e, E: PgExecutor<'e>>(
    executor: E,
    entry_id: i64,
    supplier_id: i64,
) -> Result<u64, sqlx::Error> {
    sqlx::query("UPDATE nfe_entry SET supplier_id = $2 WHERE id = $1")
        .bind(entry_id)
        .bind(supplier_id)
        .execute(executor)
        .await
        .map(|r| r.rows_affected())
}

/// Compare-and-set on status; 0 rows means someone else moved it first.
pub async fn advance_status<'e, E: PgExecutor<'e>>(
    executor: E,
    entry_id: i64,
    from: InvoiceStatus,
    to: InvoiceStatus,
) -> Result<u64, sqlx::Error> {
    sqlx::query("UPDATE nfe_entry SET status = $3 WHERE id = $1 AND status = $2")
        .bind(entry_id)
        .bind(from)
        .bind(to)
        .execute(executor)
        .await
        .map(|r| r.rows_affected())
}

/// Appends to the draft's action log.
pub async fn insert_log<'e, E: PgExecutor<'e>>(
    executor: E,
    entry_id: i64,
    action: &str,
    details: serde_json::Value,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO nfe_entry_log (nfe_entry_id, action, details) VALUES ($1, $2, $3)")
        .bind(entry_id)
        .bind(action)
        .bind(details)
        .execute(executor)
        .await
        .map(|_| ())
}
