//! Writes performed by Confirm and Cancel. Every function here expects to run
//! on the connection of an open transaction.

use super::queries::{execute_batch, ENTRY_COLUMNS};
use crate::models::{FulfillmentTarget, InvoiceStatus, NfeEntry, PlannedLine, VendorMapInsert};
use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use sqlx::{PgConnection, Postgres, QueryBuilder};

/// Movement kind for goods received on an inbound invoice.
pub const MOVEMENT_ENTRY: &str = "entry";

/// Loads the draft and takes its row lock until the transaction ends.
/// Concurrent confirm/cancel calls on the same draft queue up here.
pub async fn lock_entry(
    conn: &mut PgConnection,
    entry_id: i64,
) -> Result<Option<NfeEntry>, sqlx::Error> {
    sqlx::query_as::<_, NfeEntry>(&format!(
        "SELECT {} FROM nfe_entry WHERE id = $1 FOR UPDATE",
        ENTRY_COLUMNS
    ))
    .bind(entry_id)
    .fetch_optional(conn)
    .await
}

/// Creates the purchase record for a draft, or returns the one already linked to it.
pub async fn upsert_purchase(conn: &mut PgConnection, entry: &NfeEntry) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO purchase (nfe_entry_id, supplier_id, store_id, document, issued_at, total_amount)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (nfe_entry_id) DO UPDATE
            SET supplier_id = EXCLUDED.supplier_id,
                total_amount = EXCLUDED.total_amount
        RETURNING id
        "#,
    )
    .bind(entry.id)
    .bind(entry.supplier_id)
    .bind(entry.store_id)
    .bind(&entry.number)
    .bind(entry.issued_at)
    .bind(&entry.total_invoice)
    .fetch_one(conn)
    .await
}

/// Batch insert of purchase lines carrying the allocated cost fields
pub async fn insert_purchase_lines(
    conn: &mut PgConnection,
    purchase_id: i64,
    lines: &[PlannedLine],
) -> Result<u64, sqlx::Error> {
    if lines.is_empty() {
        return Ok(0);
    }

    let mut query_builder = QueryBuilder::<Postgres>::new(
        "INSERT INTO purchase_line (
            purchase_id, nfe_entry_line_id, sku_id, product_id,
            quantity, unit_price, gross_value,
            alloc_discount, alloc_freight, alloc_other, landed_unit_cost
        ) ",
    );

    query_builder.push_values(lines, |mut b, line| {
        b.push_bind(purchase_id)
            .push_bind(line.line_id)
            .push_bind(line.target.sku_id())
            .push_bind(line.target.product_id())
            .push_bind(&line.quantity)
            .push_bind(&line.unit_price)
            .push_bind(&line.gross_value)
            .push_bind(&line.allocation.alloc_discount)
            .push_bind(&line.allocation.alloc_freight)
            .push_bind(&line.allocation.alloc_other)
            .push_bind(&line.allocation.landed_unit_cost);
    });

    execute_batch(conn, query_builder, "purchase_line").await
}

/// Store × SKU stock: created at zero if missing, then incremented.
/// Returns the balance after the increment.
pub async fn add_inventory(
    conn: &mut PgConnection,
    store_id: i64,
    sku_id: i64,
    quantity: &BigDecimal,
) -> Result<BigDecimal, sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO inventory (store_id, sku_id, quantity)
        VALUES ($1, $2, 0)
        ON CONFLICT (store_id, sku_id) DO NOTHING
        "#,
    )
    .bind(store_id)
    .bind(sku_id)
    .execute(&mut *conn)
    .await?;

    sqlx::query_scalar::<_, BigDecimal>(
        r#"
        UPDATE inventory
        SET quantity = quantity + $3
        WHERE store_id = $1 AND sku_id = $2
        RETURNING quantity
        "#,
    )
    .bind(store_id)
    .bind(sku_id)
    .bind(quantity)
    .fetch_one(conn)
    .await
}

#[derive(Debug, Clone)]
pub struct MovementInsert<'a> {
    pub store_id: i64,
    pub sku_id: i64,
    pub barcode: &'a str,
    pub quantity: &'a BigDecimal,
    pub unit_cost: &'a BigDecimal,
    pub document: &'a str,
    pub moved_on: NaiveDate,
}

/// Appends one inventory movement of kind `entry`.
pub async fn insert_movement(
    conn: &mut PgConnection,
    movement: &MovementInsert<'_>,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO inventory_movement
            (store_id, sku_id, barcode, kind, quantity, unit_cost, document, moved_on)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING id
        "#,
    )
    .bind(movement.store_id)
    .bind(movement.sku_id)
    .bind(movement.barcode)
    .bind(MOVEMENT_ENTRY)
    .bind(movement.quantity)
    .bind(movement.unit_cost)
    .bind(movement.document)
    .bind(movement.moved_on)
    .fetch_one(conn)
    .await
}

/// Persists overrides as vendor maps. Codes already mapped for the supplier
/// are left untouched; returns how many rows were actually created.
pub async fn insert_vendor_maps(
    conn: &mut PgConnection,
    maps: &[VendorMapInsert],
) -> Result<u64, sqlx::Error> {
    if maps.is_empty() {
        return Ok(0);
    }

    let mut query_builder = QueryBuilder::<Postgres>::new(
        "INSERT INTO vendor_sku_map (supplier_id, vendor_code, description, sku_id, product_id) ",
    );

    query_builder.push_values(maps, |mut b, map| {
        let (sku_id, product_id) = match &map.target {
            FulfillmentTarget::Sku { sku_id, .. } => (Some(*sku_id), None),
            FulfillmentTarget::Product { product_id } => (None, Some(*product_id)),
            FulfillmentTarget::Unresolved => (None, None),
        };
        b.push_bind(map.supplier_id)
            .push_bind(&map.vendor_code)
            .push_bind(&map.description)
            .push_bind(sku_id)
            .push_bind(product_id);
    });
    query_builder.push(" ON CONFLICT (supplier_id, vendor_code) DO NOTHING");

    execute_batch(conn, query_builder, "vendor_sku_map").await
}

/// Writes the new status; `posted` also stamps `posted_at`.
pub async fn set_status(
    conn: &mut PgConnection,
    entry_id: i64,
    status: InvoiceStatus,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE nfe_entry
        SET status = $2,
            posted_at = CASE WHEN $2 = 'posted' THEN now() ELSE posted_at END
        WHERE id = $1
        "#,
    )
    .bind(entry_id)
    .bind(status)
    .execute(conn)
    .await
    .map(|_| ())
}
